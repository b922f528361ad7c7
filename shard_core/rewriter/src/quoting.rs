use common::Dialect;

/// Convert identifier quoting between dialects: backtick to double quote
/// when targeting PostgreSQL, double quote to backtick when targeting MySQL.
/// Single-quoted string literals are skipped (with backslash escapes).
pub fn convert_identifier_quotes(sql: &str, source: Dialect, target: Dialect) -> String {
    if source == target {
        return sql.to_string();
    }
    let (from, to) = (source.quote_char(), target.quote_char());

    let mut out = String::with_capacity(sql.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in sql.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        if in_string {
            if c == '\\' {
                escaped = true;
            } else if c == '\'' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push(c);
            }
            c if c == from => out.push(to),
            _ => out.push(c),
        }
    }

    out
}
