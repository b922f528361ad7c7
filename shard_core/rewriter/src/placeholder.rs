use common::Dialect;

/// Convert `?` bind markers to the target dialect's form.
///
/// MySQL keeps `?`; PostgreSQL gets `$1, $2, ...` in source order. A small
/// state machine tracks single- and double-quoted contexts with backslash
/// escapes so markers inside literals survive untouched.
pub fn convert_placeholders(sql: &str, target: Dialect) -> String {
    if target == Dialect::MySql {
        return sql.to_string();
    }

    #[derive(PartialEq)]
    enum State {
        Normal,
        Single,
        Double,
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut state = State::Normal;
    let mut escaped = false;
    let mut position = 0usize;

    for c in sql.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match state {
            State::Normal => match c {
                '?' => {
                    position += 1;
                    out.push('$');
                    out.push_str(&position.to_string());
                }
                '\'' => {
                    state = State::Single;
                    out.push(c);
                }
                '"' => {
                    state = State::Double;
                    out.push(c);
                }
                _ => out.push(c),
            },
            State::Single => {
                if c == '\\' {
                    escaped = true;
                } else if c == '\'' {
                    state = State::Normal;
                }
                out.push(c);
            }
            State::Double => {
                if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    state = State::Normal;
                }
                out.push(c);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_is_untouched() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        assert_eq!(convert_placeholders(sql, Dialect::MySql), sql);
    }

    #[test]
    fn test_postgres_numbering() {
        let sql = "INSERT INTO t (a, b, c) VALUES (?, ?, ?)";
        assert_eq!(
            convert_placeholders(sql, Dialect::Postgres),
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_question_mark_in_literal_survives() {
        let sql = "SELECT * FROM t WHERE a = ? AND note = 'what?'";
        assert_eq!(
            convert_placeholders(sql, Dialect::Postgres),
            "SELECT * FROM t WHERE a = $1 AND note = 'what?'"
        );
    }

    #[test]
    fn test_escaped_quote_does_not_end_literal() {
        let sql = r"SELECT * FROM t WHERE note = 'isn\'t it?' AND a = ?";
        assert_eq!(
            convert_placeholders(sql, Dialect::Postgres),
            r"SELECT * FROM t WHERE note = 'isn\'t it?' AND a = $1"
        );
    }

    #[test]
    fn test_double_quoted_context() {
        let sql = r#"SELECT * FROM t WHERE note = "a?b" AND a = ?"#;
        assert_eq!(
            convert_placeholders(sql, Dialect::Postgres),
            r#"SELECT * FROM t WHERE note = "a?b" AND a = $1"#
        );
    }

    #[test]
    fn test_marker_counts_match() {
        let sql = "UPDATE t SET a = ?, b = 'x?y' WHERE c IN (?, ?, ?)";
        let converted = convert_placeholders(sql, Dialect::Postgres);
        let dollars = converted.matches('$').count();
        assert_eq!(dollars, 4);
        assert!(converted.ends_with("($2, $3, $4)"));
    }
}
