use common::Dialect;
use std::collections::HashMap;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Substitute logical table names with their physical targets.
///
/// Matches bare identifiers at word boundaries and identifiers quoted with
/// the source dialect's quote character. String literals are never touched;
/// a quoted identifier that maps is re-emitted with each qualified part
/// quoted separately.
pub fn replace_tables(sql: &str, mappings: &HashMap<String, String>, source: Dialect) -> String {
    let ident_quote = source.quote_char();
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // String literals pass through verbatim.
        if c == '\'' || (c == '"' && source == Dialect::MySql) {
            i = copy_quoted(&chars, i, c, &mut out);
            continue;
        }

        if c == ident_quote {
            // Quoted identifier: replace the content if it maps.
            let start = i;
            let mut j = i + 1;
            while j < chars.len() && chars[j] != ident_quote {
                j += 1;
            }
            if j < chars.len() {
                let inner: String = chars[i + 1..j].iter().collect();
                if let Some(target) = mappings.get(&inner) {
                    let quoted: Vec<String> = target
                        .split('.')
                        .map(|part| source.quote_identifier(part))
                        .collect();
                    out.push_str(&quoted.join("."));
                } else {
                    out.extend(&chars[start..=j]);
                }
                i = j + 1;
            } else {
                // Unterminated quote: emit the rest untouched.
                out.extend(&chars[start..]);
                i = chars.len();
            }
            continue;
        }

        if is_ident_char(c) && !c.is_ascii_digit() {
            let start = i;
            let mut j = i;
            while j < chars.len() && is_ident_char(chars[j]) {
                j += 1;
            }
            let word: String = chars[start..j].iter().collect();
            match mappings.get(&word) {
                Some(target) => out.push_str(target),
                None => out.push_str(&word),
            }
            i = j;
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Copy a quoted literal starting at `start` (whose quote char is `quote`),
/// honoring backslash escapes and doubled quotes. Returns the index after
/// the literal.
fn copy_quoted(chars: &[char], start: usize, quote: char, out: &mut String) -> usize {
    out.push(chars[start]);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if c == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            // Doubled quote stays inside the literal.
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(logical: &str, physical: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(logical.to_string(), physical.to_string());
        m
    }

    #[test]
    fn test_replaces_at_word_boundaries() {
        let sql = "SELECT * FROM t_order WHERE t_order.id = 1";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(out, "SELECT * FROM ds_0.t_order_1 WHERE ds_0.t_order_1.id = 1");
    }

    #[test]
    fn test_leaves_longer_identifiers_alone() {
        let sql = "SELECT * FROM t_order_item";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(out, "SELECT * FROM t_order_item");
    }

    #[test]
    fn test_string_literals_untouched() {
        let sql = "SELECT * FROM t_order WHERE note = 't_order is great'";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(
            out,
            "SELECT * FROM ds_0.t_order_1 WHERE note = 't_order is great'"
        );
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let sql = r"SELECT * FROM t_order WHERE note = 'it\'s t_order'";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(
            out,
            r"SELECT * FROM ds_0.t_order_1 WHERE note = 'it\'s t_order'"
        );
    }

    #[test]
    fn test_doubled_quote_inside_literal() {
        let sql = "SELECT * FROM t_order WHERE note = 'it''s t_order'";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(
            out,
            "SELECT * FROM ds_0.t_order_1 WHERE note = 'it''s t_order'"
        );
    }

    #[test]
    fn test_backtick_quoted_identifier() {
        let sql = "SELECT * FROM `t_order`";
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(out, "SELECT * FROM `ds_0`.`t_order_1`");
    }

    #[test]
    fn test_double_quoted_identifier_postgres() {
        let sql = r#"SELECT * FROM "t_order""#;
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::Postgres);
        assert_eq!(out, r#"SELECT * FROM "ds_0"."t_order_1""#);
    }

    #[test]
    fn test_double_quotes_are_strings_in_mysql() {
        let sql = r#"SELECT * FROM t_order WHERE note = "t_order""#;
        let out = replace_tables(sql, &mapping("t_order", "ds_0.t_order_1"), Dialect::MySql);
        assert_eq!(
            out,
            r#"SELECT * FROM ds_0.t_order_1 WHERE note = "t_order""#
        );
    }

    #[test]
    fn test_multiple_tables() {
        let mut mappings = mapping("t_order", "ds_0.t_order_1");
        mappings.insert("t_user".to_string(), "ds_0.t_user_0".to_string());
        let sql = "SELECT * FROM t_order JOIN t_user ON t_order.uid = t_user.id";
        let out = replace_tables(sql, &mappings, Dialect::MySql);
        assert_eq!(
            out,
            "SELECT * FROM ds_0.t_order_1 JOIN ds_0.t_user_0 ON ds_0.t_order_1.uid = ds_0.t_user_0.id"
        );
    }
}
