use crate::statement::PgFeatures;
use once_cell::sync::Lazy;
use regex::Regex;

static ILIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bILIKE\b").unwrap());
static RETURNING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bRETURNING\b").unwrap());
static PG_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SERIAL|BIGSERIAL|SMALLSERIAL|JSONB|UUID|TSVECTOR|TSQUERY|BYTEA|INET|CIDR|MACADDR)\b")
        .unwrap()
});
static ARRAY_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Z]+\d*)\s*\[\s*\]").unwrap());

/// Operators scanned longest-first so `?&` is not reported as `?` + `&`.
const JSONB_OPERATORS: [&str; 5] = ["?&", "?|", "@>", "<@", "?"];
const ARRAY_OPERATORS: [&str; 2] = ["&&", "||"];
const REGEX_OPERATORS: [&str; 4] = ["!~*", "!~", "~*", "~"];

/// Lexical scan for PostgreSQL-specific features. Works on the raw SQL with
/// string literals blanked out, so it is independent of whether the
/// structured parse accepted the statement. Routing ignores everything here.
pub fn detect_features(sql: &str) -> PgFeatures {
    let masked = mask(sql);
    let mut features = PgFeatures::default();

    let mut consumed = vec![false; masked.len()];
    scan_operators(&masked, &JSONB_OPERATORS, &mut consumed, &mut features.jsonb_operators);
    scan_operators(&masked, &ARRAY_OPERATORS, &mut consumed, &mut features.array_operators);
    scan_operators(&masked, &REGEX_OPERATORS, &mut consumed, &mut features.regex_operators);

    if masked.contains("@@") {
        features.text_search = true;
        // `@@` would otherwise double-report as two containment hits; the
        // operator scan above never matches it because `@>` needs the `>`.
    }
    features.ilike = ILIKE_RE.is_match(&masked);
    features.returning = RETURNING_RE.is_match(&masked);

    for caps in PG_TYPE_RE.captures_iter(&masked) {
        let name = caps[1].to_uppercase();
        if !features.pg_types.contains(&name) {
            features.pg_types.push(name);
        }
    }
    for caps in ARRAY_TYPE_RE.captures_iter(&masked) {
        let name = format!("{}[]", caps[1].to_uppercase());
        if !features.pg_types.contains(&name) {
            features.pg_types.push(name);
        }
    }

    features
}

fn scan_operators(
    masked: &str,
    operators: &[&str],
    consumed: &mut [bool],
    found: &mut Vec<String>,
) {
    let bytes = masked.as_bytes();
    for op in operators {
        let op_bytes = op.as_bytes();
        let mut i = 0;
        while i + op_bytes.len() <= bytes.len() {
            if &bytes[i..i + op_bytes.len()] == op_bytes
                && !consumed[i..i + op_bytes.len()].iter().any(|c| *c)
                && !is_operator_extension(bytes, i, op_bytes.len())
                && !(*op == "?" && looks_like_bind_marker(bytes, i))
            {
                for flag in consumed[i..i + op_bytes.len()].iter_mut() {
                    *flag = true;
                }
                if !found.contains(&op.to_string()) {
                    found.push(op.to_string());
                }
                i += op_bytes.len();
            } else {
                i += 1;
            }
        }
    }
}

/// A bare `?` after `=`, `(` or `,` is a bind marker, not the JSONB
/// key-exists operator.
fn looks_like_bind_marker(bytes: &[u8], at: usize) -> bool {
    let mut i = at;
    while i > 0 {
        i -= 1;
        let b = bytes[i];
        if b == b' ' || b == b'\t' || b == b'\n' {
            continue;
        }
        return matches!(b, b'=' | b'(' | b',' | b'<' | b'>');
    }
    true
}

/// Reject matches that are part of a longer operator run, e.g. the `~` in
/// `!~` or the `@` pair in `@@`.
fn is_operator_extension(bytes: &[u8], start: usize, len: usize) -> bool {
    const OPERATOR_CHARS: &[u8] = b"~!@<>?&|#";
    let before = start.checked_sub(1).map(|i| bytes[i]);
    let after = bytes.get(start + len);
    matches!(before, Some(b) if OPERATOR_CHARS.contains(&b))
        || matches!(after, Some(b) if OPERATOR_CHARS.contains(b))
}

fn mask(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;
    for &b in bytes {
        if escaped {
            out.push(b' ');
            escaped = false;
            continue;
        }
        if in_string {
            if b == b'\\' {
                escaped = true;
                out.push(b' ');
            } else if b == b'\'' {
                in_string = false;
                out.push(b'\'');
            } else {
                out.push(b' ');
            }
            continue;
        }
        if b == b'\'' {
            in_string = true;
        }
        out.push(b);
    }
    String::from_utf8(out).unwrap_or_else(|_| sql.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonb_containment() {
        let features = detect_features("SELECT * FROM t WHERE meta @> '{\"a\": 1}'");
        assert_eq!(features.jsonb_operators, vec!["@>"]);
        assert!(!features.text_search);
    }

    #[test]
    fn test_jsonb_key_operators() {
        let features = detect_features("SELECT * FROM t WHERE meta ?& array['a','b'] OR meta ?| array['c']");
        assert!(features.jsonb_operators.contains(&"?&".to_string()));
        assert!(features.jsonb_operators.contains(&"?|".to_string()));
        assert!(
            !features.jsonb_operators.contains(&"?".to_string()),
            "?& must not double-report as ?"
        );
    }

    #[test]
    fn test_regex_operators_longest_first() {
        let features = detect_features("SELECT * FROM t WHERE name !~* 'x' AND alt ~ 'y'");
        assert!(features.regex_operators.contains(&"!~*".to_string()));
        assert!(features.regex_operators.contains(&"~".to_string()));
        assert!(!features.regex_operators.contains(&"~*".to_string()));
    }

    #[test]
    fn test_text_search_match() {
        let features = detect_features("SELECT * FROM docs WHERE body @@ to_tsquery('rust')");
        assert!(features.text_search);
        assert!(features.jsonb_operators.is_empty());
    }

    #[test]
    fn test_ilike_and_returning() {
        let features =
            detect_features("UPDATE t SET name = 'x' WHERE name ILIKE 'a%' RETURNING id");
        assert!(features.ilike);
        assert!(features.returning);
    }

    #[test]
    fn test_pg_types() {
        let features = detect_features(
            "CREATE TABLE t (id SERIAL, meta JSONB, tag UUID, body TSVECTOR, nums INT[])",
        );
        assert!(features.pg_types.contains(&"SERIAL".to_string()));
        assert!(features.pg_types.contains(&"JSONB".to_string()));
        assert!(features.pg_types.contains(&"UUID".to_string()));
        assert!(features.pg_types.contains(&"TSVECTOR".to_string()));
        assert!(features.pg_types.contains(&"INT[]".to_string()));
    }

    #[test]
    fn test_operators_inside_literals_ignored() {
        let features = detect_features("SELECT * FROM t WHERE note = 'a @> b ~ c'");
        assert!(features.is_empty());
    }
}
