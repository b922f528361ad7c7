use crate::statement::{
    AnalyzedStatement, InsertShape, JoinClause, JoinType, LimitInfo, OrderByColumn, Predicate,
    PredicateOp, PredicateValue, StatementKind,
};
use common::Value;
use once_cell::sync::Lazy;
use regex::Regex;

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+`?([A-Za-z_][\w$]*)`?").unwrap());
static JOIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(INNER|LEFT(?:\s+OUTER)?|RIGHT(?:\s+OUTER)?|FULL(?:\s+OUTER)?|CROSS)?\s*\bJOIN\s+`?([A-Za-z_][\w$]*)`?")
        .unwrap()
});
static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bINSERT\s+INTO\s+`?([A-Za-z_][\w$]*)`?\s*(?:\(([^)]*)\))?").unwrap()
});
static UPDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bUPDATE\s+`?([A-Za-z_][\w$]*)`?").unwrap());
static DELETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bDELETE\s+FROM\s+`?([A-Za-z_][\w$]*)`?").unwrap());
static TABLE_DDL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:CREATE|DROP|ALTER)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?`?([A-Za-z_][\w$]*)`?")
        .unwrap()
});
static EQ_PREDICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)`?([A-Za-z_][\w$]*)`?\s*=\s*(\?|'[^']*'|-?\d+(?:\.\d+)?)").unwrap()
});
static IN_PREDICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)`?([A-Za-z_][\w$]*)`?\s+IN\s*\(([^()]*)\)").unwrap()
});
static GROUP_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bGROUP\s+BY\s+(.*?)(?:\bHAVING\b|\bORDER\b|\bLIMIT\b|$)").unwrap()
});
static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bORDER\s+BY\s+(.*?)(?:\bLIMIT\b|\bOFFSET\b|\bFOR\s+UPDATE\b|$)").unwrap()
});
static ORDER_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^[`"]?([\w$.]+)[`"]?(?:\s+(ASC|DESC))?$"#).unwrap()
});
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\d+)(?:\s*,\s*(\d+)|\s+OFFSET\s+(\d+))?").unwrap()
});

/// Best-effort per-clause extraction when the structured parse fails. Never
/// fails; whatever each clause regex finds is what comes back.
pub fn extract(sql: &str, kind: StatementKind) -> AnalyzedStatement {
    let mut out = AnalyzedStatement::empty(sql, kind);
    out.from_fallback = true;
    let masked = mask_literals(sql);

    match kind {
        StatementKind::Insert => {
            if let Some(caps) = INSERT_RE.captures(&masked) {
                let table = caps[1].to_string();
                out.tables.push(table.clone());
                let columns: Vec<String> = caps
                    .get(2)
                    .map(|list| {
                        list.as_str()
                            .split(',')
                            .map(|c| c.trim().trim_matches('`').trim_matches('"').to_string())
                            .filter(|c| !c.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                out.columns = columns.clone();
                out.insert = Some(InsertShape {
                    table,
                    columns,
                    values_rows: masked.to_uppercase().contains("VALUES") as usize,
                    placeholders_per_row: Vec::new(),
                    rows: Vec::new(),
                    is_insert_select: !masked.to_uppercase().contains("VALUES"),
                });
            }
        }
        StatementKind::Update => {
            if let Some(caps) = UPDATE_RE.captures(&masked) {
                out.tables.push(caps[1].to_string());
            }
        }
        StatementKind::Delete => {
            if let Some(caps) = DELETE_RE.captures(&masked) {
                out.tables.push(caps[1].to_string());
            }
        }
        StatementKind::Create | StatementKind::Drop | StatementKind::Alter => {
            if let Some(caps) = TABLE_DDL_RE.captures(&masked) {
                out.tables.push(caps[1].to_string());
            }
        }
        _ => {}
    }

    for caps in FROM_RE.captures_iter(&masked) {
        push_unique(&mut out.tables, caps[1].to_string());
    }
    for caps in JOIN_RE.captures_iter(&masked) {
        let table = caps[2].to_string();
        push_unique(&mut out.tables, table.clone());
        let join_type = match caps.get(1).map(|m| m.as_str().to_uppercase()) {
            Some(t) if t.starts_with("LEFT") => JoinType::Left,
            Some(t) if t.starts_with("RIGHT") => JoinType::Right,
            Some(t) if t.starts_with("FULL") => JoinType::Full,
            Some(t) if t.starts_with("CROSS") => JoinType::Cross,
            _ => JoinType::Inner,
        };
        out.joins.push(JoinClause {
            join_type,
            left: out.tables.first().cloned().unwrap_or_default(),
            right: table,
            condition: None,
        });
    }

    if let Some(keyword_at) = find_keyword(&masked, "WHERE") {
        out.has_where = true;
        let clause_start = keyword_at + "WHERE ".len();
        let clause_end = ["GROUP", "ORDER", "LIMIT"]
            .iter()
            .filter_map(|kw| find_keyword(&masked[clause_start..], kw).map(|at| clause_start + at))
            .min()
            .unwrap_or(masked.len());
        let where_clause = &masked[clause_start..clause_end];
        let original_clause = &sql[clause_start..clause_end];
        collect_fallback_predicates(
            &mut out,
            where_clause,
            original_clause,
            count_placeholders(&masked[..clause_start]),
        );
    }

    if let Some(caps) = GROUP_BY_RE.captures(&masked) {
        out.group_by = caps[1]
            .split(',')
            .map(|c| c.trim().trim_matches('`').trim_matches('"').to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }
    out.order_by = extract_order_by(&masked);
    out.limit = extract_limit(&masked);
    out.select_star = masked.to_uppercase().contains("SELECT *");
    out.distinct = masked.to_uppercase().contains("DISTINCT");

    out
}

/// ORDER BY extraction shared with the structured pass. The last occurrence
/// wins so ORDER BY clauses inside OVER(...) or subqueries don't shadow the
/// statement-level one; inner fragments fail the anchored item pattern and
/// drop out.
pub fn extract_order_by(sql: &str) -> Vec<OrderByColumn> {
    let masked = mask_literals(sql);
    let Some(caps) = ORDER_BY_RE.captures_iter(&masked).last() else {
        return Vec::new();
    };
    caps[1]
        .split(',')
        .filter_map(|item| {
            let item = item.trim();
            ORDER_ITEM_RE.captures(item).map(|c| OrderByColumn {
                column: c[1]
                    .rsplit('.')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                desc: c
                    .get(2)
                    .map(|d| d.as_str().eq_ignore_ascii_case("DESC"))
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// LIMIT extraction shared with the structured pass. Handles `LIMIT n`,
/// MySQL `LIMIT off, n`, and `LIMIT n OFFSET off`.
pub fn extract_limit(sql: &str) -> Option<LimitInfo> {
    let masked = mask_literals(sql);
    let caps = LIMIT_RE.captures_iter(&masked).last()?;
    let first: u64 = caps[1].parse().ok()?;
    if let Some(count) = caps.get(2) {
        return Some(LimitInfo {
            count: count.as_str().parse().ok()?,
            offset: Some(first),
        });
    }
    let offset = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some(LimitInfo {
        count: first,
        offset,
    })
}

fn collect_fallback_predicates(
    out: &mut AnalyzedStatement,
    masked_clause: &str,
    original_clause: &str,
    placeholders_before: usize,
) {
    let mut seen_spans = Vec::new();
    for caps in IN_PREDICATE_RE.captures_iter(masked_clause) {
        let whole = caps.get(0).unwrap();
        seen_spans.push((whole.start(), whole.end()));
        let column = caps[1].to_string();
        let original_list = &original_clause[caps.get(2).unwrap().range()];
        let base = placeholders_before + count_placeholders(&masked_clause[..whole.start()]);
        let mut offset = 0usize;
        let values: Vec<PredicateValue> = original_list
            .split(',')
            .filter_map(|item| {
                let item = item.trim();
                if item == "?" {
                    let value = PredicateValue::Parameter(base + offset);
                    offset += 1;
                    Some(value)
                } else {
                    literal_value(item).map(PredicateValue::Literal)
                }
            })
            .collect();
        if !values.is_empty() {
            out.predicates.push(Predicate {
                column,
                op: PredicateOp::In,
                value: PredicateValue::List(values),
            });
        }
    }
    for caps in EQ_PREDICATE_RE.captures_iter(masked_clause) {
        let whole = caps.get(0).unwrap();
        if seen_spans
            .iter()
            .any(|(start, end)| whole.start() >= *start && whole.start() < *end)
        {
            continue;
        }
        let column = caps[1].to_string();
        let raw = &original_clause[caps.get(2).unwrap().range()];
        let value = if raw == "?" {
            PredicateValue::Parameter(
                placeholders_before + count_placeholders(&masked_clause[..caps.get(2).unwrap().start()]),
            )
        } else {
            match literal_value(raw) {
                Some(value) => PredicateValue::Literal(value),
                None => continue,
            }
        };
        push_unique(&mut out.columns, column.clone());
        out.predicates.push(Predicate {
            column,
            op: PredicateOp::Eq,
            value,
        });
    }
}

fn literal_value(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Some(text) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Some(Value::Text(text.to_string()));
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Some(Value::Int(v));
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Some(Value::Float(v));
    }
    None
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

/// Replace string literal contents with spaces so clause regexes cannot
/// match inside them. Byte positions are preserved so spans computed on the
/// masked text index straight into the original.
fn mask_literals(sql: &str) -> String {
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

fn count_placeholders(masked: &str) -> usize {
    masked.matches('?').count()
}

/// Start index of the first word-boundary occurrence of `keyword`.
fn find_keyword(masked: &str, keyword: &str) -> Option<usize> {
    let upper = masked.to_ascii_uppercase();
    let needle = format!("{keyword} ");
    let mut from = 0;
    while let Some(at) = upper[from..].find(&needle) {
        let absolute = from + at;
        let boundary_ok = absolute == 0
            || !upper.as_bytes()[absolute - 1].is_ascii_alphanumeric();
        if boundary_ok {
            return Some(absolute);
        }
        from = absolute + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_extraction() {
        let out = extract(
            "SELECT * FROM t_order WHERE user_id = ? AND order_id = 1001 ORDER BY created_at DESC LIMIT 10",
            StatementKind::Select,
        );
        assert!(out.from_fallback);
        assert_eq!(out.tables, vec!["t_order"]);
        assert!(out.has_where);
        assert_eq!(out.predicates.len(), 2);
        assert_eq!(out.predicates[0].column, "user_id");
        assert_eq!(out.predicates[0].value, PredicateValue::Parameter(0));
        assert_eq!(
            out.predicates[1].value,
            PredicateValue::Literal(Value::Int(1001))
        );
        assert_eq!(out.order_by.len(), 1);
        assert!(out.order_by[0].desc);
        assert_eq!(out.limit, Some(LimitInfo { count: 10, offset: None }));
    }

    #[test]
    fn test_insert_extraction() {
        let out = extract(
            "INSERT INTO t_order (user_id, amount) VALUES (?, ?)",
            StatementKind::Insert,
        );
        assert_eq!(out.tables, vec!["t_order"]);
        let insert = out.insert.expect("insert shape");
        assert_eq!(insert.columns, vec!["user_id", "amount"]);
        assert!(!insert.is_insert_select);
    }

    #[test]
    fn test_join_extraction() {
        let out = extract(
            "SELECT a.x FROM t_order a LEFT JOIN t_user b ON a.uid = b.id",
            StatementKind::Select,
        );
        assert!(out.tables.contains(&"t_order".to_string()));
        assert!(out.tables.contains(&"t_user".to_string()));
        assert_eq!(out.joins.len(), 1);
        assert_eq!(out.joins[0].join_type, JoinType::Left);
    }

    #[test]
    fn test_in_list_extraction() {
        let out = extract(
            "SELECT * FROM t_order WHERE order_id IN (1, 2, 3)",
            StatementKind::Select,
        );
        assert_eq!(out.predicates.len(), 1);
        assert_eq!(out.predicates[0].op, PredicateOp::In);
        match &out.predicates[0].value {
            PredicateValue::List(values) => assert_eq!(values.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_literals_do_not_confuse_clauses() {
        let out = extract(
            "SELECT * FROM t_order WHERE note = 'ORDER BY trap LIMIT 5'",
            StatementKind::Select,
        );
        assert!(out.order_by.is_empty());
        assert!(out.limit.is_none());
    }

    #[test]
    fn test_mysql_limit_offset_form() {
        assert_eq!(
            extract_limit("SELECT * FROM t LIMIT 20, 10"),
            Some(LimitInfo {
                count: 10,
                offset: Some(20)
            })
        );
        assert_eq!(
            extract_limit("SELECT * FROM t LIMIT 10 OFFSET 20"),
            Some(LimitInfo {
                count: 10,
                offset: Some(20)
            })
        );
    }

    #[test]
    fn test_placeholder_positions_skip_earlier_parameters() {
        let out = extract(
            "UPDATE t_order SET amount = ? WHERE order_id = ?",
            StatementKind::Update,
        );
        let predicate = out
            .predicates
            .iter()
            .find(|p| p.column == "order_id")
            .expect("order_id predicate");
        assert_eq!(predicate.value, PredicateValue::Parameter(1));
    }
}
