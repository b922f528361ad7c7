use crate::ShardError;
use analyzer::{AnalyzedStatement, InsertCell, PredicateOp, PredicateValue};
use common::Value;
use keygen::KeyGenerator;
use merger::AvgPair;
use router::{ShardingValues, TableRule};
use std::collections::HashSet;
use tracing::warn;

/// Pull the sharding values a table rule cares about out of the analyzed
/// statement: equality and IN predicates over the rule's sharding columns,
/// resolved against positional parameters or inline literals, plus INSERT
/// column/value pairs.
pub fn sharding_values_for(
    rule: &TableRule,
    analyzed: &AnalyzedStatement,
    params: &[Value],
) -> ShardingValues {
    let mut relevant: HashSet<&str> = HashSet::new();
    if let Some(strategy) = &rule.db_strategy {
        relevant.insert(strategy.sharding_column.as_str());
    }
    if let Some(strategy) = &rule.table_strategy {
        relevant.insert(strategy.sharding_column.as_str());
    }

    let mut values = ShardingValues::new();
    let mut add = |column: &str, value: Value, values: &mut ShardingValues| {
        values
            .entry(column.to_string())
            .or_insert_with(Vec::new)
            .push(value);
    };

    for predicate in &analyzed.predicates {
        if !relevant.contains(predicate.column.as_str()) {
            continue;
        }
        if !matches!(predicate.op, PredicateOp::Eq | PredicateOp::In) {
            continue;
        }
        match &predicate.value {
            PredicateValue::Parameter(idx) => {
                if let Some(value) = params.get(*idx) {
                    add(&predicate.column, value.clone(), &mut values);
                }
            }
            PredicateValue::Literal(value) => {
                add(&predicate.column, value.clone(), &mut values);
            }
            PredicateValue::List(items) => {
                for item in items {
                    match item {
                        PredicateValue::Parameter(idx) => {
                            if let Some(value) = params.get(*idx) {
                                add(&predicate.column, value.clone(), &mut values);
                            }
                        }
                        PredicateValue::Literal(value) => {
                            add(&predicate.column, value.clone(), &mut values);
                        }
                        PredicateValue::List(_) => {}
                    }
                }
            }
        }
    }

    if let Some(insert) = &analyzed.insert {
        if insert.table == rule.logical_table {
            for row in &insert.rows {
                for (column, cell) in insert.columns.iter().zip(row.iter()) {
                    if !relevant.contains(column.as_str()) {
                        continue;
                    }
                    match cell {
                        InsertCell::Parameter(idx) => {
                            if let Some(value) = params.get(*idx) {
                                add(column, value.clone(), &mut values);
                            }
                        }
                        InsertCell::Literal(value) => add(column, value.clone(), &mut values),
                        InsertCell::Expression => {}
                    }
                }
            }
        }
    }

    values
}

/// Outcome of key injection on an INSERT.
pub struct InjectedInsert {
    pub sql: String,
    pub params: Vec<Value>,
    pub generated: Vec<i64>,
}

/// Splice a generated key into an INSERT: the column joins the explicit
/// column list, every VALUES row gains a trailing `?`, and the parameter
/// vector gains the generated ids at the matching positions. One id per row.
///
/// INSERTs without an explicit column list and INSERT...SELECT are passed
/// through untouched: without the list the splice position cannot be
/// trusted, and a SELECT source has no VALUES rows to extend.
pub fn inject_generated_key(
    sql: &str,
    analyzed: &AnalyzedStatement,
    params: &[Value],
    column: &str,
    generator: &dyn KeyGenerator,
) -> Result<Option<InjectedInsert>, ShardError> {
    let Some(insert) = &analyzed.insert else {
        return Ok(None);
    };
    if insert.is_insert_select {
        warn!(table = %insert.table, "key generation skipped for INSERT ... SELECT");
        return Ok(None);
    }
    if insert.columns.is_empty() {
        warn!(table = %insert.table, "key generation skipped: no explicit column list");
        return Ok(None);
    }
    if insert.columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
        // Caller already supplies the key column.
        return Ok(None);
    }
    if insert.values_rows == 0 {
        return Ok(None);
    }

    let Some(spliced) = splice_column_and_markers(sql, column, insert.values_rows) else {
        warn!(table = %insert.table, "key generation skipped: VALUES shape not recognized");
        return Ok(None);
    };

    let mut generated = Vec::with_capacity(insert.values_rows);
    for _ in 0..insert.values_rows {
        generated.push(generator.next_id()?);
    }

    // The new `?` sits at the end of each row, so its parameter position is
    // the count of original placeholders up to and including that row, plus
    // the ids already inserted for earlier rows.
    let mut new_params = params.to_vec();
    let mut cumulative = 0usize;
    for (row_idx, generated_id) in generated.iter().enumerate() {
        cumulative += insert
            .placeholders_per_row
            .get(row_idx)
            .copied()
            .unwrap_or(0);
        let position = (cumulative + row_idx).min(new_params.len());
        new_params.insert(position, Value::Int(*generated_id));
    }

    Ok(Some(InjectedInsert {
        sql: spliced,
        params: new_params,
        generated,
    }))
}

/// Textual splice: `", <column>"` before the column list's closing paren and
/// `", ?"` before each top-level VALUES group's closing paren. Returns None
/// when the statement does not look like `INSERT INTO t (cols) VALUES (...)`.
fn splice_column_and_markers(sql: &str, column: &str, expected_rows: usize) -> Option<String> {
    let masked = mask(sql);
    let values_at = find_values_keyword(&masked)?;

    // Column list: the first top-level parenthesized group before VALUES.
    let open = masked[..values_at].find('(')?;
    let close = matching_paren(&masked, open)?;
    if close > values_at {
        return None;
    }

    let mut insertions: Vec<(usize, String)> = vec![(close, format!(", {column}"))];

    // Each top-level group after VALUES is one row.
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    let mut rows = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(values_at) {
        match b {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    insertions.push((idx, ", ?".to_string()));
                    rows += 1;
                }
            }
            _ => {}
        }
    }
    if rows != expected_rows {
        return None;
    }

    insertions.sort_by_key(|(at, _)| *at);
    let mut out = String::with_capacity(sql.len() + insertions.len() * 8);
    let mut last = 0usize;
    for (at, text) in insertions {
        out.push_str(&sql[last..at]);
        out.push_str(&text);
        last = at;
    }
    out.push_str(&sql[last..]);
    Some(out)
}

/// Pair every statement-level `AVG(...)` projection with a derived
/// `COUNT(...)` helper column so the merger can weight partial averages by
/// their shard row counts. Returns the augmented SQL and the pairing;
/// None when the projection carries no eligible average.
///
/// Window averages (`AVG(x) OVER ...`) and averages nested inside other
/// expressions are left alone.
pub fn derive_avg_weights(sql: &str) -> Option<(String, Vec<AvgPair>)> {
    let masked = mask(sql);
    let select_at = find_top_level_keyword(&masked, 0, "SELECT")?;
    let projection_start = select_at + "SELECT".len();
    let from_at = find_top_level_keyword(&masked, projection_start, "FROM")?;

    let bytes = masked.as_bytes();
    let mut pairs = Vec::new();
    let mut helpers = String::new();
    let mut depth = 0usize;
    let mut i = projection_start;
    while i < from_at {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'A' | b'a' if depth == 0 && is_word_at(&masked, i, "AVG") => {
                let mut open = i + 3;
                while open < from_at && bytes[open].is_ascii_whitespace() {
                    open += 1;
                }
                if open >= from_at || bytes[open] != b'(' {
                    i += 3;
                    continue;
                }
                let Some(close) = matching_paren(&masked, open) else {
                    return None;
                };
                if close >= from_at {
                    i = open + 1;
                    continue;
                }
                let after = skip_whitespace(bytes, close + 1);
                if is_word_at(&masked, after, "OVER") {
                    i = close + 1;
                    continue;
                }
                let inner = sql[open + 1..close].trim().to_string();
                let avg_column = match capture_alias(&masked, sql, close + 1) {
                    Some(alias) => alias,
                    None => format!("AVG({inner})"),
                };
                let count_column = format!("AVG_WEIGHT_{}", pairs.len());
                helpers.push_str(&format!(", COUNT({inner}) AS {count_column} "));
                pairs.push(AvgPair {
                    avg_column,
                    count_column,
                    drop_count_column: true,
                });
                i = close + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    if pairs.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(sql.len() + helpers.len());
    out.push_str(sql[..from_at].trim_end());
    out.push_str(&helpers);
    out.push_str(&sql[from_at..]);
    Some((out, pairs))
}

/// Replace the statement-level LIMIT/OFFSET clause with `LIMIT <pushdown>`
/// so each shard returns enough rows for the merger to compute the global
/// window itself. LIMITs inside parenthesized subqueries are untouched.
pub fn push_down_limit(sql: &str, pushdown: u64) -> Option<String> {
    let masked = mask(sql);
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    let mut limit_at = None;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'L' | b'l' if depth == 0 && is_word_at(&masked, i, "LIMIT") => {
                limit_at = Some(i);
            }
            _ => {}
        }
    }
    let start = limit_at?;
    let end = limit_clause_end(&masked, start)?;
    Some(format!("{}LIMIT {pushdown}{}", &sql[..start], &sql[end..]))
}

/// End of the clause starting at `LIMIT`: `LIMIT n`, MySQL `LIMIT m, n`, or
/// `LIMIT n OFFSET m`.
fn limit_clause_end(masked: &str, start: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut i = skip_whitespace(bytes, start + "LIMIT".len());
    i = read_digits(bytes, i)?;
    let after_count = i;
    let j = skip_whitespace(bytes, i);
    if j < bytes.len() && bytes[j] == b',' {
        let k = skip_whitespace(bytes, j + 1);
        return read_digits(bytes, k).or(Some(after_count));
    }
    if is_word_at(masked, j, "OFFSET") {
        let k = skip_whitespace(bytes, j + "OFFSET".len());
        if let Some(end) = read_digits(bytes, k) {
            return Some(end);
        }
    }
    Some(after_count)
}

fn capture_alias(masked: &str, sql: &str, at: usize) -> Option<String> {
    let bytes = masked.as_bytes();
    let mut i = skip_whitespace(bytes, at);
    if !is_word_at(masked, i, "AS") {
        return None;
    }
    i = skip_whitespace(bytes, i + 2);
    let start = i;
    while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
    {
        i += 1;
    }
    if i == start {
        return None;
    }
    Some(sql[start..i].to_string())
}

fn find_top_level_keyword(masked: &str, from: usize, keyword: &str) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for i in from..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 && is_word_at(masked, i, keyword) {
                    return Some(i);
                }
            }
        }
    }
    None
}

fn is_word_at(masked: &str, at: usize, word: &str) -> bool {
    let bytes = masked.as_bytes();
    if at + word.len() > bytes.len() {
        return false;
    }
    if !masked[at..at + word.len()].eq_ignore_ascii_case(word) {
        return false;
    }
    let before_ok =
        at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
    let after = bytes.get(at + word.len());
    let after_ok = !matches!(after, Some(b) if b.is_ascii_alphanumeric() || *b == b'_');
    before_ok && after_ok
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// At least one digit starting at `i`; returns the index after the run.
fn read_digits(bytes: &[u8], i: usize) -> Option<usize> {
    let mut end = i;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == i {
        None
    } else {
        Some(end)
    }
}

fn find_values_keyword(masked: &str) -> Option<usize> {
    let upper = masked.to_ascii_uppercase();
    let mut from = 0;
    while let Some(at) = upper[from..].find("VALUES") {
        let absolute = from + at;
        let before_ok =
            absolute == 0 || !upper.as_bytes()[absolute - 1].is_ascii_alphanumeric();
        let after = upper.as_bytes().get(absolute + 6);
        let after_ok = !matches!(after, Some(b) if b.is_ascii_alphanumeric() || *b == b'_');
        if before_ok && after_ok {
            return Some(absolute);
        }
        from = absolute + 1;
    }
    None
}

fn matching_paren(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
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
