use crate::RouteError;

/// A `{datasource, physical table}` pair enumerated from a table rule's
/// template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }
}

/// Expand `ds_pattern.table_pattern` into the Cartesian product of both
/// sides, in template order (range/list index order, datasource major).
pub fn parse_actual_data_nodes(template: &str) -> Result<Vec<DataNode>, RouteError> {
    let (ds_pattern, table_pattern) = split_template(template)?;
    let data_sources = expand_pattern(&ds_pattern)?;
    let tables = expand_pattern(&table_pattern)?;
    let mut nodes = Vec::with_capacity(data_sources.len() * tables.len());
    for ds in &data_sources {
        for table in &tables {
            nodes.push(DataNode::new(ds.clone(), table.clone()));
        }
    }
    Ok(nodes)
}

/// Split on the single top-level dot; dots inside `${...}` do not count.
fn split_template(template: &str) -> Result<(String, String), RouteError> {
    let mut depth = 0usize;
    let mut split_at = None;
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '$' if chars.get(i + 1) == Some(&'{') => {
                depth += 1;
                i += 1;
            }
            '}' if depth > 0 => depth -= 1,
            '.' if depth == 0 => {
                if split_at.is_some() {
                    return Err(RouteError::InvalidTemplate(template.to_string()));
                }
                split_at = Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    let at = split_at.ok_or_else(|| RouteError::InvalidTemplate(template.to_string()))?;
    let ds: String = chars[..at].iter().collect();
    let table: String = chars[at + 1..].iter().collect();
    if ds.is_empty() || table.is_empty() {
        return Err(RouteError::InvalidTemplate(template.to_string()));
    }
    Ok((ds, table))
}

/// Expand a pattern containing at most one brace expression:
/// `${a..b}` inclusive integer range, `${[x,y,z]}` explicit list, or a plain
/// literal.
fn expand_pattern(pattern: &str) -> Result<Vec<String>, RouteError> {
    let Some(open) = pattern.find("${") else {
        return Ok(vec![pattern.to_string()]);
    };
    let Some(close_rel) = pattern[open..].find('}') else {
        return Err(RouteError::InvalidRange(pattern.to_string()));
    };
    let close = open + close_rel;
    let prefix = &pattern[..open];
    let body = &pattern[open + 2..close];
    let suffix = &pattern[close + 1..];

    let expansions = if let Some(list) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        list.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
    } else if let Some((lo, hi)) = body.split_once("..") {
        let lo: i64 = lo
            .trim()
            .parse()
            .map_err(|_| RouteError::InvalidRange(pattern.to_string()))?;
        let hi: i64 = hi
            .trim()
            .parse()
            .map_err(|_| RouteError::InvalidRange(pattern.to_string()))?;
        if hi < lo {
            return Err(RouteError::InvalidRange(pattern.to_string()));
        }
        (lo..=hi).map(|v| v.to_string()).collect()
    } else {
        return Err(RouteError::InvalidRange(pattern.to_string()));
    };

    if expansions.is_empty() {
        return Err(RouteError::InvalidRange(pattern.to_string()));
    }
    Ok(expansions
        .into_iter()
        .map(|item| format!("{prefix}{item}{suffix}"))
        .collect())
}
