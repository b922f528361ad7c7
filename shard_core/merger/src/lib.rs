pub mod compare;
pub mod group;

use common::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

pub use compare::compare_values;
pub use group::{detect_aggregates, AggregateKind};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("shard result schema mismatch: expected columns {expected:?}, got {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },
    #[error("scan error from shard `{shard}`: {message}")]
    Scan { shard: String, message: String },
    #[error("merge references unknown column `{0}`")]
    UnknownColumn(String),
}

/// Rows drained from one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardRows {
    pub shard: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByKey {
    pub column: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    pub offset: u64,
    pub count: u64,
}

/// Pairs an average column with the column carrying its per-shard row
/// count, so the merge can weight partial averages instead of averaging
/// them. The executor derives a `COUNT(...)` helper per AVG on multi-shard
/// plans and marks it for removal from the merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvgPair {
    pub avg_column: String,
    pub count_column: String,
    pub drop_count_column: bool,
}

/// How to reassemble multi-shard results: ordering keys, grouping columns,
/// limit window, any aggregate aliases the analyzer resolved (e.g.
/// `c` -> COUNT for `SELECT COUNT(*) AS c`), and the count pairing for
/// average columns.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    pub order_by: Vec<OrderByKey>,
    pub group_by: Vec<String>,
    pub limit: Option<LimitSpec>,
    pub aggregate_aliases: HashMap<String, AggregateKind>,
    pub avg_pairs: Vec<AvgPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Collect-and-sort merge: drain every shard, aggregate if requested, stable
/// sort by the ORDER BY keys, then trim to the limit window.
pub fn merge(sources: Vec<ShardRows>, ctx: &MergeContext) -> Result<MergedResult, MergeError> {
    let mut sources = sources.into_iter();
    let Some(first) = sources.next() else {
        return Ok(MergedResult {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };

    let mut columns = first.columns;
    let mut rows = first.rows;
    for source in sources {
        if source.columns != columns {
            return Err(MergeError::SchemaMismatch {
                expected: columns,
                got: source.columns,
            });
        }
        rows.extend(source.rows);
    }

    let mut aggregates = detect_aggregates(&columns);
    for (alias, kind) in &ctx.aggregate_aliases {
        aggregates.insert(alias.clone(), *kind);
    }
    for pair in &ctx.avg_pairs {
        aggregates.insert(pair.count_column.clone(), AggregateKind::Count);
    }

    if !ctx.group_by.is_empty() || !aggregates.is_empty() {
        rows = group::group_rows(&columns, rows, ctx, &aggregates)?;
    }

    // Helper count columns the executor synthesized for AVG weighting are
    // not part of the caller's projection.
    for pair in ctx.avg_pairs.iter().filter(|p| p.drop_count_column) {
        if let Some(idx) = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&pair.count_column))
        {
            columns.remove(idx);
            for row in &mut rows {
                if idx < row.len() {
                    row.remove(idx);
                }
            }
        }
    }

    if !ctx.order_by.is_empty() {
        let mut key_indices = Vec::with_capacity(ctx.order_by.len());
        for key in &ctx.order_by {
            let idx = columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&key.column))
                .ok_or_else(|| MergeError::UnknownColumn(key.column.clone()))?;
            key_indices.push((idx, key.desc));
        }
        rows.sort_by(|a, b| {
            for (idx, desc) in &key_indices {
                let ordering = compare_values(&a[*idx], &b[*idx]);
                let ordering = if *desc { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    if let Some(limit) = ctx.limit {
        let start = (limit.offset as usize).min(rows.len());
        let end = (limit.offset as usize)
            .saturating_add(limit.count as usize)
            .min(rows.len());
        rows = rows[start..end].to_vec();
    }

    Ok(MergedResult { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> ShardRows {
        ShardRows {
            shard: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_plain_concatenation() {
        let merged = merge(
            vec![
                shard("ds_0", &["id"], vec![vec![Value::Int(1)], vec![Value::Int(3)]]),
                shard("ds_1", &["id"], vec![vec![Value::Int(2)]]),
            ],
            &MergeContext::default(),
        )
        .expect("merge");
        assert_eq!(merged.rows.len(), 3);
    }

    #[test]
    fn test_schema_mismatch() {
        let err = merge(
            vec![
                shard("ds_0", &["id"], vec![]),
                shard("ds_1", &["id", "name"], vec![]),
            ],
            &MergeContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_order_by_across_shards() {
        let ctx = MergeContext {
            order_by: vec![OrderByKey {
                column: "id".to_string(),
                desc: false,
            }],
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard("ds_0", &["id"], vec![vec![Value::Int(3)], vec![Value::Int(1)]]),
                shard("ds_1", &["id"], vec![vec![Value::Int(2)]]),
            ],
            &ctx,
        )
        .expect("merge");
        let ids: Vec<i64> = merged
            .rows
            .iter()
            .map(|r| match r[0] {
                Value::Int(v) => v,
                _ => panic!("int expected"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_descending_and_stability() {
        let ctx = MergeContext {
            order_by: vec![OrderByKey {
                column: "k".to_string(),
                desc: true,
            }],
            ..Default::default()
        };
        // Tied keys keep per-shard arrival order (stable sort).
        let merged = merge(
            vec![
                shard(
                    "ds_0",
                    &["k", "tag"],
                    vec![
                        vec![Value::Int(1), Value::Text("first".into())],
                        vec![Value::Int(1), Value::Text("second".into())],
                    ],
                ),
                shard(
                    "ds_1",
                    &["k", "tag"],
                    vec![vec![Value::Int(2), Value::Text("top".into())]],
                ),
            ],
            &ctx,
        )
        .expect("merge");
        assert_eq!(merged.rows[0][1], Value::Text("top".into()));
        assert_eq!(merged.rows[1][1], Value::Text("first".into()));
        assert_eq!(merged.rows[2][1], Value::Text("second".into()));
    }

    #[test]
    fn test_broadcast_count_sums() {
        let mut aggregate_aliases = HashMap::new();
        aggregate_aliases.insert("c".to_string(), AggregateKind::Count);
        let ctx = MergeContext {
            aggregate_aliases,
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard("ds_0", &["c"], vec![vec![Value::Int(10)]]),
                shard("ds_1", &["c"], vec![vec![Value::Int(5)]]),
                shard("ds_2", &["c"], vec![vec![Value::Int(7)]]),
                shard("ds_3", &["c"], vec![vec![Value::Int(0)]]),
            ],
            &ctx,
        )
        .expect("merge");
        assert_eq!(merged.rows, vec![vec![Value::Int(22)]]);
    }

    #[test]
    fn test_weighted_average_across_shards() {
        // Shard A: 1 row averaging 10; shard B: 3 rows averaging 100.
        // The merged average weights by row count: 310 / 4 = 77.5, not the
        // naive mean 55.
        let mut aggregate_aliases = HashMap::new();
        aggregate_aliases.insert("a".to_string(), AggregateKind::Avg);
        let ctx = MergeContext {
            aggregate_aliases,
            avg_pairs: vec![AvgPair {
                avg_column: "a".to_string(),
                count_column: "n".to_string(),
                drop_count_column: true,
            }],
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard("ds_0", &["a", "n"], vec![vec![Value::Float(10.0), Value::Int(1)]]),
                shard("ds_1", &["a", "n"], vec![vec![Value::Float(100.0), Value::Int(3)]]),
            ],
            &ctx,
        )
        .expect("merge");
        assert_eq!(merged.columns, vec!["a"], "helper count column is dropped");
        assert_eq!(merged.rows, vec![vec![Value::Float(77.5)]]);
    }

    #[test]
    fn test_grouped_weighted_average() {
        let mut aggregate_aliases = HashMap::new();
        aggregate_aliases.insert("a".to_string(), AggregateKind::Avg);
        let ctx = MergeContext {
            group_by: vec!["user_id".to_string()],
            aggregate_aliases,
            avg_pairs: vec![AvgPair {
                avg_column: "a".to_string(),
                count_column: "n".to_string(),
                drop_count_column: true,
            }],
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard(
                    "ds_0",
                    &["user_id", "a", "n"],
                    vec![
                        vec![Value::Int(1), Value::Float(10.0), Value::Int(1)],
                        vec![Value::Int(2), Value::Float(4.0), Value::Int(2)],
                    ],
                ),
                shard(
                    "ds_1",
                    &["user_id", "a", "n"],
                    vec![vec![Value::Int(1), Value::Float(100.0), Value::Int(3)]],
                ),
            ],
            &ctx,
        )
        .expect("merge");
        assert_eq!(merged.columns, vec!["user_id", "a"]);
        assert_eq!(
            merged.rows,
            vec![
                vec![Value::Int(1), Value::Float(77.5)],
                vec![Value::Int(2), Value::Float(4.0)],
            ]
        );
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let ctx = MergeContext {
            group_by: vec!["user_id".to_string()],
            order_by: vec![OrderByKey {
                column: "user_id".to_string(),
                desc: false,
            }],
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard(
                    "ds_0",
                    &["user_id", "COUNT(*)", "MAX(amount)"],
                    vec![
                        vec![Value::Int(1), Value::Int(2), Value::Float(30.0)],
                        vec![Value::Int(2), Value::Int(1), Value::Float(10.0)],
                    ],
                ),
                shard(
                    "ds_1",
                    &["user_id", "COUNT(*)", "MAX(amount)"],
                    vec![vec![Value::Int(1), Value::Int(3), Value::Float(99.5)]],
                ),
            ],
            &ctx,
        )
        .expect("merge");
        assert_eq!(
            merged.rows,
            vec![
                vec![Value::Int(1), Value::Int(5), Value::Float(99.5)],
                vec![Value::Int(2), Value::Int(1), Value::Float(10.0)],
            ]
        );
    }

    #[test]
    fn test_limit_window() {
        let ctx = MergeContext {
            order_by: vec![OrderByKey {
                column: "id".to_string(),
                desc: false,
            }],
            limit: Some(LimitSpec { offset: 1, count: 2 }),
            ..Default::default()
        };
        let merged = merge(
            vec![
                shard("ds_0", &["id"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]),
                shard("ds_1", &["id"], vec![vec![Value::Int(3)], vec![Value::Int(4)]]),
            ],
            &ctx,
        )
        .expect("merge");
        let ids: Vec<Value> = merged.rows.into_iter().map(|mut r| r.remove(0)).collect();
        assert_eq!(ids, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_limit_offset_beyond_buffer() {
        let ctx = MergeContext {
            limit: Some(LimitSpec {
                offset: 10,
                count: 5,
            }),
            ..Default::default()
        };
        let merged = merge(
            vec![shard("ds_0", &["id"], vec![vec![Value::Int(1)]])],
            &ctx,
        )
        .expect("merge");
        assert!(merged.rows.is_empty());
    }

    #[test]
    fn test_disjoint_shards_bounded_by_limit() {
        let per_shard = 4;
        let shards: Vec<ShardRows> = (0..3)
            .map(|s| {
                shard(
                    &format!("ds_{s}"),
                    &["id"],
                    (0..per_shard)
                        .map(|i| vec![Value::Int((s * per_shard + i) as i64)])
                        .collect(),
                )
            })
            .collect();
        let ctx = MergeContext {
            limit: Some(LimitSpec {
                offset: 0,
                count: 100,
            }),
            ..Default::default()
        };
        let merged = merge(shards, &ctx).expect("merge");
        assert_eq!(merged.rows.len(), 3 * per_shard, "min(limit, n*k) rows");
    }
}
