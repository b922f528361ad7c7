use crate::compare::compare_values;
use crate::{MergeContext, MergeError};
use common::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Detect aggregates from the result column names themselves: un-aliased
/// aggregate projections surface as `COUNT(*)`, `SUM(amount)` and so on.
/// Executor-supplied aliases (from the analyzed projection) are merged on
/// top by the caller.
pub fn detect_aggregates(columns: &[String]) -> HashMap<String, AggregateKind> {
    let mut detected = HashMap::new();
    for column in columns {
        let upper = column.to_uppercase();
        let kind = if upper.contains("COUNT(") {
            Some(AggregateKind::Count)
        } else if upper.contains("SUM(") {
            Some(AggregateKind::Sum)
        } else if upper.contains("AVG(") {
            Some(AggregateKind::Avg)
        } else if upper.contains("MIN(") {
            Some(AggregateKind::Min)
        } else if upper.contains("MAX(") {
            Some(AggregateKind::Max)
        } else {
            None
        };
        if let Some(kind) = kind {
            detected.insert(column.clone(), kind);
        }
    }
    detected
}

/// Partition rows by the group-key tuple and collapse each partition into
/// one output row, recomputing aggregate columns. An empty group-by list
/// collapses everything into a single group.
pub fn group_rows(
    columns: &[String],
    rows: Vec<Vec<Value>>,
    ctx: &MergeContext,
    aggregates: &HashMap<String, AggregateKind>,
) -> Result<Vec<Vec<Value>>, MergeError> {
    let mut key_indices = Vec::with_capacity(ctx.group_by.len());
    for group_column in &ctx.group_by {
        let idx = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(group_column))
            .ok_or_else(|| MergeError::UnknownColumn(group_column.clone()))?;
        key_indices.push(idx);
    }

    let avg_weights = avg_weight_indices(columns, ctx, aggregates);

    // Insertion-ordered partitions keep output deterministic.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Vec<Value>>> = HashMap::new();
    for row in rows {
        let key = key_indices
            .iter()
            .map(|idx| row[*idx].to_string())
            .collect::<Vec<_>>()
            .join("|");
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let members = groups.remove(&key).unwrap_or_default();
        out.push(collapse_group(columns, members, aggregates, &avg_weights));
    }
    Ok(out)
}

/// Resolve the count column backing each average column: the explicit pair
/// from the merge context, else the lone COUNT column of the result set.
fn avg_weight_indices(
    columns: &[String],
    ctx: &MergeContext,
    aggregates: &HashMap<String, AggregateKind>,
) -> HashMap<String, usize> {
    let count_indices: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| aggregates.get(*c) == Some(&AggregateKind::Count))
        .map(|(idx, _)| idx)
        .collect();

    let mut weights = HashMap::new();
    for column in columns {
        if aggregates.get(column) != Some(&AggregateKind::Avg) {
            continue;
        }
        let paired = ctx
            .avg_pairs
            .iter()
            .find(|p| p.avg_column.eq_ignore_ascii_case(column))
            .and_then(|p| {
                columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(&p.count_column))
            });
        let weight = paired.or(match count_indices.as_slice() {
            [only] => Some(*only),
            _ => None,
        });
        if let Some(weight) = weight {
            weights.insert(column.clone(), weight);
        }
    }
    weights
}

/// First row wins for plain columns; aggregate columns are recomputed over
/// the whole partition.
fn collapse_group(
    columns: &[String],
    members: Vec<Vec<Value>>,
    aggregates: &HashMap<String, AggregateKind>,
    avg_weights: &HashMap<String, usize>,
) -> Vec<Value> {
    let mut row = members[0].clone();
    for (idx, column) in columns.iter().enumerate() {
        let Some(kind) = aggregates.get(column) else {
            continue;
        };
        row[idx] = match (*kind, avg_weights.get(column)) {
            (AggregateKind::Avg, Some(weight_idx)) => {
                weighted_average(&members, idx, *weight_idx)
            }
            _ => recompute(*kind, members.iter().map(|m| &m[idx])),
        };
    }
    row
}

/// Count-weighted combination of per-shard partial averages: each cell
/// contributes avg * rows, the total divides by the summed row count.
fn weighted_average(members: &[Vec<Value>], avg_idx: usize, weight_idx: usize) -> Value {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for member in members {
        let (Some(avg), Some(weight)) = (member[avg_idx].as_f64(), member[weight_idx].as_f64())
        else {
            continue;
        };
        if weight > 0.0 {
            weighted_sum += avg * weight;
            total_weight += weight;
        }
    }
    if total_weight > 0.0 {
        Value::Float(weighted_sum / total_weight)
    } else {
        Value::Null
    }
}

fn recompute<'a>(kind: AggregateKind, cells: impl Iterator<Item = &'a Value>) -> Value {
    match kind {
        AggregateKind::Count | AggregateKind::Sum => {
            // Per-shard COUNTs sum to the global count.
            let mut total = 0.0;
            let mut integral = true;
            for cell in cells {
                if let Some(v) = cell.as_f64() {
                    total += v;
                    integral &= v.fract() == 0.0;
                }
            }
            if integral {
                Value::Int(total as i64)
            } else {
                Value::Float(total)
            }
        }
        AggregateKind::Avg => {
            // Last resort when no row-count column accompanies the average;
            // multi-shard plans always pair one, so this only sees inputs
            // where every cell carries equal weight.
            let mut sum = 0.0;
            let mut count = 0usize;
            for cell in cells {
                if let Some(v) = cell.as_f64() {
                    sum += v;
                    count += 1;
                }
            }
            if count == 0 {
                Value::Null
            } else {
                Value::Float(sum / count as f64)
            }
        }
        AggregateKind::Min => cells
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateKind::Max => cells
            .max_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}
