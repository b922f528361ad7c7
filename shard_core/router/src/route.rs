use crate::inline::evaluate_inline;
use crate::node::{parse_actual_data_nodes, DataNode};
use crate::RouteError;
use common::config::components::sharding::{KeyGeneratorConfig, StrategyConfig};
use common::config::ShardingConfig;
use common::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Sharding values extracted from a statement: column name to the concrete
/// values seen for it. IN-lists contribute multiple values per column.
pub type ShardingValues = HashMap<String, Vec<Value>>;

/// A fully-resolved rule for one logical table.
#[derive(Debug, Clone)]
pub struct TableRule {
    pub logical_table: String,
    pub nodes: Vec<DataNode>,
    pub db_strategy: Option<StrategyConfig>,
    pub table_strategy: Option<StrategyConfig>,
    pub key_generator: Option<KeyGeneratorConfig>,
}

/// Computes the route set for each statement: logical table + sharding
/// values in, ordered deduplicated data nodes out. Pure once built.
#[derive(Debug, Clone)]
pub struct Router {
    rules: HashMap<String, TableRule>,
}

impl Router {
    pub fn new(config: &ShardingConfig) -> Result<Self, RouteError> {
        let defaults = &config.sharding_rule;
        let mut rules = HashMap::new();
        for (key, rule_config) in &config.sharding_rule.tables {
            let logical_table = rule_config
                .logical_table
                .clone()
                .unwrap_or_else(|| key.clone());
            let nodes = parse_actual_data_nodes(&rule_config.actual_data_nodes)?;
            rules.insert(
                logical_table.clone(),
                TableRule {
                    logical_table,
                    nodes,
                    db_strategy: rule_config
                        .database_strategy
                        .clone()
                        .or_else(|| defaults.default_database_strategy.clone()),
                    table_strategy: rule_config
                        .table_strategy
                        .clone()
                        .or_else(|| defaults.default_table_strategy.clone()),
                    key_generator: rule_config
                        .key_generator
                        .clone()
                        .or_else(|| defaults.default_key_generator.clone()),
                },
            );
        }
        Ok(Self { rules })
    }

    pub fn rule(&self, logical_table: &str) -> Option<&TableRule> {
        self.rules.get(logical_table)
    }

    pub fn is_sharded(&self, logical_table: &str) -> bool {
        self.rules.contains_key(logical_table)
    }

    /// Route one logical table.
    ///
    /// Empty sharding values broadcast to every enumerated node. Otherwise
    /// each strategy narrows its side, and the candidate pairs are
    /// intersected with the enumerated node set so combinations the template
    /// never declared are dropped.
    pub fn route(
        &self,
        logical_table: &str,
        values: &ShardingValues,
    ) -> Result<Vec<DataNode>, RouteError> {
        let rule = self
            .rules
            .get(logical_table)
            .ok_or_else(|| RouteError::UnknownTable(logical_table.to_string()))?;

        if values.is_empty() {
            return Ok(rule.nodes.clone());
        }

        let ds_candidates = strategy_candidates(rule.db_strategy.as_ref(), values)?;
        let table_candidates = strategy_candidates(rule.table_strategy.as_ref(), values)?;

        let mut routed = Vec::new();
        let mut seen = HashSet::new();
        for node in &rule.nodes {
            if let Some(allowed) = &ds_candidates {
                if !allowed.contains(&node.data_source) {
                    continue;
                }
            }
            if let Some(allowed) = &table_candidates {
                if !allowed.contains(&node.table) {
                    continue;
                }
            }
            if seen.insert(node.clone()) {
                routed.push(node.clone());
            }
        }

        if routed.is_empty() {
            return Err(RouteError::NoRoute {
                table: logical_table.to_string(),
            });
        }
        debug!(
            table = logical_table,
            routes = routed.len(),
            "computed route set"
        );
        Ok(routed)
    }
}

/// Evaluate a strategy against the value map. `None` means the strategy does
/// not narrow this side (absent strategy, or no value for its column).
fn strategy_candidates(
    strategy: Option<&StrategyConfig>,
    values: &ShardingValues,
) -> Result<Option<HashSet<String>>, RouteError> {
    let Some(strategy) = strategy else {
        return Ok(None);
    };
    let Some(column_values) = values.get(&strategy.sharding_column) else {
        return Ok(None);
    };
    if column_values.is_empty() {
        return Ok(None);
    }
    let mut candidates = HashSet::new();
    for value in column_values {
        candidates.insert(evaluate_inline(
            &strategy.algorithm_expression,
            &strategy.sharding_column,
            value,
        )?);
    }
    Ok(Some(candidates))
}
