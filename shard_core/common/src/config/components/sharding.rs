use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    #[default]
    Inline,
}

/// Sharding strategy: a column plus an inline expression over it, e.g.
/// `ds_${user_id % 2}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub sharding_column: String,
    pub algorithm_expression: String,
    #[serde(rename = "type", default)]
    pub strategy_type: StrategyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyGeneratorType {
    Snowflake,
    Uuid,
    Increment,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGeneratorConfig {
    pub column: String,
    #[serde(rename = "type")]
    pub generator_type: KeyGeneratorType,
    // snowflake
    #[serde(default)]
    pub worker_id: Option<i64>,
    #[serde(default)]
    pub datacenter_id: Option<i64>,
    // increment
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub step: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRuleConfig {
    /// Defaults to the map key under `tables` when absent.
    #[serde(default)]
    pub logical_table: Option<String>,
    pub actual_data_nodes: String,
    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub key_generator: Option<KeyGeneratorConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShardingRuleConfig {
    #[serde(default)]
    pub tables: HashMap<String, TableRuleConfig>,
    #[serde(default)]
    pub default_database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub default_table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub default_key_generator: Option<KeyGeneratorConfig>,
}
