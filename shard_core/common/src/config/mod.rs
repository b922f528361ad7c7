pub mod components;
pub mod error;
pub mod loader;

use crate::dialect::DialectRegistry;
use components::datasource::DataSourceConfig;
use components::parser::ParserConfig;
use components::readwrite::ReadWriteSplitConfig;
use components::sharding::ShardingRuleConfig;
use error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;

/// The validated configuration record the whole middleware is built from.
/// Created once at startup; immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingConfig {
    pub data_sources: HashMap<String, DataSourceConfig>,
    #[serde(default)]
    pub read_write_splits: HashMap<String, ReadWriteSplitConfig>,
    #[serde(default)]
    pub sharding_rule: ShardingRuleConfig,
    #[serde(default)]
    pub parser: Option<ParserConfig>,
}

impl ShardingConfig {
    /// Fail-fast validation run by the loader before anything is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_sources.is_empty() {
            return Err(ConfigError::NoDataSources);
        }
        let registry = DialectRegistry::new();
        for (name, ds) in &self.data_sources {
            if ds.driver_name.trim().is_empty() {
                return Err(ConfigError::InvalidDataSource {
                    name: name.clone(),
                    reason: "empty driverName".to_string(),
                });
            }
            if ds.url.trim().is_empty() {
                return Err(ConfigError::InvalidDataSource {
                    name: name.clone(),
                    reason: "empty url".to_string(),
                });
            }
            registry.dialect_for_driver(&ds.driver_name)?;
        }
        for (split_name, split) in &self.read_write_splits {
            if !self.data_sources.contains_key(&split.master_data_source) {
                return Err(ConfigError::UnknownDataSource {
                    split: split_name.clone(),
                    data_source: split.master_data_source.clone(),
                });
            }
            for slave in &split.slave_data_sources {
                if !self.data_sources.contains_key(slave) {
                    return Err(ConfigError::UnknownDataSource {
                        split: split_name.clone(),
                        data_source: slave.clone(),
                    });
                }
            }
        }
        for (key, rule) in &self.sharding_rule.tables {
            if rule.actual_data_nodes.trim().is_empty() {
                return Err(ConfigError::EmptyDataNodes { table: key.clone() });
            }
        }
        Ok(())
    }

    pub fn parser_config(&self) -> ParserConfig {
        self.parser.clone().unwrap_or_default().overlay_env()
    }
}
