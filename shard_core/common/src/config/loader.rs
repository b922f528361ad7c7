use crate::config::error::ConfigError;
use crate::config::ShardingConfig;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Load and validate a sharding configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ShardingConfig, ConfigError> {
    let file = fs::File::open(path)?;
    from_reader(file)
}

/// Load and validate from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<ShardingConfig, ConfigError> {
    let config: ShardingConfig = serde_yaml::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate from an in-memory YAML string.
pub fn from_yaml_str(yaml: &str) -> Result<ShardingConfig, ConfigError> {
    let config: ShardingConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
