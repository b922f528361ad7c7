use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration declares no data sources")]
    NoDataSources,
    #[error("data source `{name}`: {reason}")]
    InvalidDataSource { name: String, reason: String },
    #[error("read/write split `{split}` references unknown data source `{data_source}`")]
    UnknownDataSource { split: String, data_source: String },
    #[error("table rule `{table}` has empty actualDataNodes")]
    EmptyDataNodes { table: String },
    #[error("unsupported driver `{0}`")]
    UnsupportedDriver(String),
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("failed to read configuration: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
