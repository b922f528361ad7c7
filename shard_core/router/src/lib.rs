pub mod inline;
pub mod node;
pub mod route;

use thiserror::Error;

pub use inline::evaluate_inline;
pub use node::{parse_actual_data_nodes, DataNode};
pub use route::{Router, ShardingValues, TableRule};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unknown logical table `{0}`")]
    UnknownTable(String),
    #[error("no route for table `{table}` with the supplied sharding values")]
    NoRoute { table: String },
    #[error("invalid data node template `{0}`: expected `datasource.table` with one top-level dot")]
    InvalidTemplate(String),
    #[error("invalid range expression `{0}`")]
    InvalidRange(String),
    #[error("unsupported sharding value for column `{column}`: {value}")]
    UnsupportedShardingValue { column: String, value: String },
}
