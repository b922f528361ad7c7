pub mod memory;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;
use common::{Dialect, Value};
use thiserror::Error;

pub use memory::MemoryBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connect to `{data_source}` failed: {message}")]
    Connect { data_source: String, message: String },
    #[error("prepare on `{data_source}` failed: {message}")]
    Prepare { data_source: String, message: String },
    #[error("execute on `{data_source}` failed: {message}")]
    Execute { data_source: String, message: String },
    #[error("scan from `{data_source}` failed: {message}")]
    Scan { data_source: String, message: String },
    #[error("transaction control on `{data_source}` failed: {message}")]
    Transaction { data_source: String, message: String },
}

impl BackendError {
    pub fn data_source(&self) -> &str {
        match self {
            BackendError::Connect { data_source, .. }
            | BackendError::Prepare { data_source, .. }
            | BackendError::Execute { data_source, .. }
            | BackendError::Scan { data_source, .. }
            | BackendError::Transaction { data_source, .. } => data_source,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// One opened physical datasource. Implementations wrap a driver connection;
/// the pipeline never sees driver types.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome, BackendError>;

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, BackendError>;

    /// Session-level transaction control, used by the local and XA
    /// transaction paths.
    async fn begin(&self) -> Result<(), BackendError> {
        self.exec("BEGIN", &[]).await.map(|_| ())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.exec("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.exec("ROLLBACK", &[]).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}
