pub mod base;
pub mod local;
pub mod xa;

use backend::{Backend, BackendError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use base::{BaseOperation, BaseTransaction, Compensation, OperationStatus};
pub use local::LocalTransaction;
pub use xa::XaTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Local,
    Xa,
    Base,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    Active = 0,
    Prepared = 1,
    Committed = 2,
    RolledBack = 3,
    Failed = 4,
}

/// Lock-free status cell; the BASE background task writes it while callers
/// poll.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: TxStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn load(&self) -> TxStatus {
        match self.0.load(Ordering::Acquire) {
            0 => TxStatus::Active,
            1 => TxStatus::Prepared,
            2 => TxStatus::Committed,
            3 => TxStatus::RolledBack,
            _ => TxStatus::Failed,
        }
    }

    pub fn store(&self, status: TxStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("transaction `{0}` already committed")]
    AlreadyCommitted(String),
    #[error("transaction `{0}` not started or unknown")]
    NotStarted(String),
    #[error("transaction `{id}` is {status:?}, expected Active")]
    NotActive { id: String, status: TxStatus },
    #[error("prepare failed on `{data_source}`: {source}")]
    PrepareFailed {
        data_source: String,
        #[source]
        source: BackendError,
    },
    #[error("branch commit failed on `{data_source}`: {source}")]
    BranchCommitFailed {
        data_source: String,
        #[source]
        source: BackendError,
    },
    #[error("local transaction `{id}` is pinned to `{pinned}`, statement routed to `{requested}`")]
    DataSourceNotPinned {
        id: String,
        pinned: String,
        requested: String,
    },
    #[error("unknown datasource `{0}`")]
    UnknownDataSource(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One live transaction of any flavor.
pub enum Transaction {
    Local(LocalTransaction),
    Xa(XaTransaction),
    Base(BaseTransaction),
}

impl Transaction {
    pub fn id(&self) -> &str {
        match self {
            Transaction::Local(tx) => tx.id(),
            Transaction::Xa(tx) => tx.id(),
            Transaction::Base(tx) => tx.id(),
        }
    }

    pub fn kind(&self) -> TxKind {
        match self {
            Transaction::Local(_) => TxKind::Local,
            Transaction::Xa(_) => TxKind::Xa,
            Transaction::Base(_) => TxKind::Base,
        }
    }

    pub fn status(&self) -> TxStatus {
        match self {
            Transaction::Local(tx) => tx.status(),
            Transaction::Xa(tx) => tx.status(),
            Transaction::Base(tx) => tx.status(),
        }
    }

    pub async fn commit(&self) -> Result<(), TxError> {
        match self {
            Transaction::Local(tx) => tx.commit().await,
            Transaction::Xa(tx) => tx.commit().await,
            Transaction::Base(tx) => tx.commit(),
        }
    }

    pub async fn rollback(&self) -> Result<(), TxError> {
        match self {
            Transaction::Local(tx) => tx.rollback().await,
            Transaction::Xa(tx) => tx.rollback().await,
            Transaction::Base(tx) => tx.rollback().await,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self {
            Transaction::Local(tx) => tx.is_expired(),
            Transaction::Xa(tx) => tx.is_expired(),
            Transaction::Base(tx) => tx.is_expired(),
        }
    }
}

/// Owns the datasource registry and the live-transaction map. The hot path
/// (`current`) takes the read lock only.
pub struct TransactionManager {
    backends: HashMap<String, Arc<dyn Backend>>,
    live: RwLock<HashMap<String, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(backends: HashMap<String, Arc<dyn Backend>>) -> Self {
        Self {
            backends,
            live: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    fn next_id() -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("tx_{nanos}")
    }

    /// Begin a transaction. Local pins to `data_source` (required); XA and
    /// BASE enlist datasources as work arrives.
    pub async fn begin(
        &self,
        kind: TxKind,
        data_source: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<Transaction>, TxError> {
        let id = Self::next_id();
        let tx = match kind {
            TxKind::Local => {
                let name = data_source
                    .ok_or_else(|| TxError::NotStarted("local requires a datasource".into()))?;
                let backend = self
                    .backend(name)
                    .ok_or_else(|| TxError::UnknownDataSource(name.to_string()))?;
                Transaction::Local(LocalTransaction::begin(&id, backend, timeout).await?)
            }
            TxKind::Xa => Transaction::Xa(XaTransaction::new(&id, timeout)),
            TxKind::Base => Transaction::Base(BaseTransaction::new(&id, timeout)),
        };
        let tx = Arc::new(tx);
        self.live.write().insert(id, Arc::clone(&tx));
        Ok(tx)
    }

    /// Look up a live transaction by the id carried in the request context.
    pub fn current(&self, id: &str) -> Option<Arc<Transaction>> {
        self.live.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.live.write().remove(id);
    }

    /// Roll back everything still Active and drop the registry.
    pub async fn close(&self) {
        let drained: Vec<Arc<Transaction>> = self.live.write().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            if tx.status() == TxStatus::Active {
                if let Err(e) = tx.rollback().await {
                    warn!(tx = tx.id(), error = %e, "rollback during close failed");
                }
            }
        }
    }
}
