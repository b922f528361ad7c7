use crate::{StatusCell, TxError, TxStatus};
use backend::{Backend, BackendError};
use common::Dialect;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

struct Branch {
    data_source: String,
    backend: Arc<dyn Backend>,
    xid: String,
    prepared: AtomicBool,
}

impl Branch {
    async fn start(&self) -> Result<(), BackendError> {
        match self.backend.dialect() {
            Dialect::MySql => {
                self.backend
                    .exec(&format!("XA START '{}'", self.xid), &[])
                    .await?;
            }
            Dialect::Postgres => {
                self.backend.exec("BEGIN", &[]).await?;
            }
        }
        Ok(())
    }

    async fn prepare(&self) -> Result<(), BackendError> {
        match self.backend.dialect() {
            Dialect::MySql => {
                self.backend
                    .exec(&format!("XA END '{}'", self.xid), &[])
                    .await?;
                self.backend
                    .exec(&format!("XA PREPARE '{}'", self.xid), &[])
                    .await?;
            }
            Dialect::Postgres => {
                self.backend
                    .exec(&format!("PREPARE TRANSACTION '{}'", self.xid), &[])
                    .await?;
            }
        }
        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    async fn commit_prepared(&self) -> Result<(), BackendError> {
        let sql = match self.backend.dialect() {
            Dialect::MySql => format!("XA COMMIT '{}'", self.xid),
            Dialect::Postgres => format!("COMMIT PREPARED '{}'", self.xid),
        };
        self.backend.exec(&sql, &[]).await?;
        Ok(())
    }

    async fn roll_back(&self) -> Result<(), BackendError> {
        let sql = match (self.backend.dialect(), self.prepared.load(Ordering::Acquire)) {
            (Dialect::MySql, true) => format!("XA ROLLBACK '{}'", self.xid),
            (Dialect::MySql, false) => {
                self.backend
                    .exec(&format!("XA END '{}'", self.xid), &[])
                    .await?;
                format!("XA ROLLBACK '{}'", self.xid)
            }
            (Dialect::Postgres, true) => format!("ROLLBACK PREPARED '{}'", self.xid),
            (Dialect::Postgres, false) => "ROLLBACK".to_string(),
        };
        self.backend.exec(&sql, &[]).await?;
        Ok(())
    }
}

/// Two-phase transaction across datasource branches.
///
/// Branches enlist dynamically as statements reach new datasources. Commit
/// is strict 2PC: every branch must prepare or everything rolls back; once
/// prepared, phase-2 commit keeps going past individual branch failures.
/// There is no durable prepare log, so a crash between the phases needs
/// manual recovery.
pub struct XaTransaction {
    id: String,
    branches: Mutex<Vec<Arc<Branch>>>,
    status: StatusCell,
    start_time: Instant,
    timeout: Duration,
}

impl XaTransaction {
    pub fn new(id: &str, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            branches: Mutex::new(Vec::new()),
            status: StatusCell::new(TxStatus::Active),
            start_time: Instant::now(),
            timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TxStatus {
        self.status.load()
    }

    pub fn is_expired(&self) -> bool {
        self.start_time.elapsed() > self.timeout
    }

    pub fn branch_count(&self) -> usize {
        self.branches.lock().len()
    }

    /// Add a datasource as a branch if it is not already enlisted, opening
    /// the branch's local transaction.
    pub async fn enlist(&self, backend: Arc<dyn Backend>) -> Result<(), TxError> {
        if self.status.load() != TxStatus::Active {
            return Err(TxError::NotActive {
                id: self.id.clone(),
                status: self.status.load(),
            });
        }
        let data_source = backend.name().to_string();
        {
            let branches = self.branches.lock();
            if branches.iter().any(|b| b.data_source == data_source) {
                return Ok(());
            }
        }
        let branch = Arc::new(Branch {
            xid: format!("{}_{}", self.id, data_source),
            data_source,
            backend,
            prepared: AtomicBool::new(false),
        });
        branch.start().await?;
        self.branches.lock().push(branch);
        Ok(())
    }

    /// The backend a statement should execute on inside this transaction.
    pub fn branch_backend(&self, data_source: &str) -> Option<Arc<dyn Backend>> {
        self.branches
            .lock()
            .iter()
            .find(|b| b.data_source == data_source)
            .map(|b| Arc::clone(&b.backend))
    }

    pub async fn commit(&self) -> Result<(), TxError> {
        match self.status.load() {
            TxStatus::Active => {}
            TxStatus::Committed => return Err(TxError::AlreadyCommitted(self.id.clone())),
            status => {
                return Err(TxError::NotActive {
                    id: self.id.clone(),
                    status,
                })
            }
        }
        let branches: Vec<Arc<Branch>> = self.branches.lock().clone();

        // Phase 1: all branches must prepare.
        for branch in &branches {
            if let Err(e) = branch.prepare().await {
                error!(tx = %self.id, data_source = %branch.data_source, error = %e, "prepare failed, rolling back all branches");
                self.rollback_branches(&branches).await;
                self.status.store(TxStatus::RolledBack);
                return Err(TxError::PrepareFailed {
                    data_source: branch.data_source.clone(),
                    source: e,
                });
            }
        }
        self.status.store(TxStatus::Prepared);

        // Phase 2: commit every branch; failures are logged, not fatal.
        for branch in &branches {
            if let Err(e) = branch.commit_prepared().await {
                error!(tx = %self.id, data_source = %branch.data_source, error = %e, "branch commit failed after prepare");
            }
        }
        self.status.store(TxStatus::Committed);
        info!(tx = %self.id, branches = branches.len(), "xa transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), TxError> {
        match self.status.load() {
            TxStatus::Active | TxStatus::Prepared => {}
            TxStatus::Committed => return Err(TxError::AlreadyCommitted(self.id.clone())),
            status => {
                return Err(TxError::NotActive {
                    id: self.id.clone(),
                    status,
                })
            }
        }
        let branches: Vec<Arc<Branch>> = self.branches.lock().clone();
        self.rollback_branches(&branches).await;
        self.status.store(TxStatus::RolledBack);
        Ok(())
    }

    async fn rollback_branches(&self, branches: &[Arc<Branch>]) {
        for branch in branches {
            if let Err(e) = branch.roll_back().await {
                error!(tx = %self.id, data_source = %branch.data_source, error = %e, "branch rollback failed");
            }
        }
    }
}
