use crate::{StatusCell, TxError, TxStatus};
use backend::Backend;
use common::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationStatus {
    Pending = 0,
    Succeeded = 1,
    Failed = 2,
}

pub struct BaseOperation {
    pub id: usize,
    pub data_source: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub max_retries: u32,
    status: AtomicU8,
    retry_count: AtomicU32,
}

impl BaseOperation {
    pub fn status(&self) -> OperationStatus {
        match self.status.load(Ordering::Acquire) {
            0 => OperationStatus::Pending,
            1 => OperationStatus::Succeeded,
            _ => OperationStatus::Failed,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct Compensation {
    pub operation_id: usize,
    pub data_source: String,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Long-running compensating transaction.
///
/// While Active it accumulates operations and their compensations. Commit
/// flips to Prepared and hands the queue to a background task that executes
/// operations in order with bounded retries; if one exhausts its retries,
/// the compensations recorded so far run in reverse and the transaction ends
/// RolledBack. The caller watches `status()` through atomic reads.
pub struct BaseTransaction {
    id: String,
    status: Arc<StatusCell>,
    start_time: Instant,
    timeout: Duration,
    backoff_unit: Mutex<Duration>,
    operations: Mutex<Vec<Arc<BaseOperation>>>,
    compensations: Mutex<Vec<Compensation>>,
    backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BaseTransaction {
    pub fn new(id: &str, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            status: Arc::new(StatusCell::new(TxStatus::Active)),
            start_time: Instant::now(),
            timeout,
            backoff_unit: Mutex::new(Duration::from_secs(1)),
            operations: Mutex::new(Vec::new()),
            compensations: Mutex::new(Vec::new()),
            backends: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TxStatus {
        self.status.load()
    }

    /// Advisory only; expiry does not auto-rollback.
    pub fn is_expired(&self) -> bool {
        self.start_time.elapsed() > self.timeout
    }

    /// Shrink the backoff unit (tests shouldn't sleep wall-clock seconds).
    pub fn set_backoff_unit(&self, unit: Duration) {
        *self.backoff_unit.lock() = unit;
    }

    fn ensure_active(&self) -> Result<(), TxError> {
        match self.status.load() {
            TxStatus::Active => Ok(()),
            TxStatus::Committed => Err(TxError::AlreadyCommitted(self.id.clone())),
            status => Err(TxError::NotActive {
                id: self.id.clone(),
                status,
            }),
        }
    }

    /// Queue an operation for the asynchronous execution phase.
    pub fn queue_operation(
        &self,
        backend: Arc<dyn Backend>,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<usize, TxError> {
        self.ensure_active()?;
        let mut operations = self.operations.lock();
        let id = operations.len();
        self.backends
            .lock()
            .insert(backend.name().to_string(), Arc::clone(&backend));
        operations.push(Arc::new(BaseOperation {
            id,
            data_source: backend.name().to_string(),
            sql: sql.to_string(),
            params,
            max_retries: DEFAULT_MAX_RETRIES,
            status: AtomicU8::new(OperationStatus::Pending as u8),
            retry_count: AtomicU32::new(0),
        }));
        Ok(id)
    }

    /// Queue the compensating statement for an already-queued operation.
    pub fn queue_compensation(
        &self,
        operation_id: usize,
        backend: Arc<dyn Backend>,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<(), TxError> {
        self.ensure_active()?;
        self.backends
            .lock()
            .insert(backend.name().to_string(), Arc::clone(&backend));
        self.compensations.lock().push(Compensation {
            operation_id,
            data_source: backend.name().to_string(),
            sql: sql.to_string(),
            params,
        });
        Ok(())
    }

    pub fn operations(&self) -> Vec<Arc<BaseOperation>> {
        self.operations.lock().clone()
    }

    /// Flip to Prepared and run the operation queue on a background task.
    pub fn commit(&self) -> Result<(), TxError> {
        self.ensure_active()?;
        self.status.store(TxStatus::Prepared);

        let id = self.id.clone();
        let operations = self.operations.lock().clone();
        let compensations = self.compensations.lock().clone();
        let backends = self.backends.lock().clone();
        let backoff_unit = *self.backoff_unit.lock();
        let status = Arc::clone(&self.status);

        let handle = tokio::spawn(async move {
            run_operations(id, operations, compensations, backends, backoff_unit, status).await;
        });
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Await the background phase; used by close paths and tests.
    pub async fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(tx = %self.id, error = %e, "base worker panicked");
            }
        }
    }

    pub async fn rollback(&self) -> Result<(), TxError> {
        match self.status.load() {
            TxStatus::Active => {
                // Nothing executed yet; dropping the queue is the rollback.
                self.operations.lock().clear();
                self.compensations.lock().clear();
                self.status.store(TxStatus::RolledBack);
                Ok(())
            }
            TxStatus::Committed => Err(TxError::AlreadyCommitted(self.id.clone())),
            status => Err(TxError::NotActive {
                id: self.id.clone(),
                status,
            }),
        }
    }
}

async fn run_operations(
    tx_id: String,
    operations: Vec<Arc<BaseOperation>>,
    compensations: Vec<Compensation>,
    backends: HashMap<String, Arc<dyn Backend>>,
    backoff_unit: Duration,
    status: Arc<StatusCell>,
) {
    for operation in &operations {
        let Some(backend) = backends.get(&operation.data_source) else {
            error!(tx = %tx_id, data_source = %operation.data_source, "no backend for operation");
            operation
                .status
                .store(OperationStatus::Failed as u8, Ordering::Release);
            compensate(&tx_id, &compensations, &backends).await;
            status.store(TxStatus::RolledBack);
            return;
        };

        let mut attempt: u32 = 0;
        loop {
            match backend.exec(&operation.sql, &operation.params).await {
                Ok(_) => {
                    operation
                        .status
                        .store(OperationStatus::Succeeded as u8, Ordering::Release);
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    operation.retry_count.store(attempt, Ordering::Release);
                    if attempt > operation.max_retries {
                        error!(tx = %tx_id, operation = operation.id, error = %e, "operation exhausted retries");
                        operation
                            .status
                            .store(OperationStatus::Failed as u8, Ordering::Release);
                        compensate(&tx_id, &compensations, &backends).await;
                        status.store(TxStatus::RolledBack);
                        return;
                    }
                    warn!(tx = %tx_id, operation = operation.id, attempt, error = %e, "operation failed, backing off");
                    tokio::time::sleep(backoff_unit * attempt).await;
                }
            }
        }
    }
    status.store(TxStatus::Committed);
    info!(tx = %tx_id, operations = operations.len(), "base transaction committed");
}

/// Execute compensations in reverse queue order; failures are logged and the
/// sweep keeps going.
async fn compensate(
    tx_id: &str,
    compensations: &[Compensation],
    backends: &HashMap<String, Arc<dyn Backend>>,
) {
    for compensation in compensations.iter().rev() {
        let Some(backend) = backends.get(&compensation.data_source) else {
            error!(tx = %tx_id, data_source = %compensation.data_source, "no backend for compensation");
            continue;
        };
        if let Err(e) = backend.exec(&compensation.sql, &compensation.params).await {
            error!(
                tx = %tx_id,
                operation = compensation.operation_id,
                error = %e,
                "compensation failed"
            );
        }
    }
}
