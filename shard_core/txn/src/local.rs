use crate::{StatusCell, TxError, TxStatus};
use backend::Backend;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wraps one datasource's native transaction. Begin opens it; commit and
/// rollback delegate straight to the driver session.
pub struct LocalTransaction {
    id: String,
    backend: Arc<dyn Backend>,
    status: StatusCell,
    start_time: Instant,
    timeout: Duration,
}

impl LocalTransaction {
    pub async fn begin(
        id: &str,
        backend: Arc<dyn Backend>,
        timeout: Duration,
    ) -> Result<Self, TxError> {
        backend.begin().await?;
        Ok(Self {
            id: id.to_string(),
            backend,
            status: StatusCell::new(TxStatus::Active),
            start_time: Instant::now(),
            timeout,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TxStatus {
        self.status.load()
    }

    pub fn pinned_data_source(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn is_expired(&self) -> bool {
        self.start_time.elapsed() > self.timeout
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

    pub async fn commit(&self) -> Result<(), TxError> {
        self.ensure_active()?;
        match self.backend.commit().await {
            Ok(()) => {
                self.status.store(TxStatus::Committed);
                Ok(())
            }
            Err(e) => {
                self.status.store(TxStatus::Failed);
                Err(e.into())
            }
        }
    }

    pub async fn rollback(&self) -> Result<(), TxError> {
        self.ensure_active()?;
        match self.backend.rollback().await {
            Ok(()) => {
                self.status.store(TxStatus::RolledBack);
                Ok(())
            }
            Err(e) => {
                self.status.store(TxStatus::Failed);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemoryBackend;

    #[tokio::test]
    async fn test_lifecycle() {
        let backend = Arc::new(MemoryBackend::new("ds_0"));
        let tx = LocalTransaction::begin("tx_1", backend.clone(), Duration::from_secs(30))
            .await
            .expect("begin");
        assert_eq!(tx.status(), TxStatus::Active);
        assert_eq!(tx.pinned_data_source(), "ds_0");
        tx.commit().await.expect("commit");
        assert_eq!(tx.status(), TxStatus::Committed);

        let sqls: Vec<String> = backend.calls().into_iter().map(|c| c.sql).collect();
        assert_eq!(sqls, vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_double_commit_rejected() {
        let backend = Arc::new(MemoryBackend::new("ds_0"));
        let tx = LocalTransaction::begin("tx_1", backend, Duration::from_secs(30))
            .await
            .expect("begin");
        tx.commit().await.expect("commit");
        assert!(matches!(
            tx.commit().await,
            Err(TxError::AlreadyCommitted(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback() {
        let backend = Arc::new(MemoryBackend::new("ds_0"));
        let tx = LocalTransaction::begin("tx_1", backend.clone(), Duration::from_secs(30))
            .await
            .expect("begin");
        tx.rollback().await.expect("rollback");
        assert_eq!(tx.status(), TxStatus::RolledBack);
        let sqls: Vec<String> = backend.calls().into_iter().map(|c| c.sql).collect();
        assert_eq!(sqls, vec!["BEGIN", "ROLLBACK"]);
    }
}
