use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-request execution context threaded explicitly through query/exec.
///
/// Replaces opaque context key/value pairs: the executor and balancer read
/// these fields directly instead of probing a bag.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Force reads to the master (read-your-writes, SELECT ... FOR UPDATE).
    pub force_master: bool,
    /// Set once a transaction has begun; pins every statement to masters.
    pub transaction_id: Option<String>,
    /// Request-scoped cancellation; outstanding shard calls abort on cancel.
    pub cancellation: CancellationToken,
    /// Absolute deadline, enforced as cancel-after-deadline.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            force_master: false,
            transaction_id: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_force_master(mut self) -> Self {
        self.force_master = true;
        self
    }

    pub fn with_transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// Remaining time until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults() {
        let ctx = RequestContext::new();
        assert!(!ctx.force_master);
        assert!(!ctx.in_transaction());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_transaction_pinning() {
        let ctx = RequestContext::new().with_transaction("tx_42");
        assert!(ctx.in_transaction());
        assert_eq!(ctx.transaction_id.as_deref(), Some("tx_42"));
    }

    #[test]
    fn test_deadline_counts_down() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(60));
        let remaining = ctx.remaining().expect("deadline set");
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(58));
    }
}
