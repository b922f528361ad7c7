use crate::{Backend, BackendError, ExecOutcome, QueryOutcome};
use async_trait::async_trait;
use common::{Dialect, Value};
use parking_lot::Mutex;

/// What a scripted statement should produce.
#[derive(Debug, Clone)]
enum Script {
    Rows(QueryOutcome),
    Exec(ExecOutcome),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
struct MemoryState {
    scripts: Vec<(String, Script)>,
    calls: Vec<RecordedCall>,
}

/// Scripted in-memory datasource for tests: respond to SQL matched by
/// substring, record every call. Unmatched queries return an empty result
/// and unmatched execs report one affected row.
pub struct MemoryBackend {
    name: String,
    dialect: Dialect,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dialect: Dialect::MySql,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_dialect(name: &str, dialect: Dialect) -> Self {
        Self {
            name: name.to_string(),
            dialect,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Respond to any statement containing `fragment` with these rows.
    pub fn respond_rows(&self, fragment: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let outcome = QueryOutcome {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        self.state
            .lock()
            .scripts
            .push((fragment.to_string(), Script::Rows(outcome)));
    }

    pub fn respond_exec(&self, fragment: &str, rows_affected: u64, last_insert_id: i64) {
        self.state.lock().scripts.push((
            fragment.to_string(),
            Script::Exec(ExecOutcome {
                rows_affected,
                last_insert_id,
            }),
        ));
    }

    /// Fail any statement containing `fragment`.
    pub fn fail_matching(&self, fragment: &str, message: &str) {
        self.state
            .lock()
            .scripts
            .push((fragment.to_string(), Script::Fail(message.to_string())));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_matching(&self, fragment: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.sql.contains(fragment))
            .cloned()
            .collect()
    }

    fn record_and_match(&self, sql: &str, params: &[Value]) -> Option<Script> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        state
            .scripts
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome, BackendError> {
        match self.record_and_match(sql, params) {
            Some(Script::Rows(outcome)) => Ok(outcome),
            Some(Script::Exec(_)) | None => Ok(QueryOutcome::default()),
            Some(Script::Fail(message)) => Err(BackendError::Execute {
                data_source: self.name.clone(),
                message,
            }),
        }
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, BackendError> {
        match self.record_and_match(sql, params) {
            Some(Script::Exec(outcome)) => Ok(outcome),
            Some(Script::Rows(_)) | None => Ok(ExecOutcome {
                rows_affected: 1,
                last_insert_id: 0,
            }),
            Some(Script::Fail(message)) => Err(BackendError::Execute {
                data_source: self.name.clone(),
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rows() {
        let backend = MemoryBackend::new("ds_0");
        backend.respond_rows("t_order_1", &["id"], vec![vec![Value::Int(7)]]);
        let outcome = backend
            .query("SELECT * FROM ds_0.t_order_1", &[])
            .await
            .expect("query");
        assert_eq!(outcome.rows, vec![vec![Value::Int(7)]]);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let backend = MemoryBackend::new("ds_0");
        backend.fail_matching("boom", "simulated failure");
        let err = backend.exec("UPDATE boom SET x = 1", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Execute { .. }));
    }

    #[tokio::test]
    async fn test_unscripted_defaults() {
        let backend = MemoryBackend::new("ds_0");
        assert!(backend.query("SELECT 1", &[]).await.expect("query").rows.is_empty());
        let outcome = backend.exec("DELETE FROM t", &[]).await.expect("exec");
        assert_eq!(outcome.rows_affected, 1);
    }
}
