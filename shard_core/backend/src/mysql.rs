use crate::{Backend, BackendError, ExecOutcome, QueryOutcome};
use async_trait::async_trait;
use common::{Dialect, Value};
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, Params, Pool, Row, Value as MyValue};

/// MySQL datasource over mysql_async. Each call checks a connection out of
/// the driver pool; the driver owns reconnects.
pub struct MySqlBackend {
    name: String,
    pool: Pool,
}

impl MySqlBackend {
    pub fn connect(name: &str, url: &str) -> Result<Self, BackendError> {
        let opts = Opts::from_url(url).map_err(|e| BackendError::Connect {
            data_source: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            pool: Pool::new(opts),
        })
    }

    fn execute_error(&self, e: mysql_async::Error) -> BackendError {
        BackendError::Execute {
            data_source: self.name.clone(),
            message: e.to_string(),
        }
    }

    fn bind(params: &[Value]) -> Params {
        if params.is_empty() {
            return Params::Empty;
        }
        Params::Positional(params.iter().map(to_my_value).collect())
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome, BackendError> {
        let mut conn = self.pool.get_conn().await.map_err(|e| BackendError::Connect {
            data_source: self.name.clone(),
            message: e.to_string(),
        })?;
        let rows: Vec<Row> = conn
            .exec(sql, Self::bind(params))
            .await
            .map_err(|e| self.execute_error(e))?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .map(|c| c.name_str().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mut out_rows = Vec::with_capacity(rows.len());
        for row in rows {
            out_rows.push(decode_row(&self.name, row)?);
        }
        Ok(QueryOutcome {
            columns,
            rows: out_rows,
        })
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, BackendError> {
        let mut conn = self.pool.get_conn().await.map_err(|e| BackendError::Connect {
            data_source: self.name.clone(),
            message: e.to_string(),
        })?;
        conn.exec_drop(sql, Self::bind(params))
            .await
            .map_err(|e| self.execute_error(e))?;
        Ok(ExecOutcome {
            rows_affected: conn.affected_rows(),
            last_insert_id: conn.last_insert_id().unwrap_or(0) as i64,
        })
    }
}

fn to_my_value(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(v) => MyValue::Int(i64::from(*v)),
        Value::Int(v) => MyValue::Int(*v),
        Value::Float(v) => MyValue::Double(*v),
        Value::Text(v) => MyValue::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => MyValue::Bytes(v.clone()),
    }
}

fn decode_row(data_source: &str, row: Row) -> Result<Vec<Value>, BackendError> {
    let mut out = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let cell = row.as_ref(idx).ok_or_else(|| BackendError::Scan {
            data_source: data_source.to_string(),
            message: format!("missing column {idx}"),
        })?;
        out.push(from_my_value(cell));
    }
    Ok(out)
}

fn from_my_value(value: &MyValue) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(v) => Value::Int(*v),
        MyValue::UInt(v) => Value::Int(*v as i64),
        MyValue::Float(v) => Value::Float(*v as f64),
        MyValue::Double(v) => Value::Float(*v),
        MyValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        other => Value::Text(format!("{other:?}")),
    }
}
