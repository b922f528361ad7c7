use crate::{Backend, BackendError, ExecOutcome, QueryOutcome};
use async_trait::async_trait;
use bytes::BytesMut;
use common::{Dialect, Value};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::error;

/// PostgreSQL datasource over tokio-postgres. The connection driver runs on
/// its own task for the adapter's lifetime.
pub struct PostgresBackend {
    name: String,
    client: Client,
    _driver: tokio::task::JoinHandle<()>,
}

impl PostgresBackend {
    pub async fn connect(name: &str, conn_str: &str) -> Result<Self, BackendError> {
        let (client, connection) =
            tokio_postgres::connect(conn_str, NoTls)
                .await
                .map_err(|e| BackendError::Connect {
                    data_source: name.to_string(),
                    message: e.to_string(),
                })?;
        let driver_name = name.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(data_source = %driver_name, error = %e, "postgres driver task exited");
            }
        });
        Ok(Self {
            name: name.to_string(),
            client,
            _driver: driver,
        })
    }

    fn execute_error(&self, e: tokio_postgres::Error) -> BackendError {
        BackendError::Execute {
            data_source: self.name.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome, BackendError> {
        let bound: Vec<PgValue<'_>> = params.iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| self.execute_error(e))?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mut out_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            out_rows.push(decode_row(&self.name, row)?);
        }
        Ok(QueryOutcome {
            columns,
            rows: out_rows,
        })
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome, BackendError> {
        let bound: Vec<PgValue<'_>> = params.iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let rows_affected = self
            .client
            .execute(sql, &refs)
            .await
            .map_err(|e| self.execute_error(e))?;
        // PostgreSQL has no session last-insert-id; RETURNING is the way.
        Ok(ExecOutcome {
            rows_affected,
            last_insert_id: 0,
        })
    }
}

fn decode_row(data_source: &str, row: &Row) -> Result<Vec<Value>, BackendError> {
    let mut out = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map(|v| v.map(|v| Value::Int(v as i64)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map(|v| v.map(|v| Value::Int(v as i64)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Int))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .map(|v| v.map(|v| Value::Float(v as f64)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)
                .map(|v| v.map(Value::Float))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Bool))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx)
                .map(|v| v.map(Value::Bytes))
        } else {
            row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text))
        };
        match value {
            Ok(Some(value)) => out.push(value),
            Ok(None) => out.push(Value::Null),
            Err(e) => {
                return Err(BackendError::Scan {
                    data_source: data_source.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Bind adapter: renders our tagged values through the driver's own
/// per-type encoders.
#[derive(Debug)]
struct PgValue<'a>(&'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Text(v) => v.to_sql(ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
