pub mod placeholder;
pub mod quoting;
pub mod tables;

use common::{Dialect, Value};
use std::collections::HashMap;
use thiserror::Error;

pub use placeholder::convert_placeholders;
pub use quoting::convert_identifier_quotes;
pub use tables::replace_tables;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("route for datasource `{data_source}` carries no table mapping")]
    EmptyMapping { data_source: String },
}

/// One route's rewrite target: the datasource to dispatch to and the
/// logical-to-physical substitutions to apply. Physical names are rendered
/// datasource-qualified (`ds_0.t_order_1`).
#[derive(Debug, Clone)]
pub struct RouteUnit {
    pub data_source: String,
    pub table_mappings: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenStatement {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct RewriteContext<'a> {
    pub sql: &'a str,
    pub parameters: &'a [Value],
    /// Dialect the application SQL is written in.
    pub source: Dialect,
}

/// Rewrite the statement for one route: substitute logical tables, convert
/// identifier quoting between dialects, convert bind placeholders for the
/// target. Pure text transformation; no schema or semantic checks.
pub fn rewrite(
    ctx: &RewriteContext<'_>,
    unit: &RouteUnit,
    target: Dialect,
) -> Result<RewrittenStatement, RewriteError> {
    if unit.table_mappings.is_empty() {
        return Err(RewriteError::EmptyMapping {
            data_source: unit.data_source.clone(),
        });
    }
    let mut sql = replace_tables(ctx.sql, &unit.table_mappings, ctx.source);
    if ctx.source != target {
        sql = convert_identifier_quotes(&sql, ctx.source, target);
    }
    let sql = convert_placeholders(&sql, target);
    Ok(RewrittenStatement {
        data_source: unit.data_source.clone(),
        sql,
        parameters: ctx.parameters.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ds: &str, logical: &str, physical: &str) -> RouteUnit {
        let mut table_mappings = HashMap::new();
        table_mappings.insert(logical.to_string(), physical.to_string());
        RouteUnit {
            data_source: ds.to_string(),
            table_mappings,
        }
    }

    #[test]
    fn test_single_shard_select_rewrite() {
        let ctx = RewriteContext {
            sql: "SELECT * FROM t_order WHERE user_id = ? AND order_id = ?",
            parameters: &[Value::Int(2), Value::Int(1001)],
            source: Dialect::MySql,
        };
        let rewritten = rewrite(&ctx, &unit("ds_0", "t_order", "ds_0.t_order_1"), Dialect::MySql)
            .expect("rewrite");
        assert_eq!(
            rewritten.sql,
            "SELECT * FROM ds_0.t_order_1 WHERE user_id = ? AND order_id = ?"
        );
        assert_eq!(rewritten.parameters, vec![Value::Int(2), Value::Int(1001)]);
    }

    #[test]
    fn test_postgres_insert_conversion() {
        let ctx = RewriteContext {
            sql: "INSERT INTO t_order (user_id, amount) VALUES (?, ?)",
            parameters: &[Value::Int(1), Value::Float(99.99)],
            source: Dialect::Postgres,
        };
        let rewritten = rewrite(
            &ctx,
            &unit("ds_1", "t_order", "ds_1.t_order_0"),
            Dialect::Postgres,
        )
        .expect("rewrite");
        assert_eq!(
            rewritten.sql,
            "INSERT INTO ds_1.t_order_0 (user_id, amount) VALUES ($1, $2)"
        );
    }

    #[test]
    fn test_no_logical_tables_is_identity_modulo_placeholders() {
        let ctx = RewriteContext {
            sql: "SELECT 1 WHERE a = ?",
            parameters: &[],
            source: Dialect::Postgres,
        };
        let rewritten = rewrite(&ctx, &unit("ds_0", "t_other", "ds_0.t_other_0"), Dialect::Postgres)
            .expect("rewrite");
        assert_eq!(rewritten.sql, "SELECT 1 WHERE a = $1");
    }

    #[test]
    fn test_empty_mapping_rejected() {
        let ctx = RewriteContext {
            sql: "SELECT 1",
            parameters: &[],
            source: Dialect::MySql,
        };
        let bare = RouteUnit {
            data_source: "ds_0".to_string(),
            table_mappings: HashMap::new(),
        };
        assert!(matches!(
            rewrite(&ctx, &bare, Dialect::MySql),
            Err(RewriteError::EmptyMapping { .. })
        ));
    }
}
