pub mod advisor;
pub mod extract;
pub mod fallback;
pub mod postgres;
pub mod statement;

use common::config::components::parser::ParserConfig;
use common::Dialect;
use sqlparser::dialect::{GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

pub use advisor::{advise, complexity_score, Advisory, AdvisoryKind, Severity};
pub use statement::{
    AggregateAlias, AnalyzedStatement, CteClause, InsertCell, InsertShape, JoinClause, JoinType,
    LimitInfo, OrderByColumn, PgFeatures, Predicate, PredicateOp, PredicateValue, StatementKind,
    SubqueryClause, SubqueryKind, WindowFunction,
};

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("empty SQL statement")]
    EmptySql,
    #[error("syntax error: {0}")]
    Syntax(String),
}

/// Classify by leading keyword, case-insensitive, whitespace-trimmed.
pub fn classify(sql: &str) -> Result<StatementKind, AnalyzerError> {
    let keyword = sql
        .trim()
        .split_whitespace()
        .next()
        .ok_or(AnalyzerError::EmptySql)?
        .to_uppercase();
    Ok(match keyword.as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" => StatementKind::Create,
        "DROP" => StatementKind::Drop,
        "ALTER" => StatementKind::Alter,
        "SHOW" => StatementKind::Show,
        _ => StatementKind::Other,
    })
}

/// SQL analysis front door: structured parse first, regex fallback second.
pub struct Analyzer {
    options: ParserConfig,
}

impl Analyzer {
    pub fn new(options: ParserConfig) -> Self {
        Self { options }
    }

    /// Analyze one statement. The fallback layer makes syntax errors
    /// non-fatal when enabled; otherwise they surface as `Syntax`.
    pub fn analyze(&self, sql: &str, dialect: Dialect) -> Result<AnalyzedStatement, AnalyzerError> {
        let kind = classify(sql)?;
        let started = Instant::now();

        let parsed = self.parse(sql, dialect);
        let mut analyzed = match parsed {
            Ok(statements) => match statements.first() {
                Some(stmt) => {
                    let mut analyzed = extract::Collector::new(sql, kind).collect(stmt);
                    // ORDER BY / LIMIT come from the conservative clause
                    // scanner in both passes.
                    analyzed.order_by = fallback::extract_order_by(sql);
                    analyzed.limit = fallback::extract_limit(sql);
                    analyzed
                }
                None => return Err(AnalyzerError::EmptySql),
            },
            Err(parse_error) => {
                if self.options.log_parsing_errors {
                    warn!(error = %parse_error, "structured parse failed");
                }
                if !self.options.fallback_to_original {
                    return Err(AnalyzerError::Syntax(parse_error));
                }
                fallback::extract(sql, kind)
            }
        };

        if dialect == Dialect::Postgres {
            analyzed.pg_features = postgres::detect_features(sql);
        }

        if self.options.enable_benchmarking {
            debug!(
                elapsed_us = started.elapsed().as_micros() as u64,
                fallback = analyzed.from_fallback,
                "analysis pass finished"
            );
        }
        Ok(analyzed)
    }

    fn parse(
        &self,
        sql: &str,
        dialect: Dialect,
    ) -> Result<Vec<sqlparser::ast::Statement>, String> {
        let first_attempt = match dialect {
            Dialect::Postgres if self.options.enable_postgresql_parser => {
                Parser::parse_sql(&PostgreSqlDialect {}, sql)
            }
            Dialect::Postgres => Parser::parse_sql(&GenericDialect {}, sql),
            Dialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        };
        match first_attempt {
            Ok(statements) => Ok(statements),
            Err(first_error) => Parser::parse_sql(&GenericDialect {}, sql)
                .map_err(|_| first_error.to_string()),
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}
