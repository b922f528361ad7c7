use crate::config::error::ConfigError;
use std::collections::HashMap;

/// SQL dialect spoken by a physical datasource.
///
/// Carries the per-dialect constants the rewriter and the transaction layer
/// need; anything fancier (type mapping, emulation) is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgresql",
        }
    }

    /// Identifier quote character: backtick for MySQL, double quote for
    /// PostgreSQL.
    pub fn quote_char(&self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        }
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        let q = self.quote_char();
        format!("{q}{ident}{q}")
    }

    pub fn auto_increment_keyword(&self) -> &'static str {
        match self {
            Dialect::MySql => "AUTO_INCREMENT",
            Dialect::Postgres => "SERIAL",
        }
    }

    pub fn current_timestamp_function(&self) -> &'static str {
        "NOW()"
    }

    /// Render a LIMIT clause.
    ///
    /// MySQL: `LIMIT off, cnt` (or `LIMIT cnt`); PostgreSQL:
    /// `LIMIT cnt [OFFSET off]`.
    pub fn format_limit(&self, count: u64, offset: Option<u64>) -> String {
        match (self, offset) {
            (Dialect::MySql, Some(off)) => format!("LIMIT {off}, {count}"),
            (Dialect::MySql, None) => format!("LIMIT {count}"),
            (Dialect::Postgres, Some(off)) => format!("LIMIT {count} OFFSET {off}"),
            (Dialect::Postgres, None) => format!("LIMIT {count}"),
        }
    }

    /// Bind placeholder for the 1-based parameter position.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
        }
    }
}

/// Driver-name to dialect mapping.
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    drivers: HashMap<String, Dialect>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        let mut drivers = HashMap::new();
        drivers.insert("mysql".to_string(), Dialect::MySql);
        drivers.insert("postgres".to_string(), Dialect::Postgres);
        drivers.insert("postgresql".to_string(), Dialect::Postgres);
        Self { drivers }
    }

    pub fn register(&mut self, driver: &str, dialect: Dialect) {
        self.drivers.insert(driver.to_lowercase(), dialect);
    }

    pub fn dialect_for_driver(&self, driver: &str) -> Result<Dialect, ConfigError> {
        self.drivers
            .get(&driver.to_lowercase())
            .copied()
            .ok_or_else(|| ConfigError::UnsupportedDriver(driver.to_string()))
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
