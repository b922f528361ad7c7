use crate::statement::AnalyzedStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryKind {
    SelectStar,
    MissingWhere,
    TooManySubqueries,
    TooManyJoins,
    Distinct,
    OrderWithoutLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
}

/// Diagnostic weight of a statement. Not used for routing.
pub fn complexity_score(stmt: &AnalyzedStatement) -> u32 {
    2 * stmt.tables.len() as u32
        + 5 * stmt.joins.len() as u32
        + 10 * stmt.subqueries.len() as u32
        + 8 * stmt.ctes.len() as u32
        + 6 * stmt.window_functions.len() as u32
        + 15 * stmt.nesting_level
}

/// Heuristic advisories. Informational only: the pipeline never alters SQL
/// because of them.
pub fn advise(stmt: &AnalyzedStatement) -> Vec<Advisory> {
    let mut advisories = Vec::new();

    if stmt.select_star {
        advisories.push(Advisory {
            kind: AdvisoryKind::SelectStar,
            severity: Severity::Info,
            message: "statement selects all columns".to_string(),
            suggestion: "list the columns actually needed".to_string(),
        });
    }
    if stmt.kind == crate::statement::StatementKind::Select && !stmt.has_where {
        advisories.push(Advisory {
            kind: AdvisoryKind::MissingWhere,
            severity: Severity::Warning,
            message: "SELECT without a WHERE clause scans every shard".to_string(),
            suggestion: "add a predicate on a sharding column".to_string(),
        });
    }
    if stmt.subqueries.len() > 3 {
        advisories.push(Advisory {
            kind: AdvisoryKind::TooManySubqueries,
            severity: Severity::Warning,
            message: format!("{} subqueries in one statement", stmt.subqueries.len()),
            suggestion: "consider flattening with joins or CTEs".to_string(),
        });
    }
    if stmt.joins.len() > 5 {
        advisories.push(Advisory {
            kind: AdvisoryKind::TooManyJoins,
            severity: Severity::Warning,
            message: format!("{} joins in one statement", stmt.joins.len()),
            suggestion: "split the query or denormalize".to_string(),
        });
    }
    if stmt.distinct {
        advisories.push(Advisory {
            kind: AdvisoryKind::Distinct,
            severity: Severity::Info,
            message: "DISTINCT forces deduplication across shard results".to_string(),
            suggestion: "verify the duplicates are real before paying for this".to_string(),
        });
    }
    if !stmt.order_by.is_empty() && stmt.limit.is_none() {
        advisories.push(Advisory {
            kind: AdvisoryKind::OrderWithoutLimit,
            severity: Severity::Info,
            message: "ORDER BY without LIMIT sorts the full merged result".to_string(),
            suggestion: "add a LIMIT if only the top rows matter".to_string(),
        });
    }

    advisories
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{AnalyzedStatement, StatementKind, SubqueryClause, SubqueryKind};

    #[test]
    fn test_score_weights() {
        let mut stmt = AnalyzedStatement::empty("SELECT 1", StatementKind::Select);
        stmt.tables = vec!["a".into(), "b".into()];
        stmt.subqueries = vec![SubqueryClause {
            kind: SubqueryKind::Where,
            inner_tables: vec![],
        }];
        stmt.nesting_level = 1;
        assert_eq!(complexity_score(&stmt), 2 * 2 + 10 + 15);
    }

    #[test]
    fn test_missing_where_advisory() {
        let mut stmt = AnalyzedStatement::empty("SELECT * FROM t", StatementKind::Select);
        stmt.select_star = true;
        let advisories = advise(&stmt);
        assert!(advisories.iter().any(|a| a.kind == AdvisoryKind::SelectStar));
        assert!(advisories.iter().any(|a| a.kind == AdvisoryKind::MissingWhere));
    }

    #[test]
    fn test_quiet_statement_gets_no_advisories() {
        let mut stmt = AnalyzedStatement::empty(
            "SELECT id FROM t WHERE id = 1",
            StatementKind::Select,
        );
        stmt.has_where = true;
        assert!(advise(&stmt).is_empty());
    }
}
