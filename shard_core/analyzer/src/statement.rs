use common::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Show,
    Other,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        !matches!(self, StatementKind::Select | StatementKind::Show)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Like,
}

/// Where a predicate's comparison value comes from: an inline literal or a
/// positional bind parameter (0-based, counted in source order across the
/// whole statement).
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    Literal(Value),
    Parameter(usize),
    List(Vec<PredicateValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: PredicateOp,
    pub value: PredicateValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub left: String,
    pub right: String,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteClause {
    pub name: String,
    pub columns: Vec<String>,
    pub inner_tables: Vec<String>,
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    Scalar,
    Where,
    From,
    InsertSelect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryClause {
    pub kind: SubqueryKind,
    pub inner_tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowFunction {
    pub function: String,
    pub partition_by: Vec<String>,
    pub order_by: Vec<OrderByColumn>,
    pub frame: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByColumn {
    pub column: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitInfo {
    pub count: u64,
    pub offset: Option<u64>,
}

/// One cell of an INSERT VALUES row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertCell {
    Parameter(usize),
    Literal(Value),
    /// Anything that is not a bind marker or a plain literal.
    Expression,
}

/// Shape of an INSERT as far as key injection and insert routing need it.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertShape {
    pub table: String,
    pub columns: Vec<String>,
    pub values_rows: usize,
    pub placeholders_per_row: Vec<usize>,
    /// Cell-by-cell view of each VALUES row, aligned with `columns`.
    pub rows: Vec<Vec<InsertCell>>,
    pub is_insert_select: bool,
}

/// An aggregate projection that was given an alias, e.g.
/// `COUNT(*) AS c` -> `{alias: "c", function: "COUNT"}`. The merger needs
/// this to recompute aliased aggregates it cannot spot from column names.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateAlias {
    pub alias: String,
    pub function: String,
}

/// PostgreSQL-specific features spotted in a statement. Explicit fields, one
/// per recognized feature; routing never consults this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PgFeatures {
    pub jsonb_operators: Vec<String>,
    pub array_operators: Vec<String>,
    pub regex_operators: Vec<String>,
    pub ilike: bool,
    pub text_search: bool,
    pub returning: bool,
    pub pg_types: Vec<String>,
}

impl PgFeatures {
    pub fn is_empty(&self) -> bool {
        self.jsonb_operators.is_empty()
            && self.array_operators.is_empty()
            && self.regex_operators.is_empty()
            && !self.ilike
            && !self.text_search
            && !self.returning
            && self.pg_types.is_empty()
    }
}

/// Everything the rest of the pipeline needs to know about one statement.
#[derive(Debug, Clone)]
pub struct AnalyzedStatement {
    pub sql: String,
    pub kind: StatementKind,
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub joins: Vec<JoinClause>,
    pub ctes: Vec<CteClause>,
    pub subqueries: Vec<SubqueryClause>,
    pub window_functions: Vec<WindowFunction>,
    pub order_by: Vec<OrderByColumn>,
    pub group_by: Vec<String>,
    pub limit: Option<LimitInfo>,
    pub distinct: bool,
    pub insert: Option<InsertShape>,
    pub aggregate_aliases: Vec<AggregateAlias>,
    pub has_where: bool,
    pub select_star: bool,
    pub pg_features: PgFeatures,
    /// Maximum nesting depth of subqueries, feeding the complexity score.
    pub nesting_level: u32,
    /// True when the structured parse failed and the regex layer produced
    /// this result.
    pub from_fallback: bool,
}

impl AnalyzedStatement {
    pub fn empty(sql: &str, kind: StatementKind) -> Self {
        Self {
            sql: sql.to_string(),
            kind,
            tables: Vec::new(),
            columns: Vec::new(),
            predicates: Vec::new(),
            joins: Vec::new(),
            ctes: Vec::new(),
            subqueries: Vec::new(),
            window_functions: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            distinct: false,
            insert: None,
            aggregate_aliases: Vec::new(),
            has_where: false,
            select_star: false,
            pg_features: PgFeatures::default(),
            nesting_level: 0,
            from_fallback: false,
        }
    }
}
