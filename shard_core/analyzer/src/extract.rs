use crate::statement::{
    AggregateAlias, AnalyzedStatement, CteClause, InsertShape, JoinClause, JoinType, OrderByColumn,
    Predicate, PredicateOp, PredicateValue, StatementKind, SubqueryClause, SubqueryKind,
    WindowFunction,
};
use common::Value;
use sqlparser::ast::{
    BinaryOperator, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, Join,
    JoinConstraint, JoinOperator, ObjectName, ObjectNamePart, Query, Select, SelectItem, SetExpr,
    Statement, TableFactor, TableObject, TableWithJoins, UnaryOperator, Value as LiteralValue,
    WindowType,
};
use std::collections::HashSet;

const AGGREGATE_FUNCTIONS: [&str; 5] = ["COUNT", "SUM", "AVG", "MIN", "MAX"];

/// Walks one parsed statement and fills in the analyzed record. Placeholder
/// positions are assigned in source order, so traversal follows the textual
/// clause order of each statement form.
pub struct Collector {
    out: AnalyzedStatement,
    seen_tables: HashSet<String>,
    seen_columns: HashSet<String>,
    cte_names: HashSet<String>,
    placeholders: usize,
    depth: u32,
}

impl Collector {
    pub fn new(sql: &str, kind: StatementKind) -> Self {
        Self {
            out: AnalyzedStatement::empty(sql, kind),
            seen_tables: HashSet::new(),
            seen_columns: HashSet::new(),
            cte_names: HashSet::new(),
            placeholders: 0,
            depth: 0,
        }
    }

    pub fn collect(mut self, stmt: &Statement) -> AnalyzedStatement {
        self.collect_statement(stmt);
        self.out
    }

    fn push_table(&mut self, name: String) {
        if name.is_empty() || self.cte_names.contains(&name) {
            return;
        }
        if self.seen_tables.insert(name.clone()) {
            self.out.tables.push(name);
        }
    }

    fn push_column(&mut self, name: String) {
        if name.is_empty() {
            return;
        }
        if self.seen_columns.insert(name.clone()) {
            self.out.columns.push(name);
        }
    }

    fn next_parameter(&mut self) -> usize {
        let idx = self.placeholders;
        self.placeholders += 1;
        idx
    }

    fn collect_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Query(query) => self.collect_query(query),
            Statement::Insert(insert) => {
                let table = match &insert.table {
                    TableObject::TableName(name) => object_name_text(name),
                    other => other.to_string(),
                };
                self.push_table(table.clone());

                let columns: Vec<String> =
                    insert.columns.iter().map(|c| c.value.clone()).collect();
                for column in &columns {
                    self.push_column(column.clone());
                }

                let mut values_rows = 0;
                let mut placeholders_per_row = Vec::new();
                let mut cell_rows = Vec::new();
                let mut is_insert_select = false;
                if let Some(source) = &insert.source {
                    match source.body.as_ref() {
                        SetExpr::Values(values) => {
                            values_rows = values.rows.len();
                            for row in &values.rows {
                                let before = self.placeholders;
                                let mut cells = Vec::with_capacity(row.len());
                                for expr in row {
                                    cells.push(self.insert_cell(expr));
                                }
                                placeholders_per_row.push(self.placeholders - before);
                                cell_rows.push(cells);
                            }
                        }
                        _ => {
                            is_insert_select = true;
                            let before = self.out.tables.len();
                            self.enter_subquery();
                            self.collect_query(source);
                            self.leave_subquery();
                            let inner_tables = self.out.tables[before..].to_vec();
                            self.out.subqueries.push(SubqueryClause {
                                kind: SubqueryKind::InsertSelect,
                                inner_tables,
                            });
                        }
                    }
                }
                self.out.insert = Some(InsertShape {
                    table,
                    columns,
                    values_rows,
                    placeholders_per_row,
                    rows: cell_rows,
                    is_insert_select,
                });
            }
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                self.collect_table_with_joins(table);
                for assignment in assignments {
                    self.push_column(assignment.target.to_string());
                    self.walk_expr(&assignment.value);
                }
                if let Some(selection) = selection {
                    self.out.has_where = true;
                    self.collect_predicates(selection);
                }
            }
            Statement::Delete(delete) => {
                for name in &delete.tables {
                    let text = object_name_text(name);
                    self.push_table(text);
                }
                let froms = match &delete.from {
                    FromTable::WithFromKeyword(tables) => tables,
                    FromTable::WithoutKeyword(tables) => tables,
                };
                for twj in froms {
                    self.collect_table_with_joins(twj);
                }
                if let Some(selection) = &delete.selection {
                    self.out.has_where = true;
                    self.collect_predicates(selection);
                }
            }
            Statement::CreateTable(create) => {
                self.push_table(object_name_text(&create.name));
                for column in &create.columns {
                    self.push_column(column.name.value.clone());
                }
            }
            Statement::Drop { names, .. } => {
                for name in names {
                    let text = object_name_text(name);
                    self.push_table(text);
                }
            }
            Statement::AlterTable { name, .. } => {
                self.push_table(object_name_text(name));
            }
            _ => {}
        }
    }

    fn collect_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.clone();
                // Register first so a recursive body does not list itself.
                self.cte_names.insert(name.clone());
                let before = self.out.tables.len();
                self.enter_subquery();
                self.collect_query(&cte.query);
                self.leave_subquery();
                let inner_tables = self.out.tables[before..].to_vec();
                self.out.ctes.push(CteClause {
                    name,
                    columns: cte.alias.columns.iter().map(|c| c.to_string()).collect(),
                    inner_tables,
                    recursive: with.recursive,
                });
            }
        }
        self.collect_set_expr(&query.body);
    }

    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.collect_select(select),
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.walk_expr(expr);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_select(&mut self, select: &Select) {
        if select.distinct.is_some() {
            self.out.distinct = true;
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    if let Some(column) = column_of(expr) {
                        self.push_column(column);
                    }
                    self.walk_expr(expr);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    if let Expr::Function(function) = expr {
                        let name = object_name_text(&function.name).to_uppercase();
                        if AGGREGATE_FUNCTIONS.contains(&name.as_str())
                            && function.over.is_none()
                        {
                            self.out.aggregate_aliases.push(AggregateAlias {
                                alias: alias.value.clone(),
                                function: name,
                            });
                        }
                    }
                    self.push_column(alias.value.clone());
                    self.walk_expr(expr);
                }
                SelectItem::Wildcard(_) => {
                    self.out.select_star = true;
                    self.push_column("*".to_string());
                }
                SelectItem::QualifiedWildcard(..) => {
                    self.out.select_star = true;
                }
                #[allow(unreachable_patterns)]
                _ => {}
            }
        }
        for twj in &select.from {
            self.collect_table_with_joins(twj);
        }
        if let Some(selection) = &select.selection {
            self.out.has_where = true;
            self.collect_predicates(selection);
        }
        if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                if let Some(column) = column_of(expr) {
                    self.out.group_by.push(column.clone());
                    self.push_column(column);
                }
            }
        }
        if let Some(having) = &select.having {
            self.walk_expr(having);
        }
    }

    fn collect_table_with_joins(&mut self, twj: &TableWithJoins) {
        let left = self.collect_table_factor(&twj.relation);
        let mut previous = left;
        for join in &twj.joins {
            let right = self.collect_table_factor(&join.relation);
            let (join_type, condition) = self.classify_join(join);
            self.out.joins.push(JoinClause {
                join_type,
                left: previous.clone().unwrap_or_default(),
                right: right.clone().unwrap_or_default(),
                condition,
            });
            if right.is_some() {
                previous = right;
            }
        }
    }

    fn collect_table_factor(&mut self, factor: &TableFactor) -> Option<String> {
        match factor {
            TableFactor::Table { name, .. } => {
                let text = object_name_text(name);
                self.push_table(text.clone());
                Some(text)
            }
            TableFactor::Derived { subquery, .. } => {
                let before = self.out.tables.len();
                self.enter_subquery();
                self.collect_query(subquery);
                self.leave_subquery();
                let inner_tables = self.out.tables[before..].to_vec();
                self.out.subqueries.push(SubqueryClause {
                    kind: SubqueryKind::From,
                    inner_tables,
                });
                None
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.collect_table_with_joins(table_with_joins);
                None
            }
            _ => None,
        }
    }

    fn classify_join(&mut self, join: &Join) -> (JoinType, Option<String>) {
        match &join.join_operator {
            JoinOperator::Inner(constraint) => (JoinType::Inner, self.constraint_text(constraint)),
            JoinOperator::LeftOuter(constraint) => {
                (JoinType::Left, self.constraint_text(constraint))
            }
            JoinOperator::RightOuter(constraint) => {
                (JoinType::Right, self.constraint_text(constraint))
            }
            JoinOperator::FullOuter(constraint) => {
                (JoinType::Full, self.constraint_text(constraint))
            }
            JoinOperator::CrossJoin => (JoinType::Cross, None),
            _ => {
                // Dialect-flavored operators (bare JOIN, STRAIGHT_JOIN, ...)
                // collapse through the rendered form.
                let rendered = join.to_string();
                let upper = rendered.to_uppercase();
                let join_type = if upper.contains("LEFT") {
                    JoinType::Left
                } else if upper.contains("RIGHT") {
                    JoinType::Right
                } else if upper.contains("FULL") {
                    JoinType::Full
                } else if upper.contains("CROSS") {
                    JoinType::Cross
                } else {
                    JoinType::Inner
                };
                let condition = upper
                    .find(" ON ")
                    .map(|at| rendered[at + 4..].trim().to_string());
                if let Some(text) = &condition {
                    self.placeholders += text.matches('?').count();
                }
                (join_type, condition)
            }
        }
    }

    fn constraint_text(&mut self, constraint: &JoinConstraint) -> Option<String> {
        match constraint {
            JoinConstraint::On(expr) => {
                let text = expr.to_string();
                self.walk_expr(expr);
                Some(text)
            }
            JoinConstraint::Using(columns) => Some(format!(
                "USING({})",
                columns
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            _ => None,
        }
    }

    /// WHERE-tree walk: AND/OR recurse, comparisons on columns become
    /// predicates, everything else falls back to the generic walk so
    /// placeholder positions stay accurate.
    fn collect_predicates(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
                    self.collect_predicates(left);
                    self.collect_predicates(right);
                    return;
                }
                let comparison = comparison_op(op);
                if let (Some(op), Some(column)) = (comparison, column_of(left)) {
                    match self.resolve_value(right) {
                        Some(value) => {
                            self.push_column(column.clone());
                            self.out.predicates.push(Predicate { column, op, value });
                        }
                        None => {}
                    }
                } else {
                    self.walk_expr(left);
                    self.walk_expr(right);
                }
            }
            Expr::InList {
                expr: target,
                list,
                negated,
            } => {
                if let (Some(column), false) = (column_of(target), *negated) {
                    let mut values = Vec::new();
                    for item in list {
                        if let Some(value) = self.resolve_value(item) {
                            values.push(value);
                        }
                    }
                    if !values.is_empty() {
                        self.push_column(column.clone());
                        self.out.predicates.push(Predicate {
                            column,
                            op: PredicateOp::In,
                            value: PredicateValue::List(values),
                        });
                    }
                } else {
                    for item in list {
                        self.walk_expr(item);
                    }
                }
            }
            Expr::InSubquery { subquery, .. } => {
                self.record_subquery_set_expr(SubqueryKind::Where, subquery);
            }
            Expr::Exists { subquery, .. } => {
                self.record_subquery(SubqueryKind::Where, subquery);
            }
            Expr::Like {
                expr: target,
                pattern,
                ..
            }
            | Expr::ILike {
                expr: target,
                pattern,
                ..
            } => {
                if let Some(column) = column_of(target) {
                    if let Some(value) = self.resolve_value(pattern) {
                        self.push_column(column.clone());
                        self.out.predicates.push(Predicate {
                            column,
                            op: PredicateOp::Like,
                            value,
                        });
                        return;
                    }
                }
                self.walk_expr(pattern);
            }
            Expr::Between {
                expr: target,
                low,
                high,
                ..
            } => {
                if let Some(column) = column_of(target) {
                    self.push_column(column);
                }
                self.walk_expr(low);
                self.walk_expr(high);
            }
            Expr::Nested(inner) => self.collect_predicates(inner),
            Expr::UnaryOp { expr: inner, .. } => self.collect_predicates(inner),
            other => self.walk_expr(other),
        }
    }

    /// One INSERT VALUES cell, advancing the placeholder counter.
    fn insert_cell(&mut self, expr: &Expr) -> crate::statement::InsertCell {
        use crate::statement::InsertCell;
        let before = self.placeholders;
        match self.resolve_value(expr) {
            Some(PredicateValue::Parameter(idx)) => InsertCell::Parameter(idx),
            Some(PredicateValue::Literal(value)) => InsertCell::Literal(value),
            _ => {
                // resolve_value walked the expression; make sure a bind
                // marker buried in it still advanced the counter.
                debug_assert!(self.placeholders >= before);
                InsertCell::Expression
            }
        }
    }

    /// Comparison value: bind parameter (assigning its position) or literal.
    /// Anything else is walked generically and yields no predicate.
    fn resolve_value(&mut self, expr: &Expr) -> Option<PredicateValue> {
        match expr {
            Expr::Value(v) => self.resolve_literal(&v.value),
            Expr::Nested(inner) => self.resolve_value(inner),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr: inner,
            } => match self.resolve_value(inner) {
                Some(PredicateValue::Literal(Value::Int(v))) => {
                    Some(PredicateValue::Literal(Value::Int(-v)))
                }
                Some(PredicateValue::Literal(Value::Float(v))) => {
                    Some(PredicateValue::Literal(Value::Float(-v)))
                }
                other => other,
            },
            other => {
                self.walk_expr(other);
                None
            }
        }
    }

    fn resolve_literal(&mut self, value: &LiteralValue) -> Option<PredicateValue> {
        match value {
            LiteralValue::Placeholder(_) => {
                Some(PredicateValue::Parameter(self.next_parameter()))
            }
            LiteralValue::Number(text, _) => text
                .parse::<i64>()
                .ok()
                .map(Value::Int)
                .or_else(|| text.parse::<f64>().ok().map(Value::Float))
                .map(PredicateValue::Literal),
            LiteralValue::SingleQuotedString(s) | LiteralValue::DoubleQuotedString(s) => {
                Some(PredicateValue::Literal(Value::Text(s.clone())))
            }
            LiteralValue::Boolean(b) => Some(PredicateValue::Literal(Value::Bool(*b))),
            LiteralValue::Null => Some(PredicateValue::Literal(Value::Null)),
            _ => None,
        }
    }

    /// Generic expression walk: advances the placeholder counter and spots
    /// windows and subqueries anywhere in the tree. CASE arms are not mined.
    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Value(v) => {
                if matches!(v.value, LiteralValue::Placeholder(_)) {
                    self.next_parameter();
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::UnaryOp { expr: inner, .. } => self.walk_expr(inner),
            Expr::Nested(inner) => self.walk_expr(inner),
            Expr::Cast { expr: inner, .. } => self.walk_expr(inner),
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => self.walk_expr(inner),
            Expr::InList {
                expr: target, list, ..
            } => {
                self.walk_expr(target);
                for item in list {
                    self.walk_expr(item);
                }
            }
            Expr::InSubquery { subquery, .. } => {
                self.record_subquery_set_expr(SubqueryKind::Where, subquery);
            }
            Expr::Exists { subquery, .. } => {
                self.record_subquery(SubqueryKind::Where, subquery);
            }
            Expr::Subquery(subquery) => {
                self.record_subquery(SubqueryKind::Scalar, subquery);
            }
            Expr::Between {
                expr: target,
                low,
                high,
                ..
            } => {
                self.walk_expr(target);
                self.walk_expr(low);
                self.walk_expr(high);
            }
            Expr::Like {
                expr: target,
                pattern,
                ..
            }
            | Expr::ILike {
                expr: target,
                pattern,
                ..
            } => {
                self.walk_expr(target);
                self.walk_expr(pattern);
            }
            Expr::Function(function) => {
                if let Some(over) = &function.over {
                    self.record_window(object_name_text(&function.name), over);
                }
                match &function.args {
                    FunctionArguments::List(list) => {
                        for arg in &list.args {
                            match arg {
                                FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) => {
                                    self.walk_expr(inner)
                                }
                                FunctionArg::Named {
                                    arg: FunctionArgExpr::Expr(inner),
                                    ..
                                } => self.walk_expr(inner),
                                _ => {}
                            }
                        }
                    }
                    FunctionArguments::Subquery(subquery) => {
                        self.record_subquery(SubqueryKind::Scalar, subquery);
                    }
                    _ => {}
                }
            }
            Expr::Tuple(items) => {
                for item in items {
                    self.walk_expr(item);
                }
            }
            _ => {}
        }
    }

    fn record_subquery(&mut self, kind: SubqueryKind, subquery: &Query) {
        let before = self.out.tables.len();
        self.enter_subquery();
        self.collect_query(subquery);
        self.leave_subquery();
        let inner_tables = self.out.tables[before..].to_vec();
        self.out.subqueries.push(SubqueryClause { kind, inner_tables });
    }

    fn record_subquery_set_expr(&mut self, kind: SubqueryKind, subquery: &SetExpr) {
        let before = self.out.tables.len();
        self.enter_subquery();
        self.collect_set_expr(subquery);
        self.leave_subquery();
        let inner_tables = self.out.tables[before..].to_vec();
        self.out.subqueries.push(SubqueryClause { kind, inner_tables });
    }

    fn record_window(&mut self, function: String, over: &WindowType) {
        let window = match over {
            WindowType::WindowSpec(spec) => WindowFunction {
                function: function.to_uppercase(),
                partition_by: spec.partition_by.iter().map(|e| e.to_string()).collect(),
                order_by: spec
                    .order_by
                    .iter()
                    .map(|o| OrderByColumn {
                        column: o.expr.to_string(),
                        desc: o.to_string().to_uppercase().ends_with(" DESC"),
                    })
                    .collect(),
                frame: spec.window_frame.as_ref().map(|f| match &f.end_bound {
                    Some(end) => format!("{} BETWEEN {} AND {}", f.units, f.start_bound, end),
                    None => format!("{} {}", f.units, f.start_bound),
                }),
            },
            WindowType::NamedWindow(name) => WindowFunction {
                function: function.to_uppercase(),
                partition_by: Vec::new(),
                order_by: Vec::new(),
                frame: Some(name.to_string()),
            },
        };
        self.out.window_functions.push(window);
    }

    fn enter_subquery(&mut self) {
        self.depth += 1;
        if self.depth > self.out.nesting_level {
            self.out.nesting_level = self.depth;
        }
    }

    fn leave_subquery(&mut self) {
        self.depth -= 1;
    }
}

fn comparison_op(op: &BinaryOperator) -> Option<PredicateOp> {
    match op {
        BinaryOperator::Eq => Some(PredicateOp::Eq),
        BinaryOperator::NotEq => Some(PredicateOp::NotEq),
        BinaryOperator::Lt => Some(PredicateOp::Lt),
        BinaryOperator::LtEq => Some(PredicateOp::LtEq),
        BinaryOperator::Gt => Some(PredicateOp::Gt),
        BinaryOperator::GtEq => Some(PredicateOp::GtEq),
        _ => None,
    }
}

fn column_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => column_of(inner),
        _ => None,
    }
}

pub fn object_name_text(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            #[allow(unreachable_patterns)]
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}
