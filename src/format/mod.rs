//! SQL rendering: canonical AST to dialect SQL text plus an ordered
//! parameter list.
//!
//! The formatter is the first place aliases get printable names: every
//! source occurrence is numbered `t0`, `t1`, ... in rendering order, so the
//! same canonical tree always formats to the same text. AST shapes with no
//! rendering for the active dialect are compile failures: they mean a
//! rewrite pass that should have eliminated the shape did not run.

pub mod dialect;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

pub use dialect::{ApplyStyle, Dialect, PagingStyle};
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use sqlserver::SqlServer;

use std::collections::{HashMap, HashSet};

use crate::ast::command::{DeclarationCommand, DeleteCommand, InsertCommand, UpdateCommand};
use crate::ast::expr::{AggregateFunc, BinaryOp, Expr, InSet, NamedValue, SortOrder};
use crate::ast::query::{Join, JoinKind, Select, Source};
use crate::ast::value::Value;
use crate::ast::TableAlias;
use crate::binder::crud::GENERATED_ID_FUNC;
use crate::error::{RelqError, RelqResult};

/// One renderable statement: SQL text plus its parameters in placeholder
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedQuery {
    pub sql: String,
    pub params: Vec<NamedValue>,
}

pub fn format_select(dialect: &dyn Dialect, select: &Select) -> RelqResult<FormattedQuery> {
    let mut f = Formatter::new(dialect);
    f.write_select(select)?;
    Ok(f.finish())
}

pub fn format_insert(dialect: &dyn Dialect, insert: &InsertCommand) -> RelqResult<FormattedQuery> {
    let mut f = Formatter::new(dialect);
    f.bare.insert(insert.table.alias);
    f.sql.push_str("INSERT INTO ");
    f.push_quoted(&insert.table.name);
    f.sql.push_str(" (");
    for (i, a) in insert.assignments.iter().enumerate() {
        if i > 0 {
            f.sql.push_str(", ");
        }
        f.push_quoted(&a.column);
    }
    f.sql.push_str(") VALUES (");
    for (i, a) in insert.assignments.iter().enumerate() {
        if i > 0 {
            f.sql.push_str(", ");
        }
        f.write_expr(&a.value)?;
    }
    f.sql.push(')');
    Ok(f.finish())
}

pub fn format_update(dialect: &dyn Dialect, update: &UpdateCommand) -> RelqResult<FormattedQuery> {
    let mut f = Formatter::new(dialect);
    f.bare.insert(update.table.alias);
    f.sql.push_str("UPDATE ");
    f.push_quoted(&update.table.name);
    f.sql.push_str(" SET ");
    for (i, a) in update.assignments.iter().enumerate() {
        if i > 0 {
            f.sql.push_str(", ");
        }
        f.push_quoted(&a.column);
        f.sql.push_str(" = ");
        f.write_expr(&a.value)?;
    }
    f.sql.push_str(" WHERE ");
    f.write_expr(&update.where_clause)?;
    Ok(f.finish())
}

pub fn format_delete(dialect: &dyn Dialect, delete: &DeleteCommand) -> RelqResult<FormattedQuery> {
    let mut f = Formatter::new(dialect);
    f.bare.insert(delete.table.alias);
    f.sql.push_str("DELETE FROM ");
    f.push_quoted(&delete.table.name);
    f.sql.push_str(" WHERE ");
    f.write_expr(&delete.where_clause)?;
    Ok(f.finish())
}

pub fn format_declaration(
    dialect: &dyn Dialect,
    decl: &DeclarationCommand,
) -> RelqResult<FormattedQuery> {
    format_select(dialect, &decl.source)
}

struct Formatter<'a> {
    dialect: &'a dyn Dialect,
    sql: String,
    params: Vec<NamedValue>,
    names: HashMap<TableAlias, String>,
    /// Aliases rendered without a qualifier (update/delete targets).
    bare: HashSet<TableAlias>,
}

impl<'a> Formatter<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: vec![],
            names: HashMap::new(),
            bare: HashSet::new(),
        }
    }

    fn finish(self) -> FormattedQuery {
        FormattedQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn untranslatable(&self, construct: &'static str) -> RelqError {
        RelqError::Untranslatable {
            construct,
            dialect: self.dialect.name(),
        }
    }

    fn alias_name(&mut self, alias: TableAlias) -> String {
        let next = format!("t{}", self.names.len());
        self.names.entry(alias).or_insert(next).clone()
    }

    fn push_quoted(&mut self, name: &str) {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
    }

    /// Render an expression into its own string, for clause builders that
    /// need the text out of line.
    fn render(&mut self, expr: &Expr) -> RelqResult<String> {
        let saved = std::mem::take(&mut self.sql);
        let result = self.write_expr(expr);
        let rendered = std::mem::replace(&mut self.sql, saved);
        result.map(|()| rendered)
    }

    /// Name the sources a select's clauses may reference before any clause
    /// renders, so alias numbering is independent of clause order.
    fn register_sources(&mut self, source: &Source) {
        match source {
            Source::Table(t) => {
                self.alias_name(t.alias);
            }
            Source::Select(s) => {
                self.alias_name(s.alias);
            }
            Source::Join(j) => {
                self.register_sources(&j.left);
                self.register_sources(&j.right);
            }
        }
    }

    fn write_select(&mut self, select: &Select) -> RelqResult<()> {
        // Only the order-by rewrite realizes this flag into sort directions.
        if select.reverse {
            return Err(self.untranslatable("an unrealized row reversal"));
        }
        if let Some(from) = &select.from {
            self.register_sources(from);
        }
        self.sql.push_str("SELECT ");
        if select.distinct {
            self.sql.push_str("DISTINCT ");
        }
        if self.dialect.paging_style() == PagingStyle::RowNumber {
            if select.skip.is_some() {
                return Err(self.untranslatable("an offset clause"));
            }
            if let Some(take) = &select.take {
                self.sql.push_str("TOP (");
                self.write_expr(take)?;
                self.sql.push_str(") ");
            }
        }
        if select.columns.is_empty() {
            self.sql.push_str("NULL");
        } else {
            for (i, c) in select.columns.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.write_expr(&c.expr)?;
                self.sql.push_str(" AS ");
                self.push_quoted(&c.name);
            }
        }
        if let Some(from) = &select.from {
            self.sql.push_str(" FROM ");
            self.write_source(from)?;
        }
        if let Some(where_clause) = &select.where_clause {
            self.sql.push_str(" WHERE ");
            self.write_expr(where_clause)?;
        }
        if !select.group_by.is_empty() {
            self.sql.push_str(" GROUP BY ");
            for (i, g) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.write_expr(g)?;
            }
        }
        if !select.order_by.is_empty() {
            self.sql.push_str(" ORDER BY ");
            for (i, o) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.write_expr(&o.expr)?;
                self.sql.push_str(match o.order {
                    SortOrder::Asc => " ASC",
                    SortOrder::Desc => " DESC",
                });
            }
        }
        if self.dialect.paging_style() == PagingStyle::LimitOffset {
            let limit = match &select.take {
                Some(take) => Some(self.render(take)?),
                None => None,
            };
            let offset = match &select.skip {
                Some(skip) => Some(self.render(skip)?),
                None => None,
            };
            if limit.is_some() || offset.is_some() {
                let clause = self
                    .dialect
                    .limit_offset(limit.as_deref(), offset.as_deref());
                self.sql.push_str(&clause);
            }
        }
        Ok(())
    }

    fn write_source(&mut self, source: &Source) -> RelqResult<()> {
        match source {
            Source::Table(t) => {
                self.push_quoted(&t.name);
                self.sql.push_str(" AS ");
                let name = self.alias_name(t.alias);
                self.sql.push_str(&name);
            }
            Source::Select(s) => {
                self.sql.push('(');
                self.write_select(s)?;
                self.sql.push_str(") AS ");
                let name = self.alias_name(s.alias);
                self.sql.push_str(&name);
            }
            Source::Join(j) => self.write_join(j)?,
        }
        Ok(())
    }

    fn write_join(&mut self, join: &Join) -> RelqResult<()> {
        self.write_source(&join.left)?;
        match join.kind {
            JoinKind::Cross => {
                self.sql.push_str(" CROSS JOIN ");
                self.write_source(&join.right)?;
            }
            JoinKind::Inner | JoinKind::LeftOuter | JoinKind::SingletonLeftOuter => {
                self.sql.push_str(if join.kind == JoinKind::Inner {
                    " INNER JOIN "
                } else {
                    " LEFT OUTER JOIN "
                });
                self.write_source(&join.right)?;
                self.sql.push_str(" ON ");
                match &join.condition {
                    Some(condition) => self.write_expr(condition)?,
                    None => self.sql.push_str("1 = 1"),
                }
            }
            JoinKind::CrossApply | JoinKind::OuterApply => {
                let style = self
                    .dialect
                    .apply_style()
                    .ok_or_else(|| self.untranslatable("a correlated join"))?;
                let preserves = join.kind == JoinKind::OuterApply;
                match style {
                    ApplyStyle::Apply => {
                        self.sql.push_str(if preserves {
                            " OUTER APPLY "
                        } else {
                            " CROSS APPLY "
                        });
                        self.write_source(&join.right)?;
                    }
                    ApplyStyle::Lateral => {
                        if preserves {
                            self.sql.push_str(" LEFT OUTER JOIN LATERAL ");
                            self.write_source(&join.right)?;
                            self.sql.push_str(" ON 1 = 1");
                        } else {
                            self.sql.push_str(" CROSS JOIN LATERAL ");
                            self.write_source(&join.right)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn write_expr(&mut self, expr: &Expr) -> RelqResult<()> {
        match expr {
            Expr::Value(v) => self.write_value(v)?,
            Expr::Column(c) => {
                if !self.bare.contains(&c.alias) {
                    let name = self.alias_name(c.alias);
                    self.sql.push_str(&name);
                    self.sql.push('.');
                }
                self.push_quoted(&c.name);
            }
            Expr::Named(n) => {
                let ordinal = self.param_ordinal(n);
                let placeholder = self.dialect.placeholder(ordinal);
                self.sql.push_str(&placeholder);
            }
            Expr::Binary { op, left, right } => {
                self.sql.push('(');
                self.write_expr(left)?;
                self.sql.push(' ');
                self.sql.push_str(binary_op_sql(*op));
                self.sql.push(' ');
                self.write_expr(right)?;
                self.sql.push(')');
            }
            Expr::Not(inner) => {
                self.sql.push_str("NOT (");
                self.write_expr(inner)?;
                self.sql.push(')');
            }
            Expr::Negate(inner) => {
                self.sql.push_str("(-");
                self.write_expr(inner)?;
                self.sql.push(')');
            }
            Expr::IsNull {
                expr: inner,
                negated,
            } => {
                self.sql.push('(');
                self.write_expr(inner)?;
                self.sql
                    .push_str(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::Function { name, args } => {
                if name == GENERATED_ID_FUNC {
                    self.sql.push_str(self.dialect.generated_id_expression());
                } else {
                    self.sql.push_str(name);
                    self.sql.push('(');
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            self.sql.push_str(", ");
                        }
                        self.write_expr(a)?;
                    }
                    self.sql.push(')');
                }
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                if *distinct && !self.dialect.supports_distinct_in_aggregate() {
                    return Err(self.untranslatable("DISTINCT inside an aggregate"));
                }
                self.sql.push_str(func.sql_name());
                self.sql.push('(');
                if *distinct {
                    self.sql.push_str("DISTINCT ");
                }
                match arg {
                    Some(a) => self.write_expr(a)?,
                    None => {
                        debug_assert_eq!(*func, AggregateFunc::Count);
                        self.sql.push('*');
                    }
                }
                self.sql.push(')');
            }
            Expr::Scalar(select) => {
                self.sql.push('(');
                self.write_select(select)?;
                self.sql.push(')');
            }
            Expr::Exists(select) => {
                self.sql.push_str("EXISTS (");
                self.write_select(select)?;
                self.sql.push(')');
            }
            Expr::In { expr: inner, set } => match set {
                InSet::List(items) if items.is_empty() => self.sql.push_str("(1 = 0)"),
                InSet::List(items) => {
                    self.sql.push('(');
                    self.write_expr(inner)?;
                    self.sql.push_str(" IN (");
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            self.sql.push_str(", ");
                        }
                        self.write_expr(item)?;
                    }
                    self.sql.push_str("))");
                }
                InSet::Query(select) => {
                    self.sql.push('(');
                    self.write_expr(inner)?;
                    self.sql.push_str(" IN (");
                    self.write_select(select)?;
                    self.sql.push_str("))");
                }
            },
            Expr::RowNumber { order_by } => {
                self.sql.push_str("ROW_NUMBER() OVER (ORDER BY ");
                for (i, o) in order_by.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.write_expr(&o.expr)?;
                    self.sql.push_str(match o.order {
                        SortOrder::Asc => " ASC",
                        SortOrder::Desc => " DESC",
                    });
                }
                self.sql.push(')');
            }
            Expr::AggregateSubquery(_) => {
                return Err(self.untranslatable("an unresolved grouped aggregate"));
            }
            Expr::RowCompare { .. } => {
                return Err(self.untranslatable("a composite equality"));
            }
        }
        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> RelqResult<()> {
        match value {
            Value::Null => self.sql.push_str("NULL"),
            Value::Bool(b) => self.sql.push_str(self.dialect.bool_literal(*b)),
            Value::Int(n) => self.sql.push_str(&n.to_string()),
            Value::Float(n) => self.sql.push_str(&n.to_string()),
            Value::Decimal(d) => self.sql.push_str(&d.to_string()),
            Value::Text(s) => {
                self.sql.push('\'');
                self.sql.push_str(&s.replace('\'', "''"));
                self.sql.push('\'');
            }
            Value::Uuid(u) => {
                self.sql.push('\'');
                self.sql.push_str(&u.to_string());
                self.sql.push('\'');
            }
            Value::DateTime(t) => {
                self.sql.push('\'');
                self.sql.push_str(&t.to_rfc3339());
                self.sql.push('\'');
            }
            Value::Bytes(_) => return Err(self.untranslatable("a byte-array literal")),
        }
        Ok(())
    }

    fn param_ordinal(&mut self, named: &NamedValue) -> usize {
        if !self.dialect.positional_parameters() {
            if let Some(pos) = self.params.iter().position(|p| p.name == named.name) {
                return pos + 1;
            }
        }
        self.params.push(named.clone());
        self.params.len()
    }
}

fn binary_op_sql(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
    }
}
