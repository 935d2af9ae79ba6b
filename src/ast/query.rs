//! Relational nodes: tables, selects and joins.

use serde::{Deserialize, Serialize};

use crate::ast::alias::TableAlias;
use crate::ast::expr::{Expr, OrderExpr};
use crate::types::SqlType;

/// One physical table occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSource {
    pub alias: TableAlias,
    pub name: String,
}

/// A from-clause source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Table(TableSource),
    Select(Box<Select>),
    Join(Box<Join>),
}

impl Source {
    /// The aliases this source makes visible to the select directly over it.
    pub fn declared_aliases(&self) -> Vec<TableAlias> {
        match self {
            Source::Table(t) => vec![t.alias],
            Source::Select(s) => vec![s.alias],
            Source::Join(j) => {
                let mut aliases = j.left.declared_aliases();
                aliases.extend(j.right.declared_aliases());
                aliases
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Cross,
    Inner,
    LeftOuter,
    /// Correlated lateral join; the right side may reference the left.
    CrossApply,
    /// Correlated lateral join preserving left rows with no match.
    OuterApply,
    /// Left-outer join whose right side yields at most one row per left row,
    /// produced by the singleton-projection rewrite.
    SingletonLeftOuter,
}

impl JoinKind {
    pub fn is_apply(&self) -> bool {
        matches!(self, JoinKind::CrossApply | JoinKind::OuterApply)
    }

    pub fn preserves_left(&self) -> bool {
        matches!(
            self,
            JoinKind::LeftOuter | JoinKind::OuterApply | JoinKind::SingletonLeftOuter
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub left: Source,
    pub right: Source,
    pub condition: Option<Expr>,
}

/// One declared output column of a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub expr: Expr,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    pub fn sql_type(&self) -> SqlType {
        self.expr.sql_type()
    }
}

/// A select: the unit of SQL retrieval.
///
/// A select's declared columns are the only values visible to anything built
/// on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub alias: TableAlias,
    pub columns: Vec<ColumnDecl>,
    pub from: Option<Source>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderExpr>,
    pub group_by: Vec<Expr>,
    pub distinct: bool,
    pub skip: Option<Expr>,
    pub take: Option<Expr>,
    /// Pending direction flip; realized by the order-by rewrite, never by
    /// literally reversing rows.
    pub reverse: bool,
}

impl Select {
    pub fn new(alias: TableAlias) -> Self {
        Self {
            alias,
            columns: vec![],
            from: None,
            where_clause: None,
            order_by: vec![],
            group_by: vec![],
            distinct: false,
            skip: None,
            take: None,
            reverse: false,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn declares_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// A select adds nothing beyond projection when all row-shaping clauses
    /// are absent. Such selects are candidates for subquery merging.
    pub fn is_plain_projection(&self) -> bool {
        self.where_clause.is_none()
            && self.order_by.is_empty()
            && self.group_by.is_empty()
            && !self.distinct
            && self.skip.is_none()
            && self.take.is_none()
            && !self.reverse
    }

    /// Whether every declared column is a bare column reference.
    pub fn has_simple_columns(&self) -> bool {
        self.columns
            .iter()
            .all(|c| matches!(c.expr, Expr::Column(_)))
    }

    /// Declare `expr` as an output column, reusing an existing declaration of
    /// the same expression. Returns the declared column name.
    pub fn declare(&mut self, preferred: &str, expr: Expr) -> String {
        if let Some(existing) = self.columns.iter().find(|c| c.expr == expr) {
            return existing.name.clone();
        }
        let name = self.unique_column_name(preferred);
        self.columns.push(ColumnDecl::new(name.clone(), expr));
        name
    }

    fn unique_column_name(&self, preferred: &str) -> String {
        if !self.declares_column(preferred) {
            return preferred.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}{}", preferred, n);
            if !self.declares_column(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::alias::AliasGenerator;
    use crate::ast::expr::ColumnRef;

    #[test]
    fn test_declare_reuses_identical_expression() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        let expr = Expr::Column(ColumnRef::new(table, "id", SqlType::Int));
        let first = select.declare("id", expr.clone());
        let second = select.declare("id", expr);
        assert_eq!(first, second);
        assert_eq!(select.columns.len(), 1);
    }

    #[test]
    fn test_declare_uniquifies_names() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.declare("id", Expr::Column(ColumnRef::new(table, "a", SqlType::Int)));
        let renamed = select.declare("id", Expr::Column(ColumnRef::new(table, "b", SqlType::Int)));
        assert_eq!(renamed, "id1");
    }

    #[test]
    fn test_join_declared_aliases() {
        let mut aliases = AliasGenerator::new();
        let left = TableSource {
            alias: aliases.fresh(),
            name: "a".into(),
        };
        let right = TableSource {
            alias: aliases.fresh(),
            name: "b".into(),
        };
        let join = Source::Join(Box::new(Join {
            kind: JoinKind::Cross,
            left: Source::Table(left.clone()),
            right: Source::Table(right.clone()),
            condition: None,
        }));
        assert_eq!(join.declared_aliases(), vec![left.alias, right.alias]);
    }
}
