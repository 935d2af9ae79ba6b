//! Drops declared columns nothing references.
//!
//! Runs to a fixpoint: removing a column removes its references, which can
//! make columns of deeper selects unused in turn.

use std::collections::HashSet;

use super::util;
use crate::ast::projector::Projection;
use crate::ast::query::{ColumnDecl, Select};
use crate::ast::visit::{self, Rewriter};
use crate::ast::TableAlias;

pub fn run(mut projection: Projection) -> Projection {
    loop {
        let used = util::referenced_columns(&projection);
        let mut pruner = Pruner {
            used: &used,
            changed: false,
        };
        projection = pruner.apply(projection);
        if !pruner.changed {
            return projection;
        }
    }
}

struct Pruner<'a> {
    used: &'a HashSet<(TableAlias, String)>,
    changed: bool,
}

impl Rewriter for Pruner<'_> {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        // A distinct select's column set is its semantics; leave it whole.
        if select.distinct {
            return walked;
        }
        let current = walked.as_ref().unwrap_or(select);
        let mut kept: Vec<ColumnDecl> = current
            .columns
            .iter()
            .filter(|c| self.used.contains(&(select.alias, c.name.clone())))
            .cloned()
            .collect();
        if kept.is_empty() {
            // A select must declare something; keep the first original column.
            if let Some(first) = current.columns.first() {
                kept.push(first.clone());
            }
        }
        if kept.len() == current.columns.len() {
            return walked;
        }
        self.changed = true;
        let mut out = current.clone();
        out.columns = kept;
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{ColumnRef, Expr};
    use crate::ast::projector::Projector;
    use crate::ast::query::{ColumnDecl, Source, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    #[test]
    fn test_unreferenced_columns_are_dropped() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "customers".into(),
        }));
        for name in ["id", "name", "city"] {
            select.columns.push(ColumnDecl::new(
                name,
                Expr::Column(ColumnRef::new(table, name, SqlType::Text)),
            ));
        }
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            select.alias,
            "name",
            SqlType::Text,
        )));
        let pruned = run(Projection::new(select, projector));
        assert_eq!(pruned.select.columns.len(), 1);
        assert_eq!(pruned.select.columns[0].name, "name");
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "customers".into(),
        }));
        for name in ["id", "name", "city"] {
            select.columns.push(ColumnDecl::new(
                name,
                Expr::Column(ColumnRef::new(table, name, SqlType::Text)),
            ));
        }
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            select.alias,
            "name",
            SqlType::Text,
        )));
        let once = run(Projection::new(select, projector));
        let twice = run(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fully_referenced_select_is_untouched() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "customers".into(),
        }));
        for name in ["id", "name"] {
            select.columns.push(ColumnDecl::new(
                name,
                Expr::Column(ColumnRef::new(table, name, SqlType::Text)),
            ));
        }
        let projector = Projector::Record(vec![
            (
                "id".into(),
                Projector::Expr(Expr::Column(ColumnRef::new(
                    select.alias,
                    "id",
                    SqlType::Text,
                ))),
            ),
            (
                "name".into(),
                Projector::Expr(Expr::Column(ColumnRef::new(
                    select.alias,
                    "name",
                    SqlType::Text,
                ))),
            ),
        ]);
        let projection = Projection::new(select, projector);
        let used = util::referenced_columns(&projection);
        let mut pruner = Pruner {
            used: &used,
            changed: false,
        };
        assert!(pruner.rewrite_select(&projection.select).is_none());
        assert!(!pruner.changed);
    }

    #[test]
    fn test_distinct_select_keeps_all_columns() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.distinct = true;
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "customers".into(),
        }));
        for name in ["id", "name"] {
            select.columns.push(ColumnDecl::new(
                name,
                Expr::Column(ColumnRef::new(table, name, SqlType::Text)),
            ));
        }
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            select.alias,
            "name",
            SqlType::Text,
        )));
        let pruned = run(Projection::new(select, projector));
        assert_eq!(pruned.select.columns.len(), 2);
    }
}
