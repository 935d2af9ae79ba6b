//! Collapses duplicate column declarations within a select.
//!
//! Two columns declaring the same expression are one column; references to
//! the dropped names repoint at the kept one. Runs to a fixpoint because
//! repointing can make further declarations identical.

use super::Remapper;
use crate::ast::expr::ColumnRef;
use crate::ast::projector::Projection;
use crate::ast::query::Select;
use crate::ast::visit::{self, Rewriter};
use crate::binder::columns::ColumnMap;

pub fn run(mut projection: Projection) -> Projection {
    loop {
        let mut dedup = Dedup {
            renames: ColumnMap::new(),
        };
        projection = dedup.apply(projection);
        if dedup.renames.is_empty() {
            return projection;
        }
        projection = Remapper::new(&dedup.renames).apply(projection);
    }
}

struct Dedup {
    renames: ColumnMap,
}

impl Rewriter for Dedup {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        let mut kept: Vec<crate::ast::query::ColumnDecl> =
            Vec::with_capacity(current.columns.len());
        let mut dropped = false;
        for decl in &current.columns {
            match kept.iter().find(|k| k.expr == decl.expr) {
                Some(keeper) => {
                    self.renames.insert(
                        (select.alias, decl.name.clone()),
                        ColumnRef::new(select.alias, keeper.name.clone(), keeper.sql_type()),
                    );
                    dropped = true;
                }
                None => kept.push(decl.clone()),
            }
        }
        if !dropped {
            return walked;
        }
        let mut out = current.clone();
        out.columns = kept;
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::Expr;
    use crate::ast::projector::Projector;
    use crate::ast::query::{ColumnDecl, Source, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    #[test]
    fn test_distinct_declarations_are_untouched() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "orders".into(),
        }));
        select.columns.push(ColumnDecl::new(
            "total",
            Expr::Column(ColumnRef::new(table, "total", SqlType::Decimal)),
        ));
        select.columns.push(ColumnDecl::new(
            "amount",
            Expr::Column(ColumnRef::new(table, "amount", SqlType::Decimal)),
        ));
        let mut dedup = Dedup {
            renames: ColumnMap::new(),
        };
        assert!(dedup.rewrite_select(&select).is_none());
        assert!(dedup.renames.is_empty());
    }

    #[test]
    fn test_duplicate_declaration_collapses_and_repoints() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        let alias = select.alias;
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "orders".into(),
        }));
        let expr = Expr::Column(ColumnRef::new(table, "total", SqlType::Decimal));
        select.columns.push(ColumnDecl::new("a", expr.clone()));
        select.columns.push(ColumnDecl::new("b", expr));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            alias,
            "b",
            SqlType::Decimal,
        )));
        let result = run(Projection::new(select, projector));
        assert_eq!(result.select.columns.len(), 1);
        match &result.projector {
            Projector::Expr(Expr::Column(c)) => assert_eq!(c.name, "a"),
            other => panic!("unexpected projector {:?}", other),
        }
    }
}
