//! Deep duplication of bound subtrees.
//!
//! Aliases are identities: a duplicated subtree must never share declaration
//! sites with its original, so every declared alias is re-allocated and all
//! references inside the copy are repointed.

use std::collections::HashMap;

use crate::ast::alias::{AliasGenerator, TableAlias};
use crate::ast::expr::{AggregateSubquery, ColumnRef, Expr};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source, TableSource};
use crate::ast::visit::{self, Rewriter, Visitor};

/// Every alias declared by a select or table source within the tree.
pub fn declared_aliases(projection: &Projection) -> Vec<TableAlias> {
    let mut collector = DeclarationCollector::default();
    collector.visit_projection(projection);
    collector.found
}

#[derive(Default)]
struct DeclarationCollector {
    found: Vec<TableAlias>,
}

impl Visitor for DeclarationCollector {
    fn visit_select(&mut self, select: &Select) {
        self.found.push(select.alias);
        visit::visit_select_children(self, select);
    }

    fn visit_source(&mut self, source: &Source) {
        if let Source::Table(t) = source {
            self.found.push(t.alias);
        }
        visit::visit_source_children(self, source);
    }
}

/// Duplicate a projection, giving every declaration inside a fresh alias.
pub fn duplicate_projection(projection: &Projection, aliases: &mut AliasGenerator) -> Projection {
    let map: HashMap<TableAlias, TableAlias> = declared_aliases(projection)
        .into_iter()
        .map(|old| (old, aliases.fresh()))
        .collect();
    let mut duplicator = AliasDuplicator { map };
    Projection {
        select: duplicator
            .rewrite_select(&projection.select)
            .unwrap_or_else(|| projection.select.clone()),
        projector: duplicator
            .rewrite_projector(&projection.projector)
            .unwrap_or_else(|| projection.projector.clone()),
        aggregator: projection.aggregator,
    }
}

struct AliasDuplicator {
    map: HashMap<TableAlias, TableAlias>,
}

impl AliasDuplicator {
    fn renamed(&self, alias: TableAlias) -> TableAlias {
        self.map.get(&alias).copied().unwrap_or(alias)
    }
}

impl Rewriter for AliasDuplicator {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let mut out = visit::walk_select(self, select).unwrap_or_else(|| select.clone());
        out.alias = self.renamed(select.alias);
        Some(out)
    }

    fn rewrite_source(&mut self, source: &Source) -> Option<Source> {
        if let Source::Table(t) = source {
            return Some(Source::Table(TableSource {
                alias: self.renamed(t.alias),
                name: t.name.clone(),
            }));
        }
        visit::walk_source(self, source)
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        match expr {
            Expr::Column(c) => {
                let renamed = self.renamed(c.alias);
                (renamed != c.alias).then(|| {
                    Expr::Column(ColumnRef::new(renamed, c.name.clone(), c.ty))
                })
            }
            Expr::AggregateSubquery(agg) => {
                let rewritten = visit::walk_expr(self, expr);
                let renamed = self.renamed(agg.group_alias);
                if renamed == agg.group_alias {
                    return rewritten;
                }
                let mut out = match rewritten {
                    Some(Expr::AggregateSubquery(a)) => *a,
                    _ => (**agg).clone(),
                };
                out.group_alias = renamed;
                Some(Expr::AggregateSubquery(Box::new(out)))
            }
            _ => visit::walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::projector::Projector;
    use crate::ast::query::ColumnDecl;
    use crate::types::SqlType;

    #[test]
    fn test_duplicate_shares_no_aliases() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: table,
            name: "orders".to_string(),
        }));
        select.columns.push(ColumnDecl::new(
            "id",
            Expr::Column(ColumnRef::new(table, "id", SqlType::Int)),
        ));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            select.alias,
            "id",
            SqlType::Int,
        )));
        let original = Projection::new(select, projector);

        let copy = duplicate_projection(&original, &mut aliases);

        let before = declared_aliases(&original);
        let after = declared_aliases(&copy);
        assert_eq!(before.len(), after.len());
        for alias in &after {
            assert!(!before.contains(alias));
        }
        // References moved along with the declarations.
        match &copy.projector {
            Projector::Expr(Expr::Column(c)) => assert_eq!(c.alias, copy.select.alias),
            other => panic!("unexpected projector {:?}", other),
        }
    }
}
