//! Resolves deferred correlated aggregates.
//!
//! A correlated aggregate node names the grouped select it belongs to. When
//! that select is reachable from the clause holding the node, the aggregate
//! is declared as a computed column on it and the node becomes a column
//! reference. Nodes whose grouped select is no longer reachable fall back to
//! their scalar-subquery rendering.

use crate::ast::expr::{AggregateSubquery, ColumnRef, Expr};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source};
use crate::ast::visit::{self, Rewriter, Visitor};
use crate::ast::TableAlias;

pub fn run(projection: Projection) -> Projection {
    let hoisted = Hoister.apply(projection);
    Fallback.apply(hoisted)
}

struct Hoister;

impl Rewriter for Hoister {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let mut out = walked.clone().unwrap_or_else(|| select.clone());
        let mut changed = false;
        loop {
            let visible: Vec<TableAlias> = out
                .from
                .as_ref()
                .map(|f| f.declared_aliases())
                .unwrap_or_default();
            let found = match find_target(&out, &visible) {
                Some(found) => found,
                None => break,
            };
            let replacement = if found.group_alias == out.alias {
                // The node sits in a column of the grouped select itself.
                found.in_group.clone()
            } else {
                let target = out
                    .from
                    .as_mut()
                    .and_then(|f| find_select_mut(f, found.group_alias));
                match target {
                    Some(target) => {
                        let name = target.declare("agg", found.in_group.clone());
                        let ty = found.in_group.sql_type();
                        Expr::Column(ColumnRef::new(found.group_alias, name, ty))
                    }
                    None => break,
                }
            };
            let mut replacer = Replacer {
                needle: found,
                replacement,
            };
            rewrite_clauses(&mut out, &mut replacer);
            changed = true;
        }
        if changed {
            Some(out)
        } else {
            walked
        }
    }
}

/// First correlated aggregate in the select's clauses whose grouped select
/// is this select or one of its visible sources.
fn find_target(select: &Select, visible: &[TableAlias]) -> Option<AggregateSubquery> {
    let mut finder = Finder {
        own: select.alias,
        visible,
        found: None,
    };
    for c in &select.columns {
        finder.visit_expr(&c.expr);
    }
    if let Some(w) = &select.where_clause {
        finder.visit_expr(w);
    }
    for o in &select.order_by {
        finder.visit_expr(&o.expr);
    }
    for g in &select.group_by {
        finder.visit_expr(g);
    }
    finder.found
}

struct Finder<'a> {
    own: TableAlias,
    visible: &'a [TableAlias],
    found: Option<AggregateSubquery>,
}

impl Visitor for Finder<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.found.is_some() {
            return;
        }
        if let Expr::AggregateSubquery(agg) = expr {
            if agg.group_alias == self.own || self.visible.contains(&agg.group_alias) {
                self.found = Some((**agg).clone());
                return;
            }
        }
        visit::visit_expr_children(self, expr);
    }
}

struct Replacer {
    needle: AggregateSubquery,
    replacement: Expr,
}

impl Rewriter for Replacer {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        if let Expr::AggregateSubquery(agg) = expr {
            if **agg == self.needle {
                return Some(self.replacement.clone());
            }
        }
        visit::walk_expr(self, expr)
    }
}

/// Rewrite a select's own clauses (not its from tree) in place.
fn rewrite_clauses(select: &mut Select, r: &mut impl Rewriter) {
    for c in &mut select.columns {
        if let Some(e) = r.rewrite_expr(&c.expr) {
            c.expr = e;
        }
    }
    if let Some(w) = &select.where_clause {
        if let Some(e) = r.rewrite_expr(w) {
            select.where_clause = Some(e);
        }
    }
    for o in &mut select.order_by {
        if let Some(e) = r.rewrite_expr(&o.expr) {
            o.expr = e;
        }
    }
    for g in &mut select.group_by {
        if let Some(e) = r.rewrite_expr(g) {
            *g = e;
        }
    }
}

fn find_select_mut(source: &mut Source, alias: TableAlias) -> Option<&mut Select> {
    match source {
        Source::Table(_) => None,
        Source::Select(select) => (select.alias == alias).then(|| select.as_mut()),
        Source::Join(join) => find_select_mut(&mut join.left, alias)
            .or_else(|| find_select_mut(&mut join.right, alias)),
    }
}

/// Any node still standing lost its grouped select; keep the correlated
/// scalar-subquery rendering.
struct Fallback;

impl Rewriter for Fallback {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        if let Expr::AggregateSubquery(agg) = expr {
            return Some(
                self.rewrite_expr(&agg.fallback)
                    .unwrap_or_else(|| agg.fallback.clone()),
            );
        }
        visit::walk_expr(self, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::AggregateFunc;
    use crate::ast::projector::Projector;
    use crate::ast::query::{ColumnDecl, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    #[test]
    fn test_aggregate_hoists_onto_grouped_select() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut grouped = Select::new(aliases.fresh());
        let group_alias = grouped.alias;
        grouped.from = Some(Source::Table(TableSource {
            alias: table,
            name: "orders".into(),
        }));
        let key = Expr::Column(ColumnRef::new(table, "customer_id", SqlType::Int));
        grouped.columns.push(ColumnDecl::new("key", key.clone()));
        grouped.group_by.push(key);

        let in_group = Expr::Aggregate {
            func: AggregateFunc::Count,
            arg: None,
            distinct: false,
        };
        let fallback = Expr::value(0i64);
        let mut outer = Select::new(aliases.fresh());
        let outer_alias = outer.alias;
        outer.from = Some(Source::Select(Box::new(grouped)));
        outer.columns.push(ColumnDecl::new(
            "key",
            Expr::Column(ColumnRef::new(group_alias, "key", SqlType::Int)),
        ));
        outer.columns.push(ColumnDecl::new(
            "n",
            Expr::AggregateSubquery(Box::new(AggregateSubquery {
                group_alias,
                in_group,
                fallback,
            })),
        ));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            outer_alias,
            "n",
            SqlType::Int,
        )));
        let out = run(Projection::new(outer, projector));
        match &out.select.columns[1].expr {
            Expr::Column(c) => assert_eq!(c.alias, group_alias),
            other => panic!("aggregate not hoisted: {:?}", other),
        }
        match &out.select.from {
            Some(Source::Select(inner)) => {
                assert!(inner
                    .columns
                    .iter()
                    .any(|c| matches!(c.expr, Expr::Aggregate { .. })));
            }
            other => panic!("unexpected from {:?}", other),
        }
    }
}
