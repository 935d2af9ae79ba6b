//! Ordering repair: hoists orderings to the select that delivers rows,
//! realizes pending direction flips, and drops orderings that SQL does not
//! guarantee to preserve.
//!
//! An ordering inside a subquery means nothing to the enclosing query unless
//! paging depends on it, so orderings travel up through wrapper chains and
//! are cleared in positions (join sides, existence probes) where they could
//! only mislead.

use crate::ast::expr::{Expr, OrderExpr, SortOrder};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source};
use crate::ast::visit::{self, Rewriter};

pub fn run(projection: Projection) -> Projection {
    let hoisted = Hoister.apply(projection);
    Scrubber.apply(hoisted)
}

struct Hoister;

impl Rewriter for Hoister {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let mut out = walked.clone().unwrap_or_else(|| select.clone());
        let mut changed = false;
        if hoist(&mut out) {
            changed = true;
        }
        if out.reverse {
            for o in &mut out.order_by {
                o.order = o.order.flipped();
            }
            out.reverse = false;
            changed = true;
        }
        if changed {
            Some(out)
        } else {
            walked
        }
    }
}

/// Pull the inner select's ordering up into `outer` when row order still
/// means the same thing there.
fn hoist(outer: &mut Select) -> bool {
    if !outer.order_by.is_empty() || !outer.group_by.is_empty() || outer.distinct {
        return false;
    }
    let inner = match &mut outer.from {
        Some(Source::Select(inner)) => inner,
        _ => return false,
    };
    if inner.order_by.is_empty() {
        return false;
    }
    // Paging inside consumes its ordering; copy it upward, don't move it.
    let keep_inner = inner.skip.is_some() || inner.take.is_some();
    let mut hoisted = Vec::with_capacity(inner.order_by.len());
    for o in &inner.order_by.clone() {
        let name = inner.declare("ord", o.expr.clone());
        let ty = o.expr.sql_type();
        hoisted.push(OrderExpr {
            expr: Expr::Column(crate::ast::ColumnRef::new(inner.alias, name, ty)),
            order: o.order,
        });
    }
    if !keep_inner {
        inner.order_by.clear();
    }
    outer.order_by = hoisted;
    true
}

/// Clears orderings in positions where they cannot influence results.
struct Scrubber;

impl Scrubber {
    fn scrub(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        if current.order_by.is_empty() || current.skip.is_some() || current.take.is_some() {
            return walked;
        }
        let mut out = current.clone();
        out.order_by.clear();
        Some(out)
    }
}

impl Rewriter for Scrubber {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        match expr {
            Expr::Exists(select) => self.scrub(select).map(|s| Expr::Exists(Box::new(s))),
            Expr::Scalar(select) => self.scrub(select).map(|s| Expr::Scalar(Box::new(s))),
            _ => visit::walk_expr(self, expr),
        }
    }

    fn rewrite_source(&mut self, source: &Source) -> Option<Source> {
        match source {
            Source::Join(join) => {
                let left = self.rewrite_join_side(&join.left);
                let right = self.rewrite_join_side(&join.right);
                let condition =
                    visit::rewrite_opt(&join.condition, |c| self.rewrite_expr(c));
                if left.is_none() && right.is_none() && condition.is_none() {
                    return None;
                }
                Some(Source::Join(Box::new(crate::ast::Join {
                    kind: join.kind,
                    left: left.unwrap_or_else(|| join.left.clone()),
                    right: right.unwrap_or_else(|| join.right.clone()),
                    condition: condition.unwrap_or_else(|| join.condition.clone()),
                })))
            }
            _ => visit::walk_source(self, source),
        }
    }
}

impl Scrubber {
    fn rewrite_join_side(&mut self, side: &Source) -> Option<Source> {
        match side {
            Source::Select(select) => self.scrub(select).map(|s| Source::Select(Box::new(s))),
            other => self.rewrite_source(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::ColumnRef;
    use crate::ast::projector::Projector;
    use crate::ast::query::{ColumnDecl, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    fn ordered_inner(aliases: &mut AliasGenerator) -> Select {
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
        select.order_by.push(OrderExpr {
            expr: Expr::Column(ColumnRef::new(table, "total", SqlType::Decimal)),
            order: SortOrder::Asc,
        });
        select
    }

    #[test]
    fn test_ordering_hoists_through_wrapper() {
        let mut aliases = AliasGenerator::new();
        let inner = ordered_inner(&mut aliases);
        let inner_alias = inner.alias;
        let mut outer = Select::new(aliases.fresh());
        let outer_alias = outer.alias;
        outer.columns.push(ColumnDecl::new(
            "total",
            Expr::Column(ColumnRef::new(inner_alias, "total", SqlType::Decimal)),
        ));
        outer.from = Some(Source::Select(Box::new(inner)));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            outer_alias,
            "total",
            SqlType::Decimal,
        )));
        let out = run(Projection::new(outer, projector));
        assert_eq!(out.select.order_by.len(), 1);
        match &out.select.from {
            Some(Source::Select(inner)) => assert!(inner.order_by.is_empty()),
            other => panic!("unexpected from {:?}", other),
        }
    }

    #[test]
    fn test_reverse_flips_hoisted_ordering() {
        let mut aliases = AliasGenerator::new();
        let inner = ordered_inner(&mut aliases);
        let inner_alias = inner.alias;
        let mut outer = Select::new(aliases.fresh());
        outer.reverse = true;
        outer.columns.push(ColumnDecl::new(
            "total",
            Expr::Column(ColumnRef::new(inner_alias, "total", SqlType::Decimal)),
        ));
        let outer_alias = outer.alias;
        outer.from = Some(Source::Select(Box::new(inner)));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(
            outer_alias,
            "total",
            SqlType::Decimal,
        )));
        let out = run(Projection::new(outer, projector));
        assert!(!out.select.reverse);
        assert_eq!(out.select.order_by[0].order, SortOrder::Desc);
    }
}
