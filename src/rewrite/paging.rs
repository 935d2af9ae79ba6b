//! Rewrites skip/take into a row-number window for dialects without an
//! offset clause.
//!
//! The paged select keeps its alias on the outside so references from
//! enclosing queries stay valid; a renamed copy moves inside with a
//! `ROW_NUMBER()` column carrying the ordering, and the wrapper filters on
//! the row-number range. Take without skip is left alone: the formatter
//! renders it as `TOP`.

use crate::ast::expr::{BinaryOp, ColumnRef, Expr, OrderExpr, SortOrder};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source};
use crate::ast::visit::{self, Rewriter};
use crate::ast::AliasGenerator;
use crate::binder::columns::{self, ColumnMap};
use crate::types::SqlType;

pub fn run(projection: Projection, aliases: &mut AliasGenerator) -> Projection {
    let mut pass = Pager { aliases };
    pass.apply(projection)
}

struct Pager<'a> {
    aliases: &'a mut AliasGenerator,
}

impl Rewriter for Pager<'_> {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        if current.skip.is_none() || current.columns.is_empty() {
            return walked;
        }
        let mut inner = current.clone();
        let outer_alias = inner.alias;
        inner.alias = self.aliases.fresh();
        let skip = match inner.skip.take() {
            Some(skip) => skip,
            None => return walked,
        };
        let take = inner.take.take();
        let mut order_by = std::mem::take(&mut inner.order_by);
        if order_by.is_empty() {
            // Row numbering needs a deterministic order; fall back to the
            // first output column.
            order_by.push(OrderExpr {
                expr: inner.columns[0].expr.clone(),
                order: SortOrder::Asc,
            });
        }
        let rn_name = inner.declare("rn", Expr::RowNumber { order_by });
        let rn = Expr::Column(ColumnRef::new(inner.alias, rn_name.clone(), SqlType::Int));

        let mut outer = Select::new(outer_alias);
        let mut map = ColumnMap::new();
        columns::pass_through(&inner, outer_alias, &mut outer.columns, &mut map);
        outer
            .columns
            .retain(|c| !matches!(&c.expr, Expr::Column(r) if r.name == rn_name));
        let lower = Expr::binary(BinaryOp::Gt, rn.clone(), skip.clone());
        let range = match take {
            Some(take) => Expr::and(
                lower,
                Expr::binary(
                    BinaryOp::Le,
                    rn.clone(),
                    Expr::binary(BinaryOp::Add, skip, take),
                ),
            ),
            None => lower,
        };
        outer.where_clause = Some(range);
        outer.order_by.push(OrderExpr {
            expr: rn,
            order: SortOrder::Asc,
        });
        outer.from = Some(Source::Select(Box::new(inner)));
        Some(outer)
    }
}
