//! Moves scalar subqueries out of select lists, for dialects that cannot
//! evaluate a subquery in column position. Each one becomes the right side
//! of an outer apply and the column reads its first declared output.

use crate::ast::expr::{ColumnRef, Expr};
use crate::ast::projector::Projection;
use crate::ast::query::{Join, JoinKind, Select, Source};
use crate::ast::visit::{self, Rewriter};

pub fn run(projection: Projection) -> Projection {
    Extractor.apply(projection)
}

struct Extractor;

impl Rewriter for Extractor {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        // Grouped selects cannot absorb a join without changing the grouping.
        if current.from.is_none() || !current.group_by.is_empty() {
            return walked;
        }
        if !current
            .columns
            .iter()
            .any(|c| matches!(&c.expr, Expr::Scalar(sub) if !sub.columns.is_empty()))
        {
            return walked;
        }
        let mut out = current.clone();
        for i in 0..out.columns.len() {
            let sub = match &out.columns[i].expr {
                Expr::Scalar(sub) if !sub.columns.is_empty() => (**sub).clone(),
                _ => continue,
            };
            let first = &sub.columns[0];
            let read = Expr::Column(ColumnRef::new(
                sub.alias,
                first.name.clone(),
                first.expr.sql_type(),
            ));
            out.from = Some(Source::Join(Box::new(Join {
                kind: JoinKind::OuterApply,
                left: out.from.take().unwrap_or(Source::Select(Box::new(sub.clone()))),
                right: Source::Select(Box::new(sub)),
                condition: None,
            })));
            out.columns[i].expr = read;
        }
        Some(out)
    }
}
