//! Promotes where-clause conjuncts linking both sides of a cross join into
//! the join condition, turning the cross join into an inner join.

use std::collections::HashSet;

use super::util;
use crate::ast::expr::Expr;
use crate::ast::projector::Projection;
use crate::ast::query::{Join, JoinKind, Select, Source};
use crate::ast::visit::{self, Rewriter};
use crate::ast::TableAlias;

pub fn run(projection: Projection) -> Projection {
    Promoter.apply(projection)
}

struct Promoter;

impl Rewriter for Promoter {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        let join = match &current.from {
            Some(Source::Join(join)) if join.kind == JoinKind::Cross => join,
            _ => return walked,
        };
        let where_clause = match &current.where_clause {
            Some(w) => w,
            None => return walked,
        };
        let left: HashSet<TableAlias> = join.left.declared_aliases().into_iter().collect();
        let right: HashSet<TableAlias> = join.right.declared_aliases().into_iter().collect();
        let mut linking = vec![];
        let mut rest = vec![];
        for conjunct in where_clause.conjuncts() {
            if util::expr_references(conjunct, &left) && util::expr_references(conjunct, &right) {
                linking.push(conjunct.clone());
            } else {
                rest.push(conjunct.clone());
            }
        }
        let condition = match Expr::conjoin(linking) {
            Some(c) => c,
            None => return walked,
        };
        let mut out = current.clone();
        out.where_clause = Expr::conjoin(rest);
        out.from = Some(Source::Join(Box::new(Join {
            kind: JoinKind::Inner,
            left: join.left.clone(),
            right: join.right.clone(),
            condition: Some(condition),
        })));
        Some(out)
    }
}
