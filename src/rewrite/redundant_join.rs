//! Removes self-joins introduced by relationship navigation.
//!
//! An inner join whose sides are structurally equivalent and whose condition
//! only equates identically named columns of the two sides joins each row to
//! itself; the right side is dropped and its references repointed at the
//! left. Such joins only arise from back-navigation over a relationship, so
//! the equated columns are key columns.

use super::comparer::{self, AliasCorrespondence};
use crate::ast::expr::{BinaryOp, ColumnRef, Expr};
use crate::ast::projector::Projection;
use crate::ast::query::{JoinKind, Source};
use crate::ast::visit::{self, Rewriter};

pub fn run(mut projection: Projection) -> Projection {
    loop {
        let mut remover = Remover {
            pending: None,
        };
        projection = remover.apply(projection);
        match remover.pending {
            Some(map) => {
                let mut rename = AliasRename { map };
                projection = rename.apply(projection);
            }
            None => return projection,
        }
    }
}

struct Remover {
    /// Alias correspondence of a removed side, applied after the traversal.
    pending: Option<AliasCorrespondence>,
}

impl Rewriter for Remover {
    fn rewrite_source(&mut self, source: &Source) -> Option<Source> {
        // One removal per sweep keeps the correspondence unambiguous.
        if self.pending.is_some() {
            return None;
        }
        let walked = visit::walk_source(self, source);
        if self.pending.is_some() {
            return walked;
        }
        let current = walked.as_ref().unwrap_or(source);
        let join = match current {
            Source::Join(join) if join.kind == JoinKind::Inner => join,
            _ => return walked,
        };
        let map = match comparer::equivalent_sources(&join.left, &join.right) {
            Some(map) => map,
            None => return walked,
        };
        let condition = match &join.condition {
            Some(c) => c,
            None => return walked,
        };
        if !condition
            .conjuncts()
            .iter()
            .all(|c| equates_mirrored_columns(c, &map))
        {
            return walked;
        }
        self.pending = Some(map);
        Some(join.left.clone())
    }
}

/// `left.x = right.x` where the aliases correspond and the names agree.
fn equates_mirrored_columns(conjunct: &Expr, map: &AliasCorrespondence) -> bool {
    let (left, right) = match conjunct {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => (left, right),
        _ => return false,
    };
    match (left.as_ref(), right.as_ref()) {
        (Expr::Column(a), Expr::Column(b)) => {
            a.name == b.name
                && (map.get(&b.alias) == Some(&a.alias) || map.get(&a.alias) == Some(&b.alias))
        }
        _ => false,
    }
}

struct AliasRename {
    map: AliasCorrespondence,
}

impl Rewriter for AliasRename {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        if let Expr::Column(c) = expr {
            return self
                .map
                .get(&c.alias)
                .map(|alias| Expr::Column(ColumnRef::new(*alias, c.name.clone(), c.ty)));
        }
        visit::walk_expr(self, expr)
    }
}
