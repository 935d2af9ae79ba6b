//! Rewrites correlated lateral joins into ordinary joins where the
//! correlation lives only in top-level where conjuncts of the right side.
//!
//! Lateral row-shaping (a right side with skip/take) stays an apply: its
//! semantics are per-left-row and cannot move into a join condition.

use std::collections::HashSet;

use super::util;
use crate::ast::expr::{ColumnRef, Expr};
use crate::ast::query::{Join, JoinKind, Select, Source};
use crate::ast::visit::{self, Rewriter, Visitor};
use crate::ast::projector::Projection;
use crate::ast::TableAlias;
use crate::binder::columns::{self, ColumnMap};

pub fn run(projection: Projection) -> Projection {
    Decorrelator.apply(projection)
}

struct Decorrelator;

impl Rewriter for Decorrelator {
    fn rewrite_source(&mut self, source: &Source) -> Option<Source> {
        let walked = visit::walk_source(self, source);
        let current = walked.as_ref().unwrap_or(source);
        let join = match current {
            Source::Join(join) if join.kind.is_apply() => join,
            _ => return walked,
        };
        match decorrelate(join) {
            Some(rewritten) => Some(Source::Join(Box::new(rewritten))),
            None => walked,
        }
    }
}

fn decorrelate(join: &Join) -> Option<Join> {
    let right = match &join.right {
        Source::Select(right) => right,
        _ => return None,
    };
    if right.skip.is_some() || right.take.is_some() {
        return None;
    }
    let left_aliases: HashSet<_> = join.left.declared_aliases().into_iter().collect();
    let (correlated, local) = split_where(right, &left_aliases);
    // The correlation must live entirely in the extracted conjuncts.
    let mut remainder = (**right).clone();
    remainder.where_clause = Expr::conjoin(local);
    if util::select_references(&remainder, &left_aliases) {
        return None;
    }
    // A conjunct written against the right side's source columns can only
    // move into the join condition through the declared outputs.
    let mut outputs = ColumnMap::new();
    for decl in &right.columns {
        if let Expr::Column(c) = &decl.expr {
            outputs
                .entry((c.alias, c.name.clone()))
                .or_insert_with(|| ColumnRef::new(right.alias, decl.name.clone(), decl.sql_type()));
        }
    }
    let mut visible: HashSet<TableAlias> = left_aliases.clone();
    visible.insert(right.alias);
    let mut hoisted = Vec::with_capacity(correlated.len());
    for conjunct in &correlated {
        let localized = columns::remap_expr(conjunct, &outputs);
        if !references_only(&localized, &visible) {
            return None;
        }
        hoisted.push(localized);
    }
    let kind = match (join.kind, hoisted.is_empty()) {
        (JoinKind::CrossApply, true) => JoinKind::Cross,
        (JoinKind::CrossApply, false) => JoinKind::Inner,
        (JoinKind::OuterApply, _) => JoinKind::LeftOuter,
        _ => return None,
    };
    let condition = match kind {
        JoinKind::Cross => None,
        // An outer join needs a condition even when nothing correlates.
        _ => Some(Expr::conjoin(hoisted).unwrap_or_else(|| Expr::value(true))),
    };
    Some(Join {
        kind,
        left: join.left.clone(),
        right: Source::Select(Box::new(remainder)),
        condition,
    })
}

/// True when every column reference reads one of `allowed`.
fn references_only(expr: &Expr, allowed: &HashSet<TableAlias>) -> bool {
    struct Check<'a> {
        allowed: &'a HashSet<TableAlias>,
        ok: bool,
    }
    impl Visitor for Check<'_> {
        fn visit_expr(&mut self, expr: &Expr) {
            if let Expr::Column(c) = expr {
                if !self.allowed.contains(&c.alias) {
                    self.ok = false;
                }
                return;
            }
            visit::visit_expr_children(self, expr);
        }
    }
    let mut check = Check { allowed, ok: true };
    check.visit_expr(expr);
    check.ok
}

fn split_where(right: &Select, left_aliases: &HashSet<crate::ast::TableAlias>) -> (Vec<Expr>, Vec<Expr>) {
    let mut correlated = vec![];
    let mut local = vec![];
    if let Some(where_clause) = &right.where_clause {
        for conjunct in where_clause.conjuncts() {
            if util::expr_references(conjunct, left_aliases) {
                correlated.push(conjunct.clone());
            } else {
                local.push(conjunct.clone());
            }
        }
    }
    (correlated, local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::ColumnRef;
    use crate::ast::query::{ColumnDecl, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    fn table_select(aliases: &mut AliasGenerator, table: &str, col: &str) -> Select {
        let t = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.from = Some(Source::Table(TableSource {
            alias: t,
            name: table.into(),
        }));
        select.columns.push(ColumnDecl::new(
            col,
            Expr::Column(ColumnRef::new(t, col, SqlType::Int)),
        ));
        select
    }

    #[test]
    fn test_correlated_apply_becomes_inner_join() {
        let mut aliases = AliasGenerator::new();
        let left = table_select(&mut aliases, "customers", "id");
        let left_alias = left.alias;
        let mut right = table_select(&mut aliases, "orders", "customer_id");
        let right_alias = right.alias;
        right.where_clause = Some(Expr::eq(
            Expr::Column(ColumnRef::new(right_alias, "customer_id", SqlType::Int)),
            Expr::Column(ColumnRef::new(left_alias, "id", SqlType::Int)),
        ));
        let join = Join {
            kind: JoinKind::CrossApply,
            left: Source::Select(Box::new(left)),
            right: Source::Select(Box::new(right)),
            condition: None,
        };
        let rewritten = decorrelate(&join).expect("should decorrelate");
        assert_eq!(rewritten.kind, JoinKind::Inner);
        assert!(rewritten.condition.is_some());
        match &rewritten.right {
            Source::Select(s) => assert!(s.where_clause.is_none()),
            other => panic!("unexpected right source {:?}", other),
        }
    }

    #[test]
    fn test_correlation_over_source_columns_localizes_to_outputs() {
        let mut aliases = AliasGenerator::new();
        let left = table_select(&mut aliases, "customers", "id");
        let left_alias = left.alias;
        let mut right = table_select(&mut aliases, "orders", "customer_id");
        let right_alias = right.alias;
        let right_table = match &right.from {
            Some(Source::Table(t)) => t.alias,
            other => panic!("unexpected right from {:?}", other),
        };
        // Written against the table column, as relationship binding leaves it.
        right.where_clause = Some(Expr::eq(
            Expr::Column(ColumnRef::new(left_alias, "id", SqlType::Int)),
            Expr::Column(ColumnRef::new(right_table, "customer_id", SqlType::Int)),
        ));
        let join = Join {
            kind: JoinKind::CrossApply,
            left: Source::Select(Box::new(left)),
            right: Source::Select(Box::new(right)),
            condition: None,
        };
        let rewritten = decorrelate(&join).expect("should decorrelate");
        assert_eq!(rewritten.kind, JoinKind::Inner);
        match rewritten.condition.as_ref() {
            Some(Expr::Binary { right: key, .. }) => match key.as_ref() {
                Expr::Column(c) => {
                    assert_eq!(c.alias, right_alias);
                    assert_eq!(c.name, "customer_id");
                }
                other => panic!("unexpected key {:?}", other),
            },
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_correlation_over_undeclared_column_stays_lateral() {
        let mut aliases = AliasGenerator::new();
        let left = table_select(&mut aliases, "customers", "id");
        let left_alias = left.alias;
        let mut right = table_select(&mut aliases, "orders", "customer_id");
        let right_table = match &right.from {
            Some(Source::Table(t)) => t.alias,
            other => panic!("unexpected right from {:?}", other),
        };
        // The correlated column never surfaces as an output of the right side.
        right.where_clause = Some(Expr::eq(
            Expr::Column(ColumnRef::new(left_alias, "id", SqlType::Int)),
            Expr::Column(ColumnRef::new(right_table, "region_id", SqlType::Int)),
        ));
        let join = Join {
            kind: JoinKind::CrossApply,
            left: Source::Select(Box::new(left)),
            right: Source::Select(Box::new(right)),
            condition: None,
        };
        assert!(decorrelate(&join).is_none());
    }

    #[test]
    fn test_limited_right_side_stays_lateral() {
        let mut aliases = AliasGenerator::new();
        let left = table_select(&mut aliases, "customers", "id");
        let mut right = table_select(&mut aliases, "orders", "customer_id");
        right.take = Some(Expr::value(1i64));
        let join = Join {
            kind: JoinKind::CrossApply,
            left: Source::Select(Box::new(left)),
            right: Source::Select(Box::new(right)),
            condition: None,
        };
        assert!(decorrelate(&join).is_none());
    }
}
