//! Converts singleton nested projections into outer joins.
//!
//! A projector subquery carrying an aggregator yields at most one row per
//! parent row, so it can ride along the parent query instead of costing a
//! round trip per row: the subquery joins into the parent's from clause and
//! the projector becomes an outer-joined value guarded by a test column.

use std::collections::HashSet;

use super::util;
use crate::ast::expr::{ColumnRef, Expr};
use crate::ast::projector::{Projection, Projector};
use crate::ast::query::{Join, JoinKind, Select, Source};
use crate::ast::visit::{self, Rewriter};
use crate::ast::AliasGenerator;
use crate::binder::columns::{self, ColumnMap, ExprSubstitutor};

pub fn run(projection: Projection, aliases: &mut AliasGenerator) -> Projection {
    let mut pass = Singletons { aliases };
    pass.apply(projection)
}

struct Singletons<'a> {
    aliases: &'a mut AliasGenerator,
}

impl Rewriter for Singletons<'_> {
    fn rewrite_projection(&mut self, projection: &Projection) -> Option<Projection> {
        let walked = visit::walk_projection(self, projection);
        let mut out = walked.clone().unwrap_or_else(|| projection.clone());
        let Projection {
            select, projector, ..
        } = &mut out;
        if convert(projector, select) {
            Some(out)
        } else {
            walked
        }
    }
}

fn convert(projector: &mut Projector, select: &mut Select) -> bool {
    match projector {
        Projector::Subquery(sub) if sub.aggregator.is_some() => {
            *projector = embed(sub, select);
            true
        }
        Projector::Entity { members, .. } | Projector::Record(members) => {
            let mut changed = false;
            for (_, m) in members {
                if convert(m, select) {
                    changed = true;
                }
            }
            changed
        }
        Projector::OuterJoined { inner, .. } => convert(inner, select),
        _ => false,
    }
}

/// Join the singleton subquery into the parent select and rebuild the value
/// as an outer-joined read of the passed-through columns.
fn embed(sub: &Projection, select: &mut Select) -> Projector {
    // References to the parent's output columns localize to their
    // declarations; the subquery now lives inside the parent's from clause.
    let mut localizer = ExprSubstitutor::for_select(select);
    let mut inner_select = localizer
        .rewrite_select(&sub.select)
        .unwrap_or_else(|| sub.select.clone());
    let inner_projector = localizer
        .rewrite_projector(&sub.projector)
        .unwrap_or_else(|| sub.projector.clone());
    let test_name = inner_select.declare("test", Expr::value(1i64));

    // Decorrelate into a plain outer join when the correlation sits in
    // top-level where conjuncts; otherwise keep lateral semantics.
    let left_aliases: HashSet<_> = select
        .from
        .as_ref()
        .map(|f| f.declared_aliases().into_iter().collect())
        .unwrap_or_default();
    let mut correlated = vec![];
    let mut local = vec![];
    if let Some(where_clause) = &inner_select.where_clause {
        for conjunct in where_clause.conjuncts() {
            if util::expr_references(conjunct, &left_aliases) {
                correlated.push(conjunct.clone());
            } else {
                local.push(conjunct.clone());
            }
        }
    }
    let (kind, condition) = {
        let mut remainder = inner_select.clone();
        remainder.where_clause = Expr::conjoin(local.clone());
        if !correlated.is_empty()
            && inner_select.skip.is_none()
            && inner_select.take.is_none()
            && !util::select_references(&remainder, &left_aliases)
        {
            inner_select.where_clause = Expr::conjoin(local);
            (
                JoinKind::SingletonLeftOuter,
                Expr::conjoin(correlated),
            )
        } else {
            (JoinKind::OuterApply, None)
        }
    };

    select.from = Some(match select.from.take() {
        Some(left) => Source::Join(Box::new(Join {
            kind,
            left,
            right: Source::Select(Box::new(inner_select.clone())),
            condition,
        })),
        None => Source::Select(Box::new(inner_select.clone())),
    });

    let mut map = ColumnMap::new();
    columns::pass_through(&inner_select, select.alias, &mut select.columns, &mut map);
    let remapped = columns::remap_projector(&inner_projector, &map);
    let test = map
        .get(&(inner_select.alias, test_name.clone()))
        .map(|c| Expr::Column(c.clone()))
        .unwrap_or_else(|| {
            Expr::Column(ColumnRef::new(
                inner_select.alias,
                test_name,
                crate::types::SqlType::Int,
            ))
        });
    Projector::OuterJoined {
        test: Box::new(test),
        inner: Box::new(remapped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::projector::Aggregator;
    use crate::ast::query::{ColumnDecl, TableSource};
    use crate::types::SqlType;

    #[test]
    fn test_singleton_subquery_becomes_outer_join() {
        let mut aliases = AliasGenerator::new();
        let ctable = aliases.fresh();
        let mut parent = Select::new(aliases.fresh());
        let parent_alias = parent.alias;
        parent.from = Some(Source::Table(TableSource {
            alias: ctable,
            name: "orders".into(),
        }));
        parent.columns.push(ColumnDecl::new(
            "customer_id",
            Expr::Column(ColumnRef::new(ctable, "customer_id", SqlType::Int)),
        ));

        let ttable = aliases.fresh();
        let mut target = Select::new(aliases.fresh());
        let target_alias = target.alias;
        target.from = Some(Source::Table(TableSource {
            alias: ttable,
            name: "customers".into(),
        }));
        target.columns.push(ColumnDecl::new(
            "name",
            Expr::Column(ColumnRef::new(ttable, "name", SqlType::Text)),
        ));
        target.where_clause = Some(Expr::eq(
            Expr::Column(ColumnRef::new(ttable, "id", SqlType::Int)),
            Expr::Column(ColumnRef::new(parent_alias, "customer_id", SqlType::Int)),
        ));
        let nested = Projection::new(
            target,
            Projector::Expr(Expr::Column(ColumnRef::new(
                target_alias,
                "name",
                SqlType::Text,
            ))),
        )
        .with_aggregator(Aggregator::SingleOrDefault);

        let projection = Projection::new(parent, Projector::Subquery(Box::new(nested)));
        let out = run(projection, &mut aliases);

        match &out.select.from {
            Some(Source::Join(join)) => {
                assert_eq!(join.kind, JoinKind::SingletonLeftOuter);
                assert!(join.condition.is_some());
            }
            other => panic!("unexpected from {:?}", other),
        }
        match &out.projector {
            Projector::OuterJoined { inner, .. } => match inner.as_ref() {
                Projector::Expr(Expr::Column(c)) => {
                    assert_eq!(c.alias, out.select.alias);
                    assert_eq!(c.name, "name");
                }
                other => panic!("unexpected inner projector {:?}", other),
            },
            other => panic!("unexpected projector {:?}", other),
        }
    }
}
