//! Turns remaining correlated sequence projectors into client joins.
//!
//! A nested sequence that survived the singleton rewrite runs as its own
//! round trip. Its correlation conjuncts are split off the subquery's where
//! clause into key pairs: the outer keys are declared as columns of the
//! parent select, the inner keys as columns of the subquery, and the
//! materializer matches them in memory.

use std::collections::HashSet;

use crate::ast::dup;
use crate::ast::expr::{BinaryOp, Expr};
use crate::ast::projector::{ClientJoin, Projection, Projector};
use crate::ast::query::Select;
use crate::ast::visit::Visitor;
use crate::ast::TableAlias;
use crate::binder::columns;
use crate::error::{RelqError, RelqResult};

pub fn run(mut projection: Projection) -> RelqResult<Projection> {
    rewrite(&mut projection)?;
    Ok(projection)
}

fn rewrite(projection: &mut Projection) -> RelqResult<()> {
    let Projection {
        select, projector, ..
    } = projection;
    detach_in(projector, select)
}

fn detach_in(projector: &mut Projector, outer: &mut Select) -> RelqResult<()> {
    match projector {
        Projector::Subquery(sub) => {
            let joined = detach(sub, outer)?;
            *projector = Projector::ClientJoin(Box::new(joined));
            Ok(())
        }
        Projector::Entity { members, .. } | Projector::Record(members) => {
            for (_, m) in members {
                detach_in(m, outer)?;
            }
            Ok(())
        }
        Projector::OuterJoined { inner, .. } => detach_in(inner, outer),
        Projector::ClientJoin(joined) => rewrite(&mut joined.projection),
        Projector::Deferred(deferred) => {
            // The thunk binds its key parameters from the parent row, so the
            // key expressions must be readable parent output columns.
            for key in &mut deferred.outer_keys {
                let imported = columns::import_expr(outer, key, "ck");
                *key = imported;
            }
            rewrite(&mut deferred.projection)
        }
        Projector::Expr(_) => Ok(()),
    }
}

fn detach(sub: &Projection, outer: &mut Select) -> RelqResult<ClientJoin> {
    let internal: HashSet<TableAlias> = dup::declared_aliases(sub).into_iter().collect();
    let mut inner = sub.clone();
    let mut pairs = vec![];
    let mut local = vec![];
    if let Some(where_clause) = inner.select.where_clause.take() {
        for conjunct in where_clause.conjuncts() {
            if let Some(pair) = key_pair(conjunct, &internal) {
                pairs.push(pair);
            } else if references_outside(conjunct, &internal) {
                return Err(RelqError::bind(
                    "correlated subquery cannot be compiled to a separate query",
                ));
            } else {
                local.push(conjunct.clone());
            }
        }
    }
    inner.select.where_clause = Expr::conjoin(local);

    let mut outer_keys = Vec::with_capacity(pairs.len());
    let mut inner_keys = Vec::with_capacity(pairs.len());
    for (outer_expr, inner_expr) in pairs {
        outer_keys.push(columns::import_expr(outer, &outer_expr, "ck"));
        inner_keys.push(columns::import_expr(&mut inner.select, &inner_expr, "ck"));
    }

    // The subquery's own projector may itself hold nested sequences.
    rewrite(&mut inner)?;
    Ok(ClientJoin {
        projection: inner,
        outer_keys,
        inner_keys,
    })
}

/// Classify a correlation conjunct into (outer key, inner key).
///
/// Accepts plain equality and the null-safe grouping-key form
/// `(a IS NULL AND b IS NULL) OR a = b`.
fn key_pair(conjunct: &Expr, internal: &HashSet<TableAlias>) -> Option<(Expr, Expr)> {
    let (a, b) = equated_sides(conjunct)?;
    let a_out = references_outside(a, internal);
    let b_out = references_outside(b, internal);
    match (a_out, b_out) {
        (true, false) => Some((a.clone(), b.clone())),
        (false, true) => Some((b.clone(), a.clone())),
        _ => None,
    }
}

fn equated_sides(conjunct: &Expr) -> Option<(&Expr, &Expr)> {
    match conjunct {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => Some((left.as_ref(), right.as_ref())),
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            let (null_a, null_b) = match left.as_ref() {
                Expr::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                } => match (left.as_ref(), right.as_ref()) {
                    (
                        Expr::IsNull {
                            expr: a,
                            negated: false,
                        },
                        Expr::IsNull {
                            expr: b,
                            negated: false,
                        },
                    ) => (a.as_ref(), b.as_ref()),
                    _ => return None,
                },
                _ => return None,
            };
            match right.as_ref() {
                Expr::Binary {
                    op: BinaryOp::Eq,
                    left,
                    right,
                } if left.as_ref() == null_a && right.as_ref() == null_b => {
                    Some((left.as_ref(), right.as_ref()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// True when the expression reads a column of an alias outside `internal`.
fn references_outside(expr: &Expr, internal: &HashSet<TableAlias>) -> bool {
    struct Probe<'a> {
        internal: &'a HashSet<TableAlias>,
        found: bool,
    }
    impl Visitor for Probe<'_> {
        fn visit_expr(&mut self, expr: &Expr) {
            if self.found {
                return;
            }
            if let Expr::Column(c) = expr {
                if !self.internal.contains(&c.alias) {
                    self.found = true;
                }
                return;
            }
            crate::ast::visit::visit_expr_children(self, expr);
        }

        fn visit_select(&mut self, select: &Select) {
            // Aliases declared by nested selects are internal to them.
            if self.found {
                return;
            }
            crate::ast::visit::visit_select_children(self, select);
        }
    }
    let mut probe = Probe {
        internal,
        found: false,
    };
    probe.visit_expr(expr);
    probe.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::ColumnRef;
    use crate::ast::query::{ColumnDecl, Source, TableSource};
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    #[test]
    fn test_correlated_sequence_becomes_client_join() {
        let mut aliases = AliasGenerator::new();
        let ctable = aliases.fresh();
        let mut parent = Select::new(aliases.fresh());
        let parent_alias = parent.alias;
        parent.from = Some(Source::Table(TableSource {
            alias: ctable,
            name: "customers".into(),
        }));
        parent.columns.push(ColumnDecl::new(
            "id",
            Expr::Column(ColumnRef::new(ctable, "id", SqlType::Int)),
        ));

        let otable = aliases.fresh();
        let mut orders = Select::new(aliases.fresh());
        let orders_alias = orders.alias;
        orders.from = Some(Source::Table(TableSource {
            alias: otable,
            name: "orders".into(),
        }));
        orders.columns.push(ColumnDecl::new(
            "total",
            Expr::Column(ColumnRef::new(otable, "total", SqlType::Decimal)),
        ));
        orders.where_clause = Some(Expr::eq(
            Expr::Column(ColumnRef::new(otable, "customer_id", SqlType::Int)),
            Expr::Column(ColumnRef::new(parent_alias, "id", SqlType::Int)),
        ));
        let nested = Projection::new(
            orders,
            Projector::Expr(Expr::Column(ColumnRef::new(
                orders_alias,
                "total",
                SqlType::Decimal,
            ))),
        );

        let projection = Projection::new(
            parent,
            Projector::Record(vec![
                (
                    "id".into(),
                    Projector::Expr(Expr::Column(ColumnRef::new(
                        parent_alias,
                        "id",
                        SqlType::Int,
                    ))),
                ),
                ("orders".into(), Projector::Subquery(Box::new(nested))),
            ]),
        );
        let out = run(projection).unwrap();
        let joined = match &out.projector {
            Projector::Record(members) => match &members[1].1 {
                Projector::ClientJoin(j) => j,
                other => panic!("unexpected member projector {:?}", other),
            },
            other => panic!("unexpected projector {:?}", other),
        };
        assert_eq!(joined.outer_keys.len(), 1);
        assert_eq!(joined.inner_keys.len(), 1);
        assert!(joined.projection.select.where_clause.is_none());
        // Both keys read declared columns of their respective selects.
        match &joined.outer_keys[0] {
            Expr::Column(c) => assert_eq!(c.alias, out.select.alias),
            other => panic!("unexpected outer key {:?}", other),
        }
        match &joined.inner_keys[0] {
            Expr::Column(c) => assert_eq!(c.alias, joined.projection.select.alias),
            other => panic!("unexpected inner key {:?}", other),
        }
    }

    #[test]
    fn test_deferred_member_keys_become_parent_columns() {
        use crate::ast::projector::DeferredMember;

        let mut aliases = AliasGenerator::new();
        let ctable = aliases.fresh();
        let mut parent = Select::new(aliases.fresh());
        parent.from = Some(Source::Table(TableSource {
            alias: ctable,
            name: "customers".into(),
        }));
        parent.columns.push(ColumnDecl::new(
            "name",
            Expr::Column(ColumnRef::new(ctable, "name", SqlType::Text)),
        ));

        let otable = aliases.fresh();
        let mut orders = Select::new(aliases.fresh());
        let orders_alias = orders.alias;
        orders.from = Some(Source::Table(TableSource {
            alias: otable,
            name: "orders".into(),
        }));
        orders.columns.push(ColumnDecl::new(
            "total",
            Expr::Column(ColumnRef::new(otable, "total", SqlType::Decimal)),
        ));
        let nested = Projection::new(
            orders,
            Projector::Expr(Expr::Column(ColumnRef::new(
                orders_alias,
                "total",
                SqlType::Decimal,
            ))),
        );

        let member = DeferredMember {
            projection: nested,
            outer_keys: vec![Expr::Column(ColumnRef::new(ctable, "id", SqlType::Int))],
            key_params: vec!["orders_k0".into()],
        };
        let projection = Projection::new(
            parent,
            Projector::Record(vec![(
                "orders".into(),
                Projector::Deferred(Box::new(member)),
            )]),
        );
        let out = run(projection).unwrap();
        let Projector::Record(members) = &out.projector else {
            panic!("expected a record projector");
        };
        let Projector::Deferred(deferred) = &members[0].1 else {
            panic!("expected a deferred member");
        };
        // The key reads a declared column of the parent select.
        match &deferred.outer_keys[0] {
            Expr::Column(c) => {
                assert_eq!(c.alias, out.select.alias);
                assert!(out.select.columns.iter().any(|d| d.name == c.name));
            }
            other => panic!("unexpected outer key {:?}", other),
        }
    }

    #[test]
    fn test_non_equality_correlation_is_rejected() {
        let mut aliases = AliasGenerator::new();
        let parent_alias = aliases.fresh();
        let mut parent = Select::new(parent_alias);
        parent.columns.push(ColumnDecl::new(
            "id",
            Expr::value(1i64),
        ));

        let mut inner = Select::new(aliases.fresh());
        let inner_alias = inner.alias;
        inner.columns.push(ColumnDecl::new("v", Expr::value(2i64)));
        inner.where_clause = Some(Expr::binary(
            BinaryOp::Lt,
            Expr::Column(ColumnRef::new(inner_alias, "v", SqlType::Int)),
            Expr::Column(ColumnRef::new(parent_alias, "id", SqlType::Int)),
        ));
        let nested = Projection::new(
            inner,
            Projector::Expr(Expr::Column(ColumnRef::new(inner_alias, "v", SqlType::Int))),
        );
        let projection = Projection::new(parent, Projector::Subquery(Box::new(nested)));
        assert!(run(projection).is_err());
    }
}
