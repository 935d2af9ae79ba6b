//! Expands composite equality into member-wise predicates.
//!
//! `RowCompare` nodes carry projector-level operands. Here they become plain
//! scalar predicates: entities and records compare member by member, a
//! composite against a null literal becomes an all-members-null test, and a
//! value on the nullable side of an outer join tests its join marker.

use crate::ast::expr::Expr;
use crate::ast::projector::{Projection, Projector};
use crate::ast::value::Value;
use crate::ast::visit::{self, Rewriter};
use crate::error::{RelqError, RelqResult};

pub fn run(projection: Projection) -> RelqResult<Projection> {
    let mut pass = Expander { error: None };
    let out = pass.apply(projection);
    match pass.error {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

struct Expander {
    error: Option<RelqError>,
}

impl Rewriter for Expander {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        let walked = visit::walk_expr(self, expr);
        let current = walked.as_ref().unwrap_or(expr);
        if let Expr::RowCompare {
            negated,
            left,
            right,
        } = current
        {
            let expanded = match expand(left, right) {
                Ok(e) => e,
                Err(e) => {
                    if self.error.is_none() {
                        self.error = Some(e);
                    }
                    return walked;
                }
            };
            return Some(if *negated {
                Expr::Not(Box::new(expanded))
            } else {
                expanded
            });
        }
        walked
    }
}

fn expand(left: &Projector, right: &Projector) -> RelqResult<Expr> {
    use Projector::*;
    match (left, right) {
        (Expr(a), Expr(b)) => Ok(compare_scalars(a, b)),
        // A value from the nullable side of an outer join is null exactly
        // when its join marker is.
        (OuterJoined { test, .. }, Expr(e)) | (Expr(e), OuterJoined { test, .. })
            if is_null_literal(e) =>
        {
            Ok(crate::ast::expr::Expr::is_null((**test).clone()))
        }
        (OuterJoined { inner, .. }, other) => expand(inner, other),
        (other, OuterJoined { inner, .. }) => expand(other, inner),
        (composite @ (Entity { .. } | Record(_)), Expr(e))
        | (Expr(e), composite @ (Entity { .. } | Record(_)))
            if is_null_literal(e) =>
        {
            all_members_null(composite)
        }
        (Entity { members: a, .. } | Record(a), Entity { members: b, .. } | Record(b)) => {
            let mut parts = Vec::with_capacity(a.len());
            for (name, lm) in a {
                let rm = b
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, m)| m)
                    .ok_or_else(|| {
                        RelqError::bind(format!(
                            "member `{name}` is missing from one side of an equality"
                        ))
                    })?;
                parts.push(expand(lm, rm)?);
            }
            crate::ast::expr::Expr::conjoin(parts)
                .ok_or_else(|| RelqError::bind("cannot compare values with no members"))
        }
        _ => Err(RelqError::bind(
            "values of this shape cannot be compared for equality",
        )),
    }
}

fn compare_scalars(a: &Expr, b: &Expr) -> Expr {
    if is_null_literal(a) {
        Expr::is_null(b.clone())
    } else if is_null_literal(b) {
        Expr::is_null(a.clone())
    } else {
        Expr::eq(a.clone(), b.clone())
    }
}

fn is_null_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Null))
}

/// A composite equals null exactly when every scalar member is null.
fn all_members_null(projector: &Projector) -> RelqResult<Expr> {
    let mut leaves = vec![];
    projector.own_exprs(&mut leaves);
    Expr::conjoin(leaves.into_iter().map(|e| Expr::is_null(e.clone())))
        .ok_or_else(|| RelqError::bind("cannot compare values with no members"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::ColumnRef;
    use crate::ast::query::Select;
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    fn entity(alias: crate::ast::TableAlias, prefix: &str) -> Projector {
        Projector::Entity {
            entity: "Customer".into(),
            members: vec![
                (
                    "id".into(),
                    Projector::Expr(Expr::Column(ColumnRef::new(
                        alias,
                        format!("{prefix}_id"),
                        SqlType::Int,
                    ))),
                ),
                (
                    "name".into(),
                    Projector::Expr(Expr::Column(ColumnRef::new(
                        alias,
                        format!("{prefix}_name"),
                        SqlType::Text,
                    ))),
                ),
            ],
        }
    }

    #[test]
    fn test_entity_equality_expands_member_wise() {
        let mut aliases = AliasGenerator::new();
        let alias = aliases.fresh();
        let mut select = Select::new(alias);
        select.where_clause = Some(Expr::RowCompare {
            negated: false,
            left: Box::new(entity(alias, "a")),
            right: Box::new(entity(alias, "b")),
        });
        let projector = Projector::Expr(Expr::value(1i64));
        let out = run(Projection::new(select, projector)).unwrap();
        let conjuncts_len = out
            .select
            .where_clause
            .as_ref()
            .map(|w| w.conjuncts().len())
            .unwrap_or(0);
        assert_eq!(conjuncts_len, 2);
    }

    #[test]
    fn test_entity_against_null_tests_all_members() {
        let mut aliases = AliasGenerator::new();
        let alias = aliases.fresh();
        let mut select = Select::new(alias);
        select.where_clause = Some(Expr::RowCompare {
            negated: true,
            left: Box::new(entity(alias, "a")),
            right: Box::new(Projector::Expr(Expr::Value(Value::Null))),
        });
        let projector = Projector::Expr(Expr::value(1i64));
        let out = run(Projection::new(select, projector)).unwrap();
        match out.select.where_clause {
            Some(Expr::Not(inner)) => {
                assert!(inner
                    .conjuncts()
                    .iter()
                    .all(|c| matches!(c, Expr::IsNull { .. })));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_outer_joined_null_test_uses_marker() {
        let mut aliases = AliasGenerator::new();
        let alias = aliases.fresh();
        let test_col = Expr::Column(ColumnRef::new(alias, "test", SqlType::Int));
        let mut select = Select::new(alias);
        select.where_clause = Some(Expr::RowCompare {
            negated: false,
            left: Box::new(Projector::OuterJoined {
                test: Box::new(test_col.clone()),
                inner: Box::new(entity(alias, "a")),
            }),
            right: Box::new(Projector::Expr(Expr::Value(Value::Null))),
        });
        let projector = Projector::Expr(Expr::value(1i64));
        let out = run(Projection::new(select, projector)).unwrap();
        match out.select.where_clause {
            Some(Expr::IsNull { expr, .. }) => assert_eq!(*expr, test_col),
            other => panic!("unexpected predicate {:?}", other),
        }
    }
}
