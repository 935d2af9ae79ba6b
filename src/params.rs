//! Literal extraction: replaces literals in a finished tree with named
//! parameter placeholders so structurally identical queries compile to
//! identical SQL.
//!
//! Identical literals (same type, same value) share one name. Null and
//! boolean literals stay inline (they shape the predicate, not the data),
//! and so do numeric literals inside arithmetic, where inlining preserves
//! the target optimizer's constant folding.

use std::collections::HashMap;

use crate::ast::command::Command;
use crate::ast::expr::{Expr, NamedValue};
use crate::ast::projector::Projection;
use crate::ast::value::{Value, ValueKey};
use crate::ast::visit::{self, Rewriter};
use crate::types::SqlType;

pub fn parameterize(projection: Projection) -> Projection {
    let mut pass = Parameterizer::default();
    let out = pass.apply(projection);
    tracing::trace!(params = pass.seen.len(), "extracted parameters");
    out
}

pub fn parameterize_command(command: Command) -> Command {
    let mut pass = Parameterizer::default();
    let out = pass.apply_command(command);
    tracing::trace!(params = pass.seen.len(), "extracted parameters");
    out
}

#[derive(Default)]
struct Parameterizer {
    seen: HashMap<(SqlType, ValueKey), String>,
}

impl Parameterizer {
    fn extract(&mut self, value: &Value) -> Option<Expr> {
        match value {
            Value::Null | Value::Bool(_) => None,
            _ => {
                let ty = value.sql_type();
                let next = format!("p{}", self.seen.len());
                let name = self
                    .seen
                    .entry((ty, value.key()))
                    .or_insert(next)
                    .clone();
                Some(Expr::Named(NamedValue {
                    name,
                    ty,
                    value: Some(value.clone()),
                }))
            }
        }
    }
}

impl Rewriter for Parameterizer {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        match expr {
            Expr::Value(v) => self.extract(v),
            Expr::Binary { op, left, right } if op.is_arithmetic() => {
                let keep_inline =
                    |e: &Expr| matches!(e, Expr::Value(v) if v.is_numeric());
                let new_left = if keep_inline(left) {
                    None
                } else {
                    self.rewrite_expr(left)
                };
                let new_right = if keep_inline(right) {
                    None
                } else {
                    self.rewrite_expr(right)
                };
                if new_left.is_none() && new_right.is_none() {
                    return None;
                }
                Some(Expr::Binary {
                    op: *op,
                    left: Box::new(new_left.unwrap_or_else(|| (**left).clone())),
                    right: Box::new(new_right.unwrap_or_else(|| (**right).clone())),
                })
            }
            _ => visit::walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{BinaryOp, ColumnRef};
    use crate::ast::projector::Projector;
    use crate::ast::query::Select;
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    fn col(alias: crate::ast::TableAlias, name: &str) -> Expr {
        Expr::Column(ColumnRef::new(alias, name, SqlType::Int))
    }

    #[test]
    fn test_identical_literals_share_a_name() {
        let mut aliases = AliasGenerator::new();
        let a = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.where_clause = Some(Expr::and(
            Expr::eq(col(a, "x"), Expr::value(7i64)),
            Expr::eq(col(a, "y"), Expr::value(7i64)),
        ));
        let out = parameterize(Projection::new(select, Projector::Expr(Expr::value(true))));
        let names: Vec<_> = out
            .select
            .where_clause
            .as_ref()
            .unwrap()
            .conjuncts()
            .iter()
            .filter_map(|c| match c {
                Expr::Binary { right, .. } => match right.as_ref() {
                    Expr::Named(n) => Some(n.name.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], names[1]);
    }

    #[test]
    fn test_numeric_literal_in_arithmetic_stays_inline() {
        let mut aliases = AliasGenerator::new();
        let a = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        select.where_clause = Some(Expr::eq(
            Expr::binary(BinaryOp::Mul, col(a, "x"), Expr::value(2i64)),
            Expr::value(10i64),
        ));
        let out = parameterize(Projection::new(select, Projector::Expr(Expr::value(true))));
        match out.select.where_clause.as_ref().unwrap() {
            Expr::Binary { left, right, .. } => {
                match left.as_ref() {
                    Expr::Binary { right: factor, .. } => {
                        assert!(matches!(factor.as_ref(), Expr::Value(Value::Int(2))));
                    }
                    other => panic!("unexpected left {:?}", other),
                }
                assert!(matches!(right.as_ref(), Expr::Named(_)));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_different_values_same_shape_same_names() {
        let mut aliases = AliasGenerator::new();
        let a = aliases.fresh();
        let shape = |v: i64, aliases: &mut AliasGenerator| {
            let mut select = Select::new(aliases.fresh());
            select.where_clause = Some(Expr::eq(col(a, "x"), Expr::value(v)));
            parameterize(Projection::new(select, Projector::Expr(Expr::value(true))))
        };
        let first = shape(1, &mut aliases);
        let second = shape(2, &mut aliases);
        let name = |p: &Projection| match p.select.where_clause.as_ref().unwrap() {
            Expr::Binary { right, .. } => match right.as_ref() {
                Expr::Named(n) => n.name.clone(),
                other => panic!("unexpected rhs {:?}", other),
            },
            other => panic!("unexpected predicate {:?}", other),
        };
        assert_eq!(name(&first), name(&second));
    }
}
