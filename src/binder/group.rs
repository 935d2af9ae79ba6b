//! Grouping: a grouped select plus a correlated element sequence.
//!
//! The element sequence is an independent duplicate of the source, correlated
//! back to its group through null-safe key equality so NULL keys form a group
//! instead of disappearing. Aggregates over the elements are bound as
//! [`Expr::AggregateSubquery`] nodes and hoisted onto the grouped select by
//! the aggregate rewrite.

use super::columns::{flatten_projector, wrap};
use super::Binder;
use crate::ast::expr::Expr;
use crate::ast::projector::{Projection, Projector};
use crate::error::{RelqError, RelqResult};
use crate::query::expr::Lambda;

pub(super) fn bind_group_by(
    binder: &mut Binder,
    src: Projection,
    key: &Lambda,
    element: Option<&Lambda>,
) -> RelqResult<Projection> {
    let row = src.projector.clone();
    let twin = binder.duplicate(&src);

    let (mut group_select, _) = wrap(src, binder.aliases_mut());
    let key_value = binder.scoped(key.params[0], row.clone(), |b| b.bind_value(&key.body))?;
    let key_exprs = scalar_leaves(&key_value)?;
    group_select.group_by = key_exprs;
    let key_projector = flatten_projector(&key_value, &mut group_select);
    let key_columns = scalar_leaves(&key_projector)?;

    let twin_row = twin.projector.clone();
    let element_value = match element {
        Some(lambda) => {
            binder.scoped(lambda.params[0], twin_row.clone(), |b| b.bind_value(&lambda.body))?
        }
        None => twin_row.clone(),
    };
    let twin_keys = {
        let bound = binder.scoped(key.params[0], twin_row, |b| b.bind_value(&key.body))?;
        scalar_leaves(&bound)?
    };
    let (mut element_select, _) = wrap(twin, binder.aliases_mut());
    let element_projector = flatten_projector(&element_value, &mut element_select);
    element_select.where_clause = Expr::conjoin(
        key_columns
            .iter()
            .zip(&twin_keys)
            .map(|(g, e)| Expr::null_safe_eq(g.clone(), e.clone())),
    );

    binder.register_group(element_select.alias, group_select.alias, row);

    let elements = Projector::Subquery(Box::new(Projection::new(
        element_select,
        element_projector,
    )));
    let projector = Projector::Record(vec![
        ("key".to_string(), key_projector),
        ("elements".to_string(), elements),
    ]);
    Ok(Projection::new(group_select, projector))
}

/// The scalar leaves of a composite key, in traversal order.
fn scalar_leaves(projector: &Projector) -> RelqResult<Vec<Expr>> {
    fn collect(projector: &Projector, out: &mut Vec<Expr>) -> RelqResult<()> {
        match projector {
            Projector::Expr(e) => out.push(e.clone()),
            Projector::Entity { members, .. } | Projector::Record(members) => {
                for (_, m) in members {
                    collect(m, out)?;
                }
            }
            Projector::OuterJoined { inner, .. } => collect(inner, out)?,
            Projector::Subquery(_) | Projector::ClientJoin(_) | Projector::Deferred(_) => {
                return Err(RelqError::bind(
                    "sequence-valued grouping keys are not supported",
                ));
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    collect(projector, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::BinaryOp;
    use crate::mapping::{EntityDef, MappingRegistry, MemberDef};
    use crate::query::Query;
    use crate::types::SqlType;

    fn mapping() -> MappingRegistry {
        MappingRegistry::new().register(
            EntityDef::new("Order", "orders")
                .member(MemberDef::new("id", "id", SqlType::Int).primary_key())
                .member(MemberDef::new("customer_id", "customer_id", SqlType::Int))
                .member(MemberDef::new("amount", "amount", SqlType::Int)),
        )
    }

    #[test]
    fn test_group_elements_correlate_null_safely() {
        let mapping = mapping();
        let query = Query::entity("Order").group_by(|o| o.member("customer_id"));
        let bound = Binder::new(&mapping).bind_query(query.op()).unwrap();

        let Projector::Record(members) = &bound.projector else {
            panic!("expected a key/elements record");
        };
        let Projector::Subquery(elements) = &members[1].1 else {
            panic!("expected an element subquery");
        };
        // NULL keys must land in one group: (g IS NULL AND e IS NULL) OR g = e.
        let Some(Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        }) = &elements.select.where_clause
        else {
            panic!("expected a null-safe correlation");
        };
        let Expr::Binary {
            op: BinaryOp::And,
            left: null_a,
            right: null_b,
        } = left.as_ref()
        else {
            panic!("expected a both-null arm");
        };
        assert!(matches!(null_a.as_ref(), Expr::IsNull { negated: false, .. }));
        assert!(matches!(null_b.as_ref(), Expr::IsNull { negated: false, .. }));
        assert!(matches!(
            right.as_ref(),
            Expr::Binary { op: BinaryOp::Eq, .. }
        ));
    }
}
