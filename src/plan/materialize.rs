//! Ordinal-resolved materializers.
//!
//! Projectors reference columns by alias and name; a materializer resolves
//! each reference to a cursor ordinal once, at plan-compile time, so the
//! per-row path never searches the select again. A projector expression that
//! is not a plain read of a declared root column is a compilation error
//! here, never a silent null at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::projector::{ClientJoin, DeferredMember, Projection, Projector};
use crate::ast::query::Select;
use crate::ast::value::{Value, ValueKey};
use crate::ast::Expr;
use crate::error::{RelqError, RelqResult};
use crate::exec::{Rows, SqlCommand};
use crate::format::{self, Dialect};
use crate::types::SqlType;

use super::{ChildPlan, PlanQuery};

/// A projector with every column reference resolved to a cursor ordinal.
#[derive(Debug, Clone, PartialEq)]
pub enum Materializer {
    Column { ordinal: usize, ty: SqlType },
    Entity {
        entity: String,
        members: Vec<(String, Materializer)>,
    },
    Record(Vec<(String, Materializer)>),
    /// Nullable side of an outer join: read `inner` only when the test
    /// ordinal is non-null.
    OuterJoined {
        test: usize,
        inner: Box<Materializer>,
    },
    /// Probe the lookup built from child plan `child` with this row's key
    /// values.
    ClientJoin {
        child: usize,
        outer_key_ordinals: Vec<usize>,
    },
    /// Bind child plan `child`'s key parameters from this row, to be run on
    /// first access.
    Deferred {
        child: usize,
        key_params: Vec<String>,
        outer_key_ordinals: Vec<usize>,
    },
}

/// A materialized value: scalars, composites, and related sequences.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Value(Value),
    Entity {
        entity: String,
        members: Vec<(String, ResultValue)>,
    },
    Record(Vec<(String, ResultValue)>),
    List(Vec<ResultValue>),
    Deferred(DeferredLoad),
}

/// A lazy member: the bound command and the plan to materialize its rows,
/// untouched until [`run::load_deferred`](super::run::load_deferred) runs it.
#[derive(Debug, Clone)]
pub struct DeferredLoad {
    pub command: SqlCommand,
    pub plan: Arc<PlanQuery>,
}

impl PartialEq for DeferredLoad {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
    }
}

pub(crate) type Lookup = HashMap<Vec<ValueKey>, Vec<ResultValue>>;

pub(crate) fn compile(dialect: &dyn Dialect, projection: &Projection) -> RelqResult<PlanQuery> {
    let query = format::format_select(dialect, &projection.select)?;
    let mut children = Vec::new();
    let materializer = build(dialect, &projection.select, &projection.projector, &mut children)?;
    Ok(PlanQuery {
        query,
        materializer,
        children,
    })
}

fn build(
    dialect: &dyn Dialect,
    select: &Select,
    projector: &Projector,
    children: &mut Vec<ChildPlan>,
) -> RelqResult<Materializer> {
    Ok(match projector {
        Projector::Expr(expr) => {
            let (ordinal, ty) = ordinal_of(select, expr)?;
            Materializer::Column { ordinal, ty }
        }
        Projector::Entity { entity, members } => Materializer::Entity {
            entity: entity.clone(),
            members: build_members(dialect, select, members, children)?,
        },
        Projector::Record(members) => {
            Materializer::Record(build_members(dialect, select, members, children)?)
        }
        Projector::OuterJoined { test, inner } => Materializer::OuterJoined {
            test: ordinal_of(select, test)?.0,
            inner: Box::new(build(dialect, select, inner, children)?),
        },
        Projector::ClientJoin(join) => build_client_join(dialect, select, join, children)?,
        Projector::Deferred(member) => build_deferred(dialect, select, member, children)?,
        Projector::Subquery(_) => {
            return Err(RelqError::materialize(
                "nested sequence was not rewritten to a client join",
            ));
        }
    })
}

fn build_members(
    dialect: &dyn Dialect,
    select: &Select,
    members: &[(String, Projector)],
    children: &mut Vec<ChildPlan>,
) -> RelqResult<Vec<(String, Materializer)>> {
    members
        .iter()
        .map(|(name, m)| Ok((name.clone(), build(dialect, select, m, children)?)))
        .collect()
}

fn build_client_join(
    dialect: &dyn Dialect,
    select: &Select,
    join: &ClientJoin,
    children: &mut Vec<ChildPlan>,
) -> RelqResult<Materializer> {
    let outer_key_ordinals = ordinals_of(select, &join.outer_keys)?;
    let key_ordinals = ordinals_of(&join.projection.select, &join.inner_keys)?;
    let plan = Arc::new(compile(dialect, &join.projection)?);
    children.push(ChildPlan { plan, key_ordinals });
    Ok(Materializer::ClientJoin {
        child: children.len() - 1,
        outer_key_ordinals,
    })
}

fn build_deferred(
    dialect: &dyn Dialect,
    select: &Select,
    member: &DeferredMember,
    children: &mut Vec<ChildPlan>,
) -> RelqResult<Materializer> {
    let outer_key_ordinals = ordinals_of(select, &member.outer_keys)?;
    let plan = Arc::new(compile(dialect, &member.projection)?);
    children.push(ChildPlan {
        plan,
        key_ordinals: vec![],
    });
    Ok(Materializer::Deferred {
        child: children.len() - 1,
        key_params: member.key_params.clone(),
        outer_key_ordinals,
    })
}

fn ordinals_of(select: &Select, exprs: &[Expr]) -> RelqResult<Vec<usize>> {
    exprs
        .iter()
        .map(|e| ordinal_of(select, e).map(|(ordinal, _)| ordinal))
        .collect()
}

fn ordinal_of(select: &Select, expr: &Expr) -> RelqResult<(usize, SqlType)> {
    let Expr::Column(column) = expr else {
        return Err(RelqError::materialize(
            "projector reads an expression the query does not deliver as a column",
        ));
    };
    if column.alias != select.alias {
        return Err(RelqError::materialize(format!(
            "projector reads column '{}' from a source the query does not produce",
            column.name
        )));
    }
    let Some(ordinal) = select.columns.iter().position(|c| c.name == column.name) else {
        return Err(RelqError::materialize(format!(
            "projector reads undeclared column '{}'",
            column.name
        )));
    };
    let declared = select.columns[ordinal].sql_type();
    if declared != SqlType::Unknown && column.ty != SqlType::Unknown && declared != column.ty {
        return Err(RelqError::materialize(format!(
            "column '{}' is declared as {:?} but read as {:?}",
            column.name, declared, column.ty
        )));
    }
    Ok((ordinal, column.ty))
}

/// Rebuild one result value from the cursor's current row.
pub(crate) fn read_row(
    plan: &PlanQuery,
    row: &dyn Rows,
    lookups: &[Lookup],
) -> RelqResult<ResultValue> {
    read(&plan.materializer, row, lookups, &plan.children)
}

fn read(
    materializer: &Materializer,
    row: &dyn Rows,
    lookups: &[Lookup],
    children: &[ChildPlan],
) -> RelqResult<ResultValue> {
    Ok(match materializer {
        Materializer::Column { ordinal, .. } => ResultValue::Value(row.value(*ordinal)?),
        Materializer::Entity { entity, members } => ResultValue::Entity {
            entity: entity.clone(),
            members: read_members(members, row, lookups, children)?,
        },
        Materializer::Record(members) => {
            ResultValue::Record(read_members(members, row, lookups, children)?)
        }
        Materializer::OuterJoined { test, inner } => {
            if row.value(*test)? == Value::Null {
                ResultValue::Value(Value::Null)
            } else {
                read(inner, row, lookups, children)?
            }
        }
        Materializer::ClientJoin {
            child,
            outer_key_ordinals,
        } => {
            let key = row_key(row, outer_key_ordinals)?;
            let matches = lookups
                .get(*child)
                .and_then(|lookup| lookup.get(&key))
                .cloned()
                .unwrap_or_default();
            ResultValue::List(matches)
        }
        Materializer::Deferred {
            child,
            key_params,
            outer_key_ordinals,
        } => {
            let Some(child_plan) = children.get(*child) else {
                return Err(RelqError::materialize("deferred member has no subplan"));
            };
            let command = bind_deferred(child_plan, key_params, outer_key_ordinals, row)?;
            ResultValue::Deferred(DeferredLoad {
                command,
                plan: Arc::clone(&child_plan.plan),
            })
        }
    })
}

fn read_members(
    members: &[(String, Materializer)],
    row: &dyn Rows,
    lookups: &[Lookup],
    children: &[ChildPlan],
) -> RelqResult<Vec<(String, ResultValue)>> {
    members
        .iter()
        .map(|(name, m)| Ok((name.clone(), read(m, row, lookups, children)?)))
        .collect()
}

pub(crate) fn row_key(row: &dyn Rows, ordinals: &[usize]) -> RelqResult<Vec<ValueKey>> {
    ordinals
        .iter()
        .map(|&ordinal| row.value(ordinal).map(|v| v.key()))
        .collect()
}

fn bind_deferred(
    child: &ChildPlan,
    key_params: &[String],
    outer_key_ordinals: &[usize],
    row: &dyn Rows,
) -> RelqResult<SqlCommand> {
    let params = child
        .plan
        .query
        .params
        .iter()
        .map(|p| {
            let value = match key_params.iter().position(|k| *k == p.name) {
                Some(slot) => {
                    let Some(&ordinal) = outer_key_ordinals.get(slot) else {
                        return Err(RelqError::materialize(
                            "deferred member key has no matching parent column",
                        ));
                    };
                    row.value(ordinal)?
                }
                None => match &p.value {
                    Some(v) => v.clone(),
                    None => return Err(RelqError::MissingParameter(p.name.clone())),
                },
            };
            Ok(crate::exec::Parameter {
                name: p.name.clone(),
                ty: p.ty,
                value,
            })
        })
        .collect::<RelqResult<_>>()?;
    Ok(SqlCommand {
        sql: child.plan.query.sql.clone(),
        params,
    })
}
