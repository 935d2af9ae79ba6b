//! Plan execution: runs compiled plans over a [`Connection`].
//!
//! Client-join lookups are drained fully before the primary query streams;
//! deferred members stay unbound until [`load_deferred`] is called for one.

use crate::ast::value::Value;
use crate::ast::Aggregator;
use crate::error::{RelqError, RelqResult};
use crate::exec::{Connection, Parameter, SqlCommand};
use crate::format::FormattedQuery;

use super::materialize::{self, DeferredLoad, Lookup, ResultValue};
use super::{CommandPlan, PlanQuery, QueryPlan};

/// What a command execution produced: the affected-row total, any declared
/// variables, and any rows a query step returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    pub affected: u64,
    pub declared: Vec<(String, Value)>,
    pub rows: Vec<ResultValue>,
}

/// Resolve a formatted query's placeholders against caller-supplied binds.
pub fn bind(query: &FormattedQuery, binds: &[(String, Value)]) -> RelqResult<SqlCommand> {
    let params = query
        .params
        .iter()
        .map(|p| {
            let value = match &p.value {
                Some(v) => v.clone(),
                None => binds
                    .iter()
                    .rev()
                    .find(|(name, _)| *name == p.name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| RelqError::MissingParameter(p.name.clone()))?,
            };
            Ok(Parameter {
                name: p.name.clone(),
                ty: p.ty,
                value,
            })
        })
        .collect::<RelqResult<_>>()?;
    Ok(SqlCommand {
        sql: query.sql.clone(),
        params,
    })
}

pub fn run_query(
    conn: &mut dyn Connection,
    plan: &QueryPlan,
    binds: &[(String, Value)],
) -> RelqResult<ResultValue> {
    let rows = run_plan_query(conn, &plan.query, binds)?;
    collapse(rows, plan.aggregator)
}

fn run_plan_query(
    conn: &mut dyn Connection,
    plan: &PlanQuery,
    binds: &[(String, Value)],
) -> RelqResult<Vec<ResultValue>> {
    let lookups = build_lookups(conn, plan, binds)?;
    let command = bind(&plan.query, binds)?;
    tracing::debug!(sql = %command.sql, "running query");
    let mut rows = conn.query(&command)?;
    let mut out = Vec::new();
    while rows.advance()? {
        out.push(materialize::read_row(plan, &*rows, &lookups)?);
    }
    Ok(out)
}

fn build_lookups(
    conn: &mut dyn Connection,
    plan: &PlanQuery,
    binds: &[(String, Value)],
) -> RelqResult<Vec<Lookup>> {
    let mut lookups = Vec::with_capacity(plan.children.len());
    for child in &plan.children {
        if child.key_ordinals.is_empty() {
            // Deferred member; nothing to prefetch.
            lookups.push(Lookup::new());
            continue;
        }
        let nested = build_lookups(conn, &child.plan, binds)?;
        let command = bind(&child.plan.query, binds)?;
        tracing::debug!(sql = %command.sql, "running client-join query");
        let mut lookup = Lookup::new();
        let mut rows = conn.query(&command)?;
        while rows.advance()? {
            let key = materialize::row_key(&*rows, &child.key_ordinals)?;
            let value = materialize::read_row(&child.plan, &*rows, &nested)?;
            lookup.entry(key).or_default().push(value);
        }
        lookups.push(lookup);
    }
    Ok(lookups)
}

/// Run a deferred member's query now.
pub fn load_deferred(
    conn: &mut dyn Connection,
    load: &DeferredLoad,
) -> RelqResult<Vec<ResultValue>> {
    let lookups = build_lookups(conn, &load.plan, &[])?;
    tracing::debug!(sql = %load.command.sql, "loading deferred member");
    let mut rows = conn.query(&load.command)?;
    let mut out = Vec::new();
    while rows.advance()? {
        out.push(materialize::read_row(&load.plan, &*rows, &lookups)?);
    }
    Ok(out)
}

fn collapse(mut rows: Vec<ResultValue>, aggregator: Option<Aggregator>) -> RelqResult<ResultValue> {
    let Some(aggregator) = aggregator else {
        return Ok(ResultValue::List(rows));
    };
    match aggregator {
        Aggregator::Single => {
            if rows.len() != 1 {
                return Err(RelqError::Cardinality(format!(
                    "expected exactly one row, got {}",
                    rows.len()
                )));
            }
            Ok(rows.swap_remove(0))
        }
        Aggregator::SingleOrDefault => match rows.len() {
            0 => Ok(ResultValue::Value(Value::Null)),
            1 => Ok(rows.swap_remove(0)),
            n => Err(RelqError::Cardinality(format!(
                "expected at most one row, got {}",
                n
            ))),
        },
        Aggregator::First => rows
            .into_iter()
            .next()
            .ok_or_else(|| RelqError::Cardinality("expected at least one row, got none".into())),
        Aggregator::FirstOrDefault => Ok(rows
            .into_iter()
            .next()
            .unwrap_or(ResultValue::Value(Value::Null))),
    }
}

pub fn run_command(
    conn: &mut dyn Connection,
    plan: &CommandPlan,
    binds: &[(String, Value)],
) -> RelqResult<CommandResult> {
    let mut env = binds.to_vec();
    run_step(conn, plan, &mut env)
}

fn run_step(
    conn: &mut dyn Connection,
    plan: &CommandPlan,
    env: &mut Vec<(String, Value)>,
) -> RelqResult<CommandResult> {
    match plan {
        CommandPlan::Statement(query) => {
            let command = bind(query, env)?;
            tracing::debug!(sql = %command.sql, "running statement");
            let affected = conn.execute(&command)?;
            Ok(CommandResult {
                affected,
                ..CommandResult::default()
            })
        }
        CommandPlan::Query(query_plan) => {
            let value = run_query(conn, query_plan, env)?;
            Ok(CommandResult {
                rows: vec![value],
                ..CommandResult::default()
            })
        }
        CommandPlan::Declare { variables, query } => {
            let command = bind(query, env)?;
            tracing::debug!(sql = %command.sql, "running declaration");
            let mut rows = conn.query(&command)?;
            if !rows.advance()? {
                return Err(RelqError::Cardinality(
                    "declaration query returned no row".into(),
                ));
            }
            let mut declared = Vec::with_capacity(variables.len());
            for (ordinal, (name, _)) in variables.iter().enumerate() {
                declared.push((name.clone(), rows.value(ordinal)?));
            }
            drop(rows);
            env.extend(declared.iter().cloned());
            Ok(CommandResult {
                declared,
                ..CommandResult::default()
            })
        }
        CommandPlan::If {
            probe,
            then_plan,
            else_plan,
        } => {
            let command = bind(probe, env)?;
            tracing::debug!(sql = %command.sql, "running existence probe");
            let exists = {
                let mut rows = conn.query(&command)?;
                rows.advance()?
            };
            if exists {
                run_step(conn, then_plan, env)
            } else if let Some(else_plan) = else_plan {
                run_step(conn, else_plan, env)
            } else {
                Ok(CommandResult::default())
            }
        }
        CommandPlan::Block(steps) => {
            let mut result = CommandResult::default();
            for step in steps {
                let step_result = run_step(conn, step, env)?;
                result.affected += step_result.affected;
                result.declared.extend(step_result.declared);
                result.rows.extend(step_result.rows);
            }
            Ok(result)
        }
        CommandPlan::Batch { .. } => Err(RelqError::Cardinality(
            "a batch plan needs per-item binds; use run_batch".into(),
        )),
    }
}

/// Apply a batch plan's template once per item. Plain statements go through
/// the connection's batched path, `batch_size` items per round trip;
/// compound templates fall back to one pass per item.
pub fn run_batch(
    conn: &mut dyn Connection,
    plan: &CommandPlan,
    items: &[Vec<(String, Value)>],
) -> RelqResult<Vec<CommandResult>> {
    let CommandPlan::Batch {
        template,
        batch_size,
        ..
    } = plan
    else {
        return items.iter().map(|item| run_command(conn, plan, item)).collect();
    };
    if let CommandPlan::Statement(query) = template.as_ref() {
        let chunk = (*batch_size).max(1);
        let mut results = Vec::with_capacity(items.len());
        let shell = SqlCommand {
            sql: query.sql.clone(),
            params: vec![],
        };
        for group in items.chunks(chunk) {
            let param_sets = group
                .iter()
                .map(|item| bind(query, item).map(|c| c.params))
                .collect::<RelqResult<Vec<_>>>()?;
            tracing::debug!(sql = %shell.sql, items = param_sets.len(), "running batch chunk");
            for affected in conn.execute_batch(&shell, &param_sets)? {
                results.push(CommandResult {
                    affected,
                    ..CommandResult::default()
                });
            }
        }
        return Ok(results);
    }
    items
        .iter()
        .map(|item| run_command(conn, template, item))
        .collect()
}
