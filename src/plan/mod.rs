//! Execution plans: the compiler's finished product.
//!
//! A plan pairs formatted SQL with ordinal-resolved materialization, so per
//! row work is a handful of cursor reads. Multi-step commands keep their
//! orchestration shape (blocks, conditionals, declarations, batches) with
//! every embedded statement already formatted.

pub mod cache;
pub mod materialize;
pub mod run;

pub use cache::PlanCache;
pub use materialize::{DeferredLoad, Materializer, ResultValue};
pub use run::{bind, load_deferred, run_batch, run_command, run_query, CommandResult};

use std::sync::Arc;

use crate::ast::command::Command;
use crate::ast::expr::Expr;
use crate::ast::projector::{Aggregator, Projection};
use crate::error::{RelqError, RelqResult};
use crate::format::{self, Dialect, FormattedQuery};
use crate::types::SqlType;

/// A compiled query: the root select plus the row-collapse policy.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub query: PlanQuery,
    pub aggregator: Option<Aggregator>,
}

/// One formatted select plus how to rebuild values from its rows.
#[derive(Debug, Clone)]
pub struct PlanQuery {
    pub query: FormattedQuery,
    pub materializer: Materializer,
    /// Subplans for client-joined and deferred members, indexed by the
    /// materializer's child slots.
    pub children: Vec<ChildPlan>,
}

/// A related-rows query. For client joins `key_ordinals` names the inner key
/// columns the lookup is built over; deferred members correlate through
/// parameters instead and leave it empty.
#[derive(Debug, Clone)]
pub struct ChildPlan {
    pub plan: Arc<PlanQuery>,
    pub key_ordinals: Vec<usize>,
}

pub fn compile_query(dialect: &dyn Dialect, projection: &Projection) -> RelqResult<QueryPlan> {
    Ok(QueryPlan {
        query: materialize::compile(dialect, projection)?,
        aggregator: projection.aggregator,
    })
}

/// A compiled command tree: every statement formatted, orchestration intact.
#[derive(Debug, Clone)]
pub enum CommandPlan {
    /// A row-count statement (insert/update/delete).
    Statement(FormattedQuery),
    /// A row-returning step.
    Query(QueryPlan),
    /// Run, read one row, remember its values under the variable names.
    Declare {
        variables: Vec<(String, SqlType)>,
        query: FormattedQuery,
    },
    /// Existence-probed conditional.
    If {
        probe: FormattedQuery,
        then_plan: Box<CommandPlan>,
        else_plan: Option<Box<CommandPlan>>,
    },
    Block(Vec<CommandPlan>),
    /// One template applied per input item, `batch_size` items per round
    /// trip.
    Batch {
        template: Box<CommandPlan>,
        batch_size: usize,
        stream: bool,
    },
}

pub fn compile_command(dialect: &dyn Dialect, command: &Command) -> RelqResult<CommandPlan> {
    Ok(match command {
        Command::Insert(insert) => CommandPlan::Statement(format::format_insert(dialect, insert)?),
        Command::Update(update) => CommandPlan::Statement(format::format_update(dialect, update)?),
        Command::Delete(delete) => CommandPlan::Statement(format::format_delete(dialect, delete)?),
        Command::Declare(decl) => CommandPlan::Declare {
            variables: decl.variables.clone(),
            query: format::format_declaration(dialect, decl)?,
        },
        Command::If(if_cmd) => {
            let probe = match &if_cmd.check {
                Expr::Exists(select) => format::format_select(dialect, select)?,
                _ => {
                    return Err(RelqError::Untranslatable {
                        construct: "a non-existence command check",
                        dialect: dialect.name(),
                    });
                }
            };
            CommandPlan::If {
                probe,
                then_plan: Box::new(compile_command(dialect, &if_cmd.then_command)?),
                else_plan: match &if_cmd.else_command {
                    Some(c) => Some(Box::new(compile_command(dialect, c)?)),
                    None => None,
                },
            }
        }
        Command::Block(commands) => CommandPlan::Block(
            commands
                .iter()
                .map(|c| compile_command(dialect, c))
                .collect::<RelqResult<_>>()?,
        ),
        Command::Query(projection) => CommandPlan::Query(compile_query(dialect, projection)?),
        Command::Batch(batch) => CommandPlan::Batch {
            template: Box::new(compile_command(dialect, &batch.template)?),
            batch_size: batch.batch_size,
            stream: batch.stream,
        },
    })
}
