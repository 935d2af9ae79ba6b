//! Ordered rewrite passes that turn a bound tree into dialect-ready SQL
//! shape.
//!
//! Pass order matters: cleanup exposes structure the semantic passes match
//! on, the singleton and client-join conversions consume the projector
//! subqueries the binder left behind, and the dialect-gated passes run last
//! because they trade portable shape for dialect-specific shape.

pub mod aggregates;
pub mod client_join;
pub mod comparer;
pub mod comparison;
pub mod cross_apply;
pub mod cross_join;
pub mod order_by;
pub mod paging;
pub mod redundant_columns;
pub mod redundant_join;
pub mod redundant_subquery;
pub mod scalar_subquery;
pub mod singleton;
pub mod unused_columns;
pub mod util;

pub(crate) use crate::binder::columns::Remapper;

use crate::ast::command::{BatchCommand, Command, IfCommand};
use crate::ast::projector::Projection;
use crate::ast::AliasGenerator;
use crate::error::RelqResult;
use crate::format::{Dialect, PagingStyle};

/// Run the full pipeline over a bound query.
pub fn finalize(projection: Projection, dialect: &dyn Dialect) -> RelqResult<Projection> {
    let mut aliases = AliasGenerator::starting_after(util::max_alias(&projection));
    let mut p = cleanup(projection);
    p = cross_apply::run(p);
    p = cross_join::run(p);
    p = redundant_join::run(p);
    p = aggregates::run(p);
    p = order_by::run(p);
    p = singleton::run(p, &mut aliases);
    p = client_join::run(p)?;
    p = comparison::run(p)?;
    if !dialect.supports_scalar_subquery_in_select() {
        p = scalar_subquery::run(p);
    }
    if dialect.paging_style() == PagingStyle::RowNumber {
        p = paging::run(p, &mut aliases);
    }
    // The singleton conversion introduces apply joins; decorrelate the ones
    // that turned out not to need lateral scope.
    p = cross_apply::run(p);
    p = cleanup(p);
    p = order_by::run(p);
    // The final hoist can declare ordering pass-through columns nothing
    // reads; prune those before verification.
    p = unused_columns::run(p);
    util::verify(&p)?;
    Ok(p)
}

/// Run the pipeline over every query embedded in a command tree.
pub fn finalize_command(command: Command, dialect: &dyn Dialect) -> RelqResult<Command> {
    Ok(match command {
        Command::Query(p) => Command::Query(finalize(p, dialect)?),
        Command::Block(commands) => Command::Block(
            commands
                .into_iter()
                .map(|c| finalize_command(c, dialect))
                .collect::<RelqResult<_>>()?,
        ),
        Command::If(if_cmd) => {
            let IfCommand {
                check,
                then_command,
                else_command,
            } = *if_cmd;
            Command::If(Box::new(IfCommand {
                check,
                then_command: finalize_command(then_command, dialect)?,
                else_command: else_command
                    .map(|c| finalize_command(c, dialect))
                    .transpose()?,
            }))
        }
        Command::Batch(batch) => Command::Batch(BatchCommand {
            template: Box::new(finalize_command(*batch.template, dialect)?),
            batch_size: batch.batch_size,
            stream: batch.stream,
        }),
        other => other,
    })
}

/// Column and subquery cleanup, run once up front and again after the
/// structural passes uncover more dead weight.
fn cleanup(projection: Projection) -> Projection {
    let p = unused_columns::run(projection);
    let p = redundant_columns::run(p);
    redundant_subquery::run(p)
}
