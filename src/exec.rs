//! The execution contract: what the compiler needs from whatever actually
//! talks to a database.
//!
//! The core never opens connections or retries; it hands a
//! [`SqlCommand`] to a [`Connection`] and reads a forward-only [`Rows`]
//! cursor back. Execution failures pass through unmodified.

use crate::ast::value::Value;
use crate::error::RelqResult;
use crate::types::SqlType;

/// One bound parameter, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: SqlType,
    pub value: Value,
}

/// SQL text plus its parameters, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub sql: String,
    pub params: Vec<Parameter>,
}

/// Forward-only, single-pass row cursor.
pub trait Rows {
    /// Move to the next row; false when exhausted.
    fn advance(&mut self) -> RelqResult<bool>;

    /// Read the current row's value at a column ordinal.
    fn value(&self, ordinal: usize) -> RelqResult<Value>;
}

pub trait Connection {
    /// Run a row-returning command.
    fn query(&mut self, command: &SqlCommand) -> RelqResult<Box<dyn Rows + '_>>;

    /// Run a statement, returning the affected-row count.
    fn execute(&mut self, command: &SqlCommand) -> RelqResult<u64>;

    /// Run one statement once per parameter set. A connection may override
    /// this with a true batched round trip.
    fn execute_batch(
        &mut self,
        command: &SqlCommand,
        param_sets: &[Vec<Parameter>],
    ) -> RelqResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            let bound = SqlCommand {
                sql: command.sql.clone(),
                params: params.clone(),
            };
            counts.push(self.execute(&bound)?);
        }
        Ok(counts)
    }
}
