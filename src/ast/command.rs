//! Command nodes: inserts, updates, deletes and their orchestration forms.

use serde::{Deserialize, Serialize};

use crate::ast::expr::Expr;
use crate::ast::projector::Projection;
use crate::ast::query::TableSource;
use crate::types::SqlType;

/// One `column = value` pair of an insert or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAssignment {
    pub column: String,
    pub ty: SqlType,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertCommand {
    pub table: TableSource,
    pub assignments: Vec<ColumnAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommand {
    pub table: TableSource,
    pub where_clause: Expr,
    pub assignments: Vec<ColumnAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCommand {
    pub table: TableSource,
    pub where_clause: Expr,
}

/// Server-side "compute and remember": run `source`, store its single row
/// into named variables readable by later commands in the same block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationCommand {
    pub variables: Vec<(String, SqlType)>,
    pub source: crate::ast::query::Select,
}

/// Conditional command. `check` is evaluated between round trips from the
/// block environment (affected-row counts, declared variables) or via an
/// existence probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfCommand {
    pub check: Expr,
    pub then_command: Command,
    pub else_command: Option<Command>,
}

/// One command template applied per input item, `batch_size` items per round
/// trip. `stream` selects lazy, single-pass result production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCommand {
    pub template: Box<Command>,
    pub batch_size: usize,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    Block(Vec<Command>),
    If(Box<IfCommand>),
    Declare(DeclarationCommand),
    /// A row-returning step inside a command plan (e.g. a generated-key
    /// read-back projected to the caller).
    Query(Projection),
    Batch(BatchCommand),
}
