//! Error types for relq.

use thiserror::Error;

use crate::ast::TableAlias;

#[derive(Debug, Error)]
pub enum RelqError {
    /// The operator chain cannot be translated (unsupported shape, unknown
    /// member, bad arity). Raised at bind time, before any SQL exists.
    #[error("bind error: {0}")]
    Bind(String),

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("unknown member '{member}' on entity '{entity}'")]
    UnknownMember { entity: String, member: String },

    /// A rewrite pass produced a tree referencing an alias no reachable
    /// source declares. This is a compiler defect, never a user error.
    #[error("rewrite invariant violation: column '{column}' references undeclared alias {alias:?}")]
    DanglingAlias { alias: TableAlias, column: String },

    /// The formatter met an AST shape with no SQL rendering for the active
    /// dialect. Indicates a missing rewrite; compilation aborts.
    #[error("no {dialect} rendering for {construct}")]
    Untranslatable {
        construct: &'static str,
        dialect: &'static str,
    },

    /// Declared projector shape does not line up with the formatted columns.
    #[error("materializer error: {0}")]
    Materialize(String),

    /// Singleton aggregators (`single`, `first`) violated at execution.
    #[error("cardinality error: {0}")]
    Cardinality(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    /// Surfaced unmodified from the execution collaborator.
    #[error("execution error: {0}")]
    Execution(String),
}

impl RelqError {
    /// Create a bind error.
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind(message.into())
    }

    /// Create a materializer error.
    pub fn materialize(message: impl Into<String>) -> Self {
        Self::Materialize(message.into())
    }
}

/// Result type alias for relq operations.
pub type RelqResult<T> = Result<T, RelqError>;
