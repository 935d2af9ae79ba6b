//! relq: a relational query compiler.
//!
//! Typed operator trees are bound against an entity mapping, lowered to a
//! relational AST, normalized by an ordered rewrite pipeline, and rendered
//! to dialect SQL with named parameters and an ordinal-resolved row
//! materializer. Compiled plans are cached by query shape, so repeated
//! queries differing only in literal values pay for compilation once.
//!
//! The crate never talks to a database itself; callers supply a
//! [`Connection`](exec::Connection) implementation and run plans through
//! [`plan::run_query`] / [`plan::run_command`], or go through the
//! [`QueryCompiler`] facade which does both.

pub mod ast;
pub mod binder;
pub mod compiler;
pub mod error;
pub mod exec;
pub mod format;
pub mod mapping;
pub mod params;
pub mod plan;
pub mod query;
pub mod rewrite;
pub mod types;

pub use compiler::QueryCompiler;
pub use error::{RelqError, RelqResult};
pub use exec::{Connection, Parameter, Rows, SqlCommand};
pub use format::{Dialect, FormattedQuery, MySql, Postgres, Sqlite, SqlServer};
pub use mapping::{EntityDef, EntityMapping, MappingRegistry, MemberDef, RelationshipDef};
pub use plan::{CommandPlan, CommandResult, QueryPlan, ResultValue};
pub use query::{CommandRequest, Query};
pub use types::SqlType;
