//! The relational AST: immutable value trees produced by the binder,
//! reshaped by the rewrite passes and rendered by the formatter.

pub mod alias;
pub mod command;
pub mod dup;
pub mod expr;
pub mod projector;
pub mod query;
pub mod value;
pub mod visit;

pub use self::alias::{AliasGenerator, TableAlias};
pub use self::command::{
    BatchCommand, Command, ColumnAssignment, DeclarationCommand, DeleteCommand, IfCommand,
    InsertCommand, UpdateCommand,
};
pub use self::expr::{
    AggregateFunc, AggregateSubquery, BinaryOp, ColumnRef, Expr, InSet, NamedValue, OrderExpr,
    SortOrder,
};
pub use self::projector::{Aggregator, ClientJoin, DeferredMember, Projection, Projector};
pub use self::query::{ColumnDecl, Join, JoinKind, Select, Source, TableSource};
pub use self::value::Value;
pub use self::visit::{Rewriter, Visitor};
