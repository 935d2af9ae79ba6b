//! The declarative operator chain: a fluent, composable query surface that
//! the binder translates against the mapping contract.

pub mod expr;
mod shape;

pub use self::expr::{Lambda, OpExpr, Var, VarId};
pub use self::shape::shape_hash;

use serde::{Deserialize, Serialize};

use crate::ast::expr::{AggregateFunc, SortOrder};
use crate::ast::value::Value;

/// Root-level cardinality selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    First,
    Single,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantifyKind {
    Any,
    All,
}

/// One ordering step of an order-by chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub key: Lambda,
    pub order: SortOrder,
}

/// The operator tree. Each node consumes the sequence its source denotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    /// All rows of a mapped entity.
    Root(String),
    Filter {
        source: Box<QueryOp>,
        predicate: Lambda,
    },
    Project {
        source: Box<QueryOp>,
        selector: Lambda,
    },
    SelectMany {
        source: Box<QueryOp>,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Box<QueryOp>,
        inner: Box<QueryOp>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupJoin {
        outer: Box<QueryOp>,
        inner: Box<QueryOp>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    Order {
        source: Box<QueryOp>,
        orderings: Vec<Ordering>,
    },
    GroupBy {
        source: Box<QueryOp>,
        key: Lambda,
        element: Option<Lambda>,
    },
    Distinct {
        source: Box<QueryOp>,
    },
    Skip {
        source: Box<QueryOp>,
        count: OpExpr,
    },
    Take {
        source: Box<QueryOp>,
        count: OpExpr,
    },
    Reverse {
        source: Box<QueryOp>,
    },
    Intersect {
        source: Box<QueryOp>,
        other: Box<QueryOp>,
    },
    Except {
        source: Box<QueryOp>,
        other: Box<QueryOp>,
    },
    /// First/Single/Last (+OrDefault) at the root of a compiled unit.
    Element {
        source: Box<QueryOp>,
        kind: ElementKind,
        or_default: bool,
    },
    /// Count/Sum/Min/Max/Avg at the root.
    Aggregate {
        source: Box<QueryOp>,
        func: AggregateFunc,
        selector: Option<Lambda>,
    },
    /// Any/All at the root.
    Quantify {
        source: Box<QueryOp>,
        kind: QuantifyKind,
        predicate: Option<Lambda>,
    },
    /// Membership test at the root.
    Contains {
        source: Box<QueryOp>,
        value: Value,
    },
}

/// Fluent builder over [`QueryOp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    op: QueryOp,
}

impl Query {
    /// Start from all rows of a mapped entity.
    pub fn entity(name: impl Into<String>) -> Query {
        Query {
            op: QueryOp::Root(name.into()),
        }
    }

    pub fn op(&self) -> &QueryOp {
        &self.op
    }

    pub fn into_op(self) -> QueryOp {
        self.op
    }

    fn wrap(op: QueryOp) -> Query {
        Query { op }
    }

    pub fn filter(self, predicate: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::Filter {
            source: Box::new(self.op),
            predicate: Lambda::unary(predicate),
        })
    }

    pub fn select(self, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::Project {
            source: Box::new(self.op),
            selector: Lambda::unary(selector),
        })
    }

    /// Flatten a sequence-valued member or nested query.
    pub fn select_many(self, collection: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::SelectMany {
            source: Box::new(self.op),
            collection: Lambda::unary(collection),
            result: None,
        })
    }

    pub fn select_many_with(
        self,
        collection: impl FnOnce(Var) -> OpExpr,
        result: impl FnOnce(Var, Var) -> OpExpr,
    ) -> Query {
        Query::wrap(QueryOp::SelectMany {
            source: Box::new(self.op),
            collection: Lambda::unary(collection),
            result: Some(Lambda::binary(result)),
        })
    }

    pub fn join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Var) -> OpExpr,
        inner_key: impl FnOnce(Var) -> OpExpr,
        result: impl FnOnce(Var, Var) -> OpExpr,
    ) -> Query {
        Query::wrap(QueryOp::Join {
            outer: Box::new(self.op),
            inner: Box::new(inner.op),
            outer_key: Lambda::unary(outer_key),
            inner_key: Lambda::unary(inner_key),
            result: Lambda::binary(result),
        })
    }

    /// Join keeping the inner matches as a sequence value.
    pub fn group_join(
        self,
        inner: Query,
        outer_key: impl FnOnce(Var) -> OpExpr,
        inner_key: impl FnOnce(Var) -> OpExpr,
        result: impl FnOnce(Var, Var) -> OpExpr,
    ) -> Query {
        Query::wrap(QueryOp::GroupJoin {
            outer: Box::new(self.op),
            inner: Box::new(inner.op),
            outer_key: Lambda::unary(outer_key),
            inner_key: Lambda::unary(inner_key),
            result: Lambda::binary(result),
        })
    }

    pub fn order_by(self, key: impl FnOnce(Var) -> OpExpr) -> Query {
        self.ordered(key, SortOrder::Asc)
    }

    pub fn order_by_desc(self, key: impl FnOnce(Var) -> OpExpr) -> Query {
        self.ordered(key, SortOrder::Desc)
    }

    pub fn then_by(self, key: impl FnOnce(Var) -> OpExpr) -> Query {
        self.chained(key, SortOrder::Asc)
    }

    pub fn then_by_desc(self, key: impl FnOnce(Var) -> OpExpr) -> Query {
        self.chained(key, SortOrder::Desc)
    }

    fn ordered(self, key: impl FnOnce(Var) -> OpExpr, order: SortOrder) -> Query {
        Query::wrap(QueryOp::Order {
            source: Box::new(self.op),
            orderings: vec![Ordering {
                key: Lambda::unary(key),
                order,
            }],
        })
    }

    fn chained(self, key: impl FnOnce(Var) -> OpExpr, order: SortOrder) -> Query {
        match self.op {
            QueryOp::Order {
                source,
                mut orderings,
            } => {
                orderings.push(Ordering {
                    key: Lambda::unary(key),
                    order,
                });
                Query::wrap(QueryOp::Order { source, orderings })
            }
            other => Query::wrap(other).ordered(key, order),
        }
    }

    pub fn group_by(self, key: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::GroupBy {
            source: Box::new(self.op),
            key: Lambda::unary(key),
            element: None,
        })
    }

    pub fn group_by_with(
        self,
        key: impl FnOnce(Var) -> OpExpr,
        element: impl FnOnce(Var) -> OpExpr,
    ) -> Query {
        Query::wrap(QueryOp::GroupBy {
            source: Box::new(self.op),
            key: Lambda::unary(key),
            element: Some(Lambda::unary(element)),
        })
    }

    pub fn distinct(self) -> Query {
        Query::wrap(QueryOp::Distinct {
            source: Box::new(self.op),
        })
    }

    pub fn skip(self, count: impl Into<OpExpr>) -> Query {
        Query::wrap(QueryOp::Skip {
            source: Box::new(self.op),
            count: count.into(),
        })
    }

    pub fn take(self, count: impl Into<OpExpr>) -> Query {
        Query::wrap(QueryOp::Take {
            source: Box::new(self.op),
            count: count.into(),
        })
    }

    pub fn reverse(self) -> Query {
        Query::wrap(QueryOp::Reverse {
            source: Box::new(self.op),
        })
    }

    pub fn intersect(self, other: Query) -> Query {
        Query::wrap(QueryOp::Intersect {
            source: Box::new(self.op),
            other: Box::new(other.op),
        })
    }

    pub fn except(self, other: Query) -> Query {
        Query::wrap(QueryOp::Except {
            source: Box::new(self.op),
            other: Box::new(other.op),
        })
    }

    fn element(self, kind: ElementKind, or_default: bool) -> Query {
        Query::wrap(QueryOp::Element {
            source: Box::new(self.op),
            kind,
            or_default,
        })
    }

    pub fn first(self) -> Query {
        self.element(ElementKind::First, false)
    }

    pub fn first_or_default(self) -> Query {
        self.element(ElementKind::First, true)
    }

    pub fn single(self) -> Query {
        self.element(ElementKind::Single, false)
    }

    pub fn single_or_default(self) -> Query {
        self.element(ElementKind::Single, true)
    }

    pub fn last(self) -> Query {
        self.element(ElementKind::Last, false)
    }

    pub fn last_or_default(self) -> Query {
        self.element(ElementKind::Last, true)
    }

    pub fn count(self) -> Query {
        Query::wrap(QueryOp::Aggregate {
            source: Box::new(self.op),
            func: AggregateFunc::Count,
            selector: None,
        })
    }

    pub fn sum(self, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        self.aggregate(AggregateFunc::Sum, selector)
    }

    pub fn min(self, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        self.aggregate(AggregateFunc::Min, selector)
    }

    pub fn max(self, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        self.aggregate(AggregateFunc::Max, selector)
    }

    pub fn avg(self, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        self.aggregate(AggregateFunc::Avg, selector)
    }

    fn aggregate(self, func: AggregateFunc, selector: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::Aggregate {
            source: Box::new(self.op),
            func,
            selector: Some(Lambda::unary(selector)),
        })
    }

    pub fn any(self) -> Query {
        Query::wrap(QueryOp::Quantify {
            source: Box::new(self.op),
            kind: QuantifyKind::Any,
            predicate: None,
        })
    }

    pub fn any_where(self, predicate: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::Quantify {
            source: Box::new(self.op),
            kind: QuantifyKind::Any,
            predicate: Some(Lambda::unary(predicate)),
        })
    }

    pub fn all(self, predicate: impl FnOnce(Var) -> OpExpr) -> Query {
        Query::wrap(QueryOp::Quantify {
            source: Box::new(self.op),
            kind: QuantifyKind::All,
            predicate: Some(Lambda::unary(predicate)),
        })
    }

    pub fn contains(self, value: impl Into<Value>) -> Query {
        Query::wrap(QueryOp::Contains {
            source: Box::new(self.op),
            value: value.into(),
        })
    }

    /// Canonical-shape cache key: the structure with literals blanked.
    pub fn shape_hash(&self) -> u64 {
        shape::shape_hash(&self.op)
    }
}

/// Batch operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// A CRUD request compiled into a command plan. Instance values bind as
/// external named parameters so one compiled command serves every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandRequest {
    Insert {
        entity: String,
        /// Read back the server-generated key after the insert.
        return_generated: bool,
    },
    Update {
        entity: String,
    },
    Delete {
        entity: String,
    },
    DeleteWhere {
        entity: String,
        predicate: Lambda,
    },
    Upsert {
        entity: String,
    },
    Batch {
        entity: String,
        kind: BatchKind,
        batch_size: usize,
        stream: bool,
    },
}

impl CommandRequest {
    pub fn insert(entity: impl Into<String>) -> Self {
        CommandRequest::Insert {
            entity: entity.into(),
            return_generated: false,
        }
    }

    pub fn insert_returning_key(entity: impl Into<String>) -> Self {
        CommandRequest::Insert {
            entity: entity.into(),
            return_generated: true,
        }
    }

    pub fn update(entity: impl Into<String>) -> Self {
        CommandRequest::Update {
            entity: entity.into(),
        }
    }

    pub fn delete(entity: impl Into<String>) -> Self {
        CommandRequest::Delete {
            entity: entity.into(),
        }
    }

    pub fn delete_where(
        entity: impl Into<String>,
        predicate: impl FnOnce(Var) -> OpExpr,
    ) -> Self {
        CommandRequest::DeleteWhere {
            entity: entity.into(),
            predicate: Lambda::unary(predicate),
        }
    }

    pub fn upsert(entity: impl Into<String>) -> Self {
        CommandRequest::Upsert {
            entity: entity.into(),
        }
    }

    pub fn batch(entity: impl Into<String>, kind: BatchKind, batch_size: usize, stream: bool) -> Self {
        CommandRequest::Batch {
            entity: entity.into(),
            kind,
            batch_size,
            stream,
        }
    }
}
