//! Operator-chain expressions: the declarative surface the binder consumes.
//!
//! These are not relational AST nodes; they denote values in terms of bound
//! row variables and are rewritten through the binder's scope map into
//! column-level expressions.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::ast::expr::{AggregateFunc, BinaryOp};
use crate::ast::value::Value;
use crate::types::SqlType;

/// Identity of one bound variable. Identity, not name, keys the binder's
/// substitution map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(u32);

static NEXT_VAR: AtomicU32 = AtomicU32::new(0);

impl VarId {
    fn fresh() -> VarId {
        VarId(NEXT_VAR.fetch_add(1, Ordering::Relaxed))
    }
}

/// A bound row variable handle, handed to closures building lambdas.
#[derive(Debug, Clone, Copy)]
pub struct Var(VarId);

impl Var {
    pub(crate) fn fresh() -> Var {
        Var(VarId::fresh())
    }

    pub fn id(&self) -> VarId {
        self.0
    }

    /// Reference the whole row value.
    pub fn expr(&self) -> OpExpr {
        OpExpr::Var(self.0)
    }

    /// Access a mapped member or relationship.
    pub fn member(&self, name: impl Into<String>) -> OpExpr {
        self.expr().member(name)
    }
}

/// A lambda: bound parameters plus a body over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<VarId>,
    pub body: OpExpr,
}

impl Lambda {
    pub fn unary(f: impl FnOnce(Var) -> OpExpr) -> Lambda {
        let v = Var::fresh();
        Lambda {
            params: vec![v.id()],
            body: f(v),
        }
    }

    pub fn binary(f: impl FnOnce(Var, Var) -> OpExpr) -> Lambda {
        let a = Var::fresh();
        let b = Var::fresh();
        Lambda {
            params: vec![a.id(), b.id()],
            body: f(a, b),
        }
    }
}

/// Declarative value expressions over bound variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpExpr {
    Var(VarId),
    Member(Box<OpExpr>, String),
    Value(Value),
    /// External named parameter, supplied at execution time.
    Bind(String, SqlType),
    Binary(BinaryOp, Box<OpExpr>, Box<OpExpr>),
    Not(Box<OpExpr>),
    Negate(Box<OpExpr>),
    IsNull(Box<OpExpr>, bool),
    Func(String, Vec<OpExpr>),
    /// Anonymous composite value.
    Record(Vec<(String, OpExpr)>),
    /// Aggregate over a sequence-denoting expression.
    Aggregate {
        func: AggregateFunc,
        source: Box<OpExpr>,
        selector: Option<Box<Lambda>>,
        distinct: bool,
    },
    /// Membership in a local in-memory collection.
    InList(Box<OpExpr>, Vec<Value>),
    /// A nested query used as a value/sequence.
    Subquery(Box<super::QueryOp>),
    /// Existence test over a sequence.
    Any {
        source: Box<OpExpr>,
        predicate: Option<Box<Lambda>>,
    },
    All {
        source: Box<OpExpr>,
        predicate: Box<Lambda>,
    },
}

impl OpExpr {
    pub fn value(v: impl Into<Value>) -> OpExpr {
        OpExpr::Value(v.into())
    }

    pub fn bind(name: impl Into<String>, ty: SqlType) -> OpExpr {
        OpExpr::Bind(name.into(), ty)
    }

    pub fn member(self, name: impl Into<String>) -> OpExpr {
        OpExpr::Member(Box::new(self), name.into())
    }

    fn binary(self, op: BinaryOp, other: OpExpr) -> OpExpr {
        OpExpr::Binary(op, Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Eq, other.into())
    }

    pub fn ne(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Ne, other.into())
    }

    pub fn lt(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Lt, other.into())
    }

    pub fn le(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Le, other.into())
    }

    pub fn gt(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Gt, other.into())
    }

    pub fn ge(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Ge, other.into())
    }

    pub fn and(self, other: OpExpr) -> OpExpr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: OpExpr) -> OpExpr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Add, other.into())
    }

    pub fn sub(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Sub, other.into())
    }

    pub fn mul(self, other: impl Into<OpExpr>) -> OpExpr {
        self.binary(BinaryOp::Mul, other.into())
    }

    pub fn not(self) -> OpExpr {
        OpExpr::Not(Box::new(self))
    }

    pub fn is_null(self) -> OpExpr {
        OpExpr::IsNull(Box::new(self), false)
    }

    pub fn is_not_null(self) -> OpExpr {
        OpExpr::IsNull(Box::new(self), true)
    }

    /// `self IN (values...)` over a local collection.
    pub fn in_list(self, values: impl IntoIterator<Item = impl Into<Value>>) -> OpExpr {
        OpExpr::InList(
            Box::new(self),
            values.into_iter().map(Into::into).collect(),
        )
    }

    /// Count of a sequence-denoting expression.
    pub fn count(self) -> OpExpr {
        OpExpr::Aggregate {
            func: AggregateFunc::Count,
            source: Box::new(self),
            selector: None,
            distinct: false,
        }
    }

    pub fn sum(self, selector: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        self.aggregate(AggregateFunc::Sum, selector)
    }

    pub fn min(self, selector: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        self.aggregate(AggregateFunc::Min, selector)
    }

    pub fn max(self, selector: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        self.aggregate(AggregateFunc::Max, selector)
    }

    pub fn avg(self, selector: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        self.aggregate(AggregateFunc::Avg, selector)
    }

    fn aggregate(self, func: AggregateFunc, selector: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        OpExpr::Aggregate {
            func,
            source: Box::new(self),
            selector: Some(Box::new(Lambda::unary(selector))),
            distinct: false,
        }
    }

    pub fn any(self) -> OpExpr {
        OpExpr::Any {
            source: Box::new(self),
            predicate: None,
        }
    }

    pub fn any_where(self, predicate: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        OpExpr::Any {
            source: Box::new(self),
            predicate: Some(Box::new(Lambda::unary(predicate))),
        }
    }

    pub fn all(self, predicate: impl FnOnce(Var) -> OpExpr) -> OpExpr {
        OpExpr::All {
            source: Box::new(self),
            predicate: Box::new(Lambda::unary(predicate)),
        }
    }

    /// Build an anonymous composite value.
    pub fn record(fields: impl IntoIterator<Item = (&'static str, OpExpr)>) -> OpExpr {
        OpExpr::Record(
            fields
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        )
    }
}

impl<T> From<T> for OpExpr
where
    T: Into<Value>,
{
    fn from(v: T) -> Self {
        OpExpr::Value(v.into())
    }
}
