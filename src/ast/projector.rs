//! Projectors: how result values are rebuilt from retrieved columns.

use serde::{Deserialize, Serialize};

use crate::ast::expr::Expr;
use crate::ast::query::Select;

/// How to collapse the materialized row sequence into a scalar/singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    /// Exactly one row; zero or many is an error.
    Single,
    /// At most one row; zero yields null.
    SingleOrDefault,
    /// At least one row; zero is an error.
    First,
    /// Zero rows yields null.
    FirstOrDefault,
}

/// A relationship materialized by a second round trip plus an in-memory
/// lookup keyed by `inner_keys`, probed with the parent row's `outer_keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientJoin {
    pub projection: Projection,
    pub outer_keys: Vec<Expr>,
    pub inner_keys: Vec<Expr>,
}

/// A relationship member loaded lazily: its query runs only when the member
/// is first accessed, parameterized by the parent's key values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredMember {
    pub projection: Projection,
    pub outer_keys: Vec<Expr>,
    /// Parameter names the deferred select binds the outer keys to.
    pub key_params: Vec<String>,
}

/// Expression describing how to reconstruct one result value from columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projector {
    /// A scalar value read.
    Expr(Expr),
    /// Reconstructs one mapped entity from member projectors.
    Entity {
        entity: String,
        members: Vec<(String, Projector)>,
    },
    /// An anonymous composite value.
    Record(Vec<(String, Projector)>),
    /// A value on the nullable side of an outer join: `inner` is only
    /// meaningful when `test` is non-null.
    OuterJoined {
        test: Box<Expr>,
        inner: Box<Projector>,
    },
    /// A correlated nested sequence, awaiting the singleton/client-join
    /// rewrites. Never reaches the formatter.
    Subquery(Box<Projection>),
    ClientJoin(Box<ClientJoin>),
    Deferred(Box<DeferredMember>),
}

impl Projector {
    pub fn scalar(expr: Expr) -> Projector {
        Projector::Expr(expr)
    }

    /// Visit every scalar expression directly owned by this projector tree,
    /// without descending into nested projections.
    pub fn own_exprs<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Projector::Expr(e) => out.push(e),
            Projector::Entity { members, .. } | Projector::Record(members) => {
                for (_, m) in members {
                    m.own_exprs(out);
                }
            }
            Projector::OuterJoined { test, inner } => {
                out.push(test);
                inner.own_exprs(out);
            }
            Projector::Subquery(_) | Projector::ClientJoin(_) | Projector::Deferred(_) => {}
        }
    }
}

/// The unit of a finished query: what SQL must retrieve plus how to rebuild
/// result values, plus an optional row-sequence collapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub select: Select,
    pub projector: Projector,
    pub aggregator: Option<Aggregator>,
}

impl Projection {
    pub fn new(select: Select, projector: Projector) -> Self {
        Self {
            select,
            projector,
            aggregator: None,
        }
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }
}
