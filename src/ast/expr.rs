//! Scalar expressions of the relational AST.

use serde::{Deserialize, Serialize};

use crate::ast::alias::TableAlias;
use crate::ast::projector::Projector;
use crate::ast::query::Select;
use crate::ast::value::Value;
use crate::types::SqlType;

/// A reference to a column declared by the source carrying `alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub alias: TableAlias,
    pub name: String,
    pub ty: SqlType,
}

impl ColumnRef {
    pub fn new(alias: TableAlias, name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            alias,
            name: name.into(),
            ty,
        }
    }
}

/// A late-bound parameter placeholder.
///
/// `value` is `Some` for literals extracted by the parameterizer and `None`
/// for external binds supplied by the caller at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub ty: SqlType,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn flipped(&self) -> SortOrder {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// One ordering requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpr {
    pub expr: Expr,
    pub order: SortOrder,
}

/// The right-hand side of an `IN` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InSet {
    /// Expanded local collection.
    List(Vec<Expr>),
    /// Subquery producing one column.
    Query(Box<Select>),
}

/// A correlated aggregate awaiting the aggregate rewrite.
///
/// `in_group` is the aggregate expressed over the grouped select's own
/// sources; the rewrite hoists it as a computed column onto the select whose
/// alias is `group_alias`. When that select is no longer reachable the
/// `fallback` scalar subquery is kept instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSubquery {
    pub group_alias: TableAlias,
    pub in_group: Expr,
    pub fallback: Expr,
}

/// Scalar expression nodes. Immutable; transforms always rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Value(Value),
    Column(ColumnRef),
    Named(NamedValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    /// Subquery used as a scalar value (its first declared column).
    Scalar(Box<Select>),
    Exists(Box<Select>),
    In {
        expr: Box<Expr>,
        set: InSet,
    },
    AggregateSubquery(Box<AggregateSubquery>),
    /// Equality over two composite (entity/record) values; expanded into
    /// member-wise predicates by the comparison rewrite. Never formatted.
    RowCompare {
        negated: bool,
        left: Box<Projector>,
        right: Box<Projector>,
    },
    /// `ROW_NUMBER() OVER (ORDER BY ...)`, introduced by the paging rewrite.
    RowNumber {
        order_by: Vec<OrderExpr>,
    },
}

impl Expr {
    pub fn value(v: impl Into<Value>) -> Expr {
        Expr::Value(v.into())
    }

    pub fn column(c: ColumnRef) -> Expr {
        Expr::Column(c)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    /// Null-safe equality: `(a IS NULL AND b IS NULL) OR a = b`.
    ///
    /// This is the grouping-key comparison: NULL keys group together instead
    /// of being excluded.
    pub fn null_safe_eq(a: Expr, b: Expr) -> Expr {
        let both_null = Expr::and(Expr::is_null(a.clone()), Expr::is_null(b.clone()));
        Expr::or(both_null, Expr::eq(a, b))
    }

    /// Fold a conjunct list into one predicate, `None` when empty.
    pub fn conjoin(parts: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        parts.into_iter().reduce(Expr::and)
    }

    /// Split a predicate into its top-level AND conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// The logical type of this expression, where statically known.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Expr::Value(v) => v.sql_type(),
            Expr::Column(c) => c.ty,
            Expr::Named(n) => n.ty,
            Expr::Binary { op, left, .. } => {
                if op.is_arithmetic() {
                    left.sql_type()
                } else {
                    SqlType::Bool
                }
            }
            Expr::Not(_) | Expr::IsNull { .. } | Expr::Exists(_) | Expr::In { .. } => SqlType::Bool,
            Expr::Negate(e) => e.sql_type(),
            Expr::Function { .. } => SqlType::Unknown,
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFunc::Count => SqlType::Int,
                _ => arg.as_ref().map(|a| a.sql_type()).unwrap_or(SqlType::Unknown),
            },
            Expr::Scalar(select) => select
                .columns
                .first()
                .map(|c| c.expr.sql_type())
                .unwrap_or(SqlType::Unknown),
            Expr::AggregateSubquery(agg) => agg.in_group.sql_type(),
            Expr::RowCompare { .. } => SqlType::Bool,
            Expr::RowNumber { .. } => SqlType::Int,
        }
    }
}
