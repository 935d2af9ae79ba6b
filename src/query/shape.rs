//! Canonical-shape hashing for the compiled-plan cache.
//!
//! Two operator trees that differ only in literal values hash identically:
//! literals contribute their type tag, never their value. Bound-variable ids
//! are canonicalized to their order of introduction so separately built but
//! structurally identical queries share a shape.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::expr::{Lambda, OpExpr, VarId};
use super::{QueryOp, Ordering};

pub fn shape_hash(op: &QueryOp) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut vars = VarNumbering::default();
    hash_op(op, &mut vars, &mut hasher);
    hasher.finish()
}

#[derive(Default)]
struct VarNumbering {
    seen: HashMap<VarId, u32>,
}

impl VarNumbering {
    fn introduce(&mut self, id: VarId) -> u32 {
        let next = self.seen.len() as u32;
        *self.seen.entry(id).or_insert(next)
    }

    fn resolve(&self, id: VarId) -> u32 {
        // Unintroduced vars cannot occur in well-formed lambdas; hash them
        // distinctly rather than panicking during cache lookup.
        self.seen.get(&id).copied().unwrap_or(u32::MAX)
    }
}

fn hash_op(op: &QueryOp, vars: &mut VarNumbering, h: &mut DefaultHasher) {
    std::mem::discriminant(op).hash(h);
    match op {
        QueryOp::Root(entity) => entity.hash(h),
        QueryOp::Filter { source, predicate } => {
            hash_op(source, vars, h);
            hash_lambda(predicate, vars, h);
        }
        QueryOp::Project { source, selector } => {
            hash_op(source, vars, h);
            hash_lambda(selector, vars, h);
        }
        QueryOp::SelectMany {
            source,
            collection,
            result,
        } => {
            hash_op(source, vars, h);
            hash_lambda(collection, vars, h);
            if let Some(r) = result {
                hash_lambda(r, vars, h);
            }
        }
        QueryOp::Join {
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        }
        | QueryOp::GroupJoin {
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        } => {
            hash_op(outer, vars, h);
            hash_op(inner, vars, h);
            hash_lambda(outer_key, vars, h);
            hash_lambda(inner_key, vars, h);
            hash_lambda(result, vars, h);
        }
        QueryOp::Order { source, orderings } => {
            hash_op(source, vars, h);
            for Ordering { key, order } in orderings {
                hash_lambda(key, vars, h);
                std::mem::discriminant(order).hash(h);
            }
        }
        QueryOp::GroupBy {
            source,
            key,
            element,
        } => {
            hash_op(source, vars, h);
            hash_lambda(key, vars, h);
            if let Some(e) = element {
                hash_lambda(e, vars, h);
            }
        }
        QueryOp::Distinct { source } | QueryOp::Reverse { source } => hash_op(source, vars, h),
        QueryOp::Skip { source, count } | QueryOp::Take { source, count } => {
            hash_op(source, vars, h);
            hash_expr(count, vars, h);
        }
        QueryOp::Intersect { source, other } | QueryOp::Except { source, other } => {
            hash_op(source, vars, h);
            hash_op(other, vars, h);
        }
        QueryOp::Element {
            source,
            kind,
            or_default,
        } => {
            hash_op(source, vars, h);
            std::mem::discriminant(kind).hash(h);
            or_default.hash(h);
        }
        QueryOp::Aggregate {
            source,
            func,
            selector,
        } => {
            hash_op(source, vars, h);
            func.hash(h);
            if let Some(s) = selector {
                hash_lambda(s, vars, h);
            }
        }
        QueryOp::Quantify {
            source,
            kind,
            predicate,
        } => {
            hash_op(source, vars, h);
            std::mem::discriminant(kind).hash(h);
            if let Some(p) = predicate {
                hash_lambda(p, vars, h);
            }
        }
        QueryOp::Contains { source, value } => {
            hash_op(source, vars, h);
            // Shape only: the concrete value becomes a parameter.
            value.sql_type().hash(h);
        }
    }
}

fn hash_lambda(lambda: &Lambda, vars: &mut VarNumbering, h: &mut DefaultHasher) {
    for param in &lambda.params {
        vars.introduce(*param).hash(h);
    }
    hash_expr(&lambda.body, vars, h);
}

fn hash_expr(expr: &OpExpr, vars: &mut VarNumbering, h: &mut DefaultHasher) {
    std::mem::discriminant(expr).hash(h);
    match expr {
        OpExpr::Var(id) => vars.resolve(*id).hash(h),
        OpExpr::Member(inner, name) => {
            hash_expr(inner, vars, h);
            name.hash(h);
        }
        OpExpr::Value(v) => v.sql_type().hash(h),
        OpExpr::Bind(name, ty) => {
            name.hash(h);
            ty.hash(h);
        }
        OpExpr::Binary(op, left, right) => {
            op.hash(h);
            hash_expr(left, vars, h);
            hash_expr(right, vars, h);
        }
        OpExpr::Not(inner) | OpExpr::Negate(inner) => hash_expr(inner, vars, h),
        OpExpr::IsNull(inner, negated) => {
            hash_expr(inner, vars, h);
            negated.hash(h);
        }
        OpExpr::Func(name, args) => {
            name.hash(h);
            for a in args {
                hash_expr(a, vars, h);
            }
        }
        OpExpr::Record(fields) => {
            for (name, e) in fields {
                name.hash(h);
                hash_expr(e, vars, h);
            }
        }
        OpExpr::Aggregate {
            func,
            source,
            selector,
            distinct,
        } => {
            func.hash(h);
            hash_expr(source, vars, h);
            if let Some(s) = selector {
                hash_lambda(s, vars, h);
            }
            distinct.hash(h);
        }
        OpExpr::InList(inner, values) => {
            hash_expr(inner, vars, h);
            // List arity shapes the generated IN (...), so it is structure.
            values.len().hash(h);
            for v in values {
                v.sql_type().hash(h);
            }
        }
        OpExpr::Subquery(op) => hash_op(op, vars, h),
        OpExpr::Any { source, predicate } => {
            hash_expr(source, vars, h);
            if let Some(p) = predicate {
                hash_lambda(p, vars, h);
            }
        }
        OpExpr::All { source, predicate } => {
            hash_expr(source, vars, h);
            hash_lambda(predicate, vars, h);
        }
    }
}
