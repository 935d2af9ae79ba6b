//! The binder: translates a declarative operator chain into a raw relational
//! AST (a [`Projection`]) against the entity-mapping contract.
//!
//! Bound variables are threaded through an explicit scope map from variable
//! identity to its current denotation (a projector), so the binder stays
//! re-entrant for nested and correlated subqueries.
//!
//! Invariant maintained throughout: a projection's projector references only
//! columns declared by its own select; clause expressions (where, order,
//! group, join conditions) reference the aliases of that select's sources.

pub(crate) mod columns;
pub mod crud;
mod group;

pub use columns::{flatten_projector, import_expr, remap_expr, remap_projector, wrap};

use std::collections::HashMap;

use crate::ast::dup::duplicate_projection;
use crate::ast::expr::{AggregateFunc, AggregateSubquery, BinaryOp, ColumnRef, Expr, InSet, NamedValue};
use crate::ast::projector::{Aggregator, DeferredMember, Projection, Projector};
use crate::ast::query::{ColumnDecl, Join, JoinKind, Select, Source, TableSource};
use crate::ast::value::Value;
use crate::ast::visit::Rewriter;
use crate::ast::{AliasGenerator, TableAlias};
use crate::error::{RelqError, RelqResult};
use crate::mapping::{EntityMapping, RelationshipDef, RelationshipKind};
use crate::query::expr::{Lambda, OpExpr, VarId};
use crate::query::{ElementKind, QuantifyKind, QueryOp};

/// Bookkeeping for group-element sequences, so aggregates over them can be
/// deferred as [`AggregateSubquery`] nodes against the owning group select.
struct GroupInfo {
    group_alias: TableAlias,
    /// The pre-grouping row, expressed over the group select's sources.
    row_projector: Projector,
}

pub struct Binder<'a> {
    mapping: &'a dyn EntityMapping,
    aliases: AliasGenerator,
    scope: HashMap<VarId, Projector>,
    group_elements: HashMap<TableAlias, GroupInfo>,
}

impl<'a> Binder<'a> {
    pub fn new(mapping: &'a dyn EntityMapping) -> Self {
        Self {
            mapping,
            aliases: AliasGenerator::new(),
            scope: HashMap::new(),
            group_elements: HashMap::new(),
        }
    }

    /// Bind a whole operator chain into a projection.
    pub fn bind_query(mut self, op: &QueryOp) -> RelqResult<Projection> {
        self.bind(op)
    }

    pub(crate) fn mapping(&self) -> &dyn EntityMapping {
        self.mapping
    }

    pub(crate) fn aliases_mut(&mut self) -> &mut AliasGenerator {
        &mut self.aliases
    }

    fn with_scope<T>(
        &mut self,
        var: VarId,
        projector: Projector,
        f: impl FnOnce(&mut Self) -> RelqResult<T>,
    ) -> RelqResult<T> {
        let previous = self.scope.insert(var, projector);
        let result = f(self);
        match previous {
            Some(p) => {
                self.scope.insert(var, p);
            }
            None => {
                self.scope.remove(&var);
            }
        }
        result
    }

    fn bind(&mut self, op: &QueryOp) -> RelqResult<Projection> {
        match op {
            QueryOp::Root(entity) => self.bind_root(entity),
            QueryOp::Filter { source, predicate } => {
                let src = self.bind(source)?;
                self.bind_filter(src, predicate)
            }
            QueryOp::Project { source, selector } => {
                let src = self.bind(source)?;
                let row = src.projector.clone();
                let (mut select, _) = wrap(src, &mut self.aliases);
                let value =
                    self.with_scope(selector.params[0], row, |b| b.bind_expr(&selector.body))?;
                let projector = flatten_projector(&value, &mut select);
                Ok(Projection::new(select, projector))
            }
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => self.bind_select_many(source, collection, result.as_ref()),
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_join(outer, inner, outer_key, inner_key, result),
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_group_join(outer, inner, outer_key, inner_key, result),
            QueryOp::Order { source, orderings } => {
                let src = self.bind(source)?;
                let row = src.projector.clone();
                let (mut select, projector) = wrap(src, &mut self.aliases);
                for ordering in orderings {
                    let key = self.with_scope(ordering.key.params[0], row.clone(), |b| {
                        b.bind_scalar(&ordering.key.body)
                    })?;
                    select.order_by.push(crate::ast::OrderExpr {
                        expr: key,
                        order: ordering.order,
                    });
                }
                Ok(Projection::new(select, projector))
            }
            QueryOp::GroupBy {
                source,
                key,
                element,
            } => {
                let src = self.bind(source)?;
                self.bind_group_by(src, key, element.as_ref())
            }
            QueryOp::Distinct { source } => {
                let src = self.bind(source)?;
                let (mut select, projector) = wrap(src, &mut self.aliases);
                select.distinct = true;
                Ok(Projection::new(select, projector))
            }
            QueryOp::Skip { source, count } => {
                let src = self.bind(source)?;
                let count = self.bind_scalar(count)?;
                let (mut select, projector) = wrap(src, &mut self.aliases);
                select.skip = Some(count);
                Ok(Projection::new(select, projector))
            }
            QueryOp::Take { source, count } => {
                let src = self.bind(source)?;
                let count = self.bind_scalar(count)?;
                let (mut select, projector) = wrap(src, &mut self.aliases);
                select.take = Some(count);
                Ok(Projection::new(select, projector))
            }
            QueryOp::Reverse { source } => {
                let src = self.bind(source)?;
                let (mut select, projector) = wrap(src, &mut self.aliases);
                select.reverse = true;
                Ok(Projection::new(select, projector))
            }
            QueryOp::Intersect { source, other } => self.bind_set_op(source, other, false),
            QueryOp::Except { source, other } => self.bind_set_op(source, other, true),
            QueryOp::Element {
                source,
                kind,
                or_default,
            } => {
                let src = self.bind(source)?;
                let (mut select, projector) = wrap(src, &mut self.aliases);
                let aggregator = match kind {
                    ElementKind::First => {
                        select.take = Some(Expr::value(1i64));
                        if *or_default {
                            Aggregator::FirstOrDefault
                        } else {
                            Aggregator::First
                        }
                    }
                    ElementKind::Single => {
                        // Fetch two so "more than one" is detectable.
                        select.take = Some(Expr::value(2i64));
                        if *or_default {
                            Aggregator::SingleOrDefault
                        } else {
                            Aggregator::Single
                        }
                    }
                    ElementKind::Last => {
                        select.reverse = true;
                        select.take = Some(Expr::value(1i64));
                        if *or_default {
                            Aggregator::FirstOrDefault
                        } else {
                            Aggregator::First
                        }
                    }
                };
                Ok(Projection::new(select, projector).with_aggregator(aggregator))
            }
            QueryOp::Aggregate {
                source,
                func,
                selector,
            } => {
                let src = self.bind(source)?;
                let select = self.aggregate_over(&src, *func, selector.as_ref(), false)?;
                let result = Projector::Expr(Expr::Column(ColumnRef::new(
                    select.alias,
                    "agg".to_string(),
                    select.columns[0].sql_type(),
                )));
                Ok(Projection::new(select, result).with_aggregator(Aggregator::Single))
            }
            QueryOp::Quantify {
                source,
                kind,
                predicate,
            } => self.bind_quantify(source, *kind, predicate.as_ref()),
            QueryOp::Contains { source, value } => {
                let src = self.bind(source)?;
                let row = src.projector.clone();
                let (mut select, _) = wrap(src, &mut self.aliases);
                let matched =
                    self.key_equals(&row, &Projector::Expr(Expr::Value(value.clone())), false)?;
                select.where_clause = Some(matched);
                self.scalar_result(Expr::Exists(Box::new(select)))
            }
        }
    }

    /// Base select over an entity's table, projecting every scalar member.
    fn bind_root(&mut self, entity: &str) -> RelqResult<Projection> {
        let def = self.mapping.entity(entity)?;
        let table_alias = self.aliases.fresh();
        let select_alias = self.aliases.fresh();
        let mut select = Select::new(select_alias);
        select.from = Some(Source::Table(TableSource {
            alias: table_alias,
            name: def.table.clone(),
        }));
        let mut members = Vec::with_capacity(def.members.len());
        for member in &def.members {
            select.columns.push(ColumnDecl::new(
                member.name.clone(),
                Expr::Column(ColumnRef::new(table_alias, member.column.clone(), member.ty)),
            ));
            members.push((
                member.name.clone(),
                Projector::Expr(Expr::Column(ColumnRef::new(
                    select_alias,
                    member.name.clone(),
                    member.ty,
                ))),
            ));
        }
        Ok(Projection::new(
            select,
            Projector::Entity {
                entity: def.name.clone(),
                members,
            },
        ))
    }

    fn bind_filter(&mut self, src: Projection, predicate: &Lambda) -> RelqResult<Projection> {
        let row = src.projector.clone();
        let (mut select, projector) = wrap(src, &mut self.aliases);
        let pred =
            self.with_scope(predicate.params[0], row, |b| b.bind_scalar(&predicate.body))?;
        select.where_clause = Some(pred);
        Ok(Projection::new(select, projector))
    }

    fn bind_select_many(
        &mut self,
        source: &QueryOp,
        collection: &Lambda,
        result: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        let src = self.bind(source)?;
        let row = src.projector.clone();
        let bound =
            self.with_scope(collection.params[0], row.clone(), |b| b.bind_expr(&collection.body))?;
        let inner = match bound {
            Projector::Subquery(p) => *p,
            Projector::Deferred(_) => {
                return Err(RelqError::bind("cannot flatten a deferred member"));
            }
            _ => return Err(RelqError::bind("select_many requires a sequence value")),
        };
        let (alias, cols, map) = columns::wrap_join(&src.select, &inner.select, &mut self.aliases);
        let left_projector = columns::remap_projector(&src.projector, &map);
        let inner_projector = columns::remap_projector(&inner.projector, &map);
        let mut select = Select::new(alias);
        select.columns = cols;
        select.from = Some(Source::Join(Box::new(Join {
            kind: JoinKind::CrossApply,
            left: Source::Select(Box::new(src.select)),
            right: Source::Select(Box::new(inner.select)),
            condition: None,
        })));
        let projector = match result {
            Some(lambda) => {
                let value = self.with_scope(lambda.params[0], left_projector, |b| {
                    b.with_scope(lambda.params[1], inner_projector, |b| b.bind_expr(&lambda.body))
                })?;
                flatten_projector(&value, &mut select)
            }
            None => inner_projector,
        };
        Ok(Projection::new(select, projector))
    }

    fn bind_join(
        &mut self,
        outer: &QueryOp,
        inner: &QueryOp,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> RelqResult<Projection> {
        let outer = self.bind(outer)?;
        let inner = self.bind(inner)?;
        let left_key = self.with_scope(outer_key.params[0], outer.projector.clone(), |b| {
            b.bind_expr(&outer_key.body)
        })?;
        let right_key = self.with_scope(inner_key.params[0], inner.projector.clone(), |b| {
            b.bind_expr(&inner_key.body)
        })?;
        let condition = self.key_equals(&left_key, &right_key, false)?;
        let (alias, cols, map) = columns::wrap_join(&outer.select, &inner.select, &mut self.aliases);
        let left_projector = columns::remap_projector(&outer.projector, &map);
        let right_projector = columns::remap_projector(&inner.projector, &map);
        let mut select = Select::new(alias);
        select.columns = cols;
        select.from = Some(Source::Join(Box::new(Join {
            kind: JoinKind::Inner,
            left: Source::Select(Box::new(outer.select)),
            right: Source::Select(Box::new(inner.select)),
            condition: Some(condition),
        })));
        let value = self.with_scope(result.params[0], left_projector, |b| {
            b.with_scope(result.params[1], right_projector, |b| b.bind_expr(&result.body))
        })?;
        let projector = flatten_projector(&value, &mut select);
        Ok(Projection::new(select, projector))
    }

    fn bind_group_join(
        &mut self,
        outer: &QueryOp,
        inner: &QueryOp,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> RelqResult<Projection> {
        let outer = self.bind(outer)?;
        let inner = self.bind(inner)?;
        let (mut select, outer_projector) = wrap(outer, &mut self.aliases);
        // Keys over the wrapped output: the correlated inner subquery lives
        // in the projector, where output columns are the visible names.
        let left_key = self.with_scope(outer_key.params[0], outer_projector.clone(), |b| {
            b.bind_expr(&outer_key.body)
        })?;
        let right_key = self.with_scope(inner_key.params[0], inner.projector.clone(), |b| {
            b.bind_expr(&inner_key.body)
        })?;
        let condition = self.key_equals(&left_key, &right_key, false)?;
        let mut inner_select = inner.select;
        // The condition folds into the inner select's own where clause;
        // localize inner-side output references to their declarations.
        let mut localizer = columns::ExprSubstitutor::for_select(&inner_select);
        let condition = localizer
            .rewrite_expr(&condition)
            .unwrap_or(condition);
        inner_select.where_clause = match inner_select.where_clause.take() {
            Some(existing) => Some(Expr::and(existing, condition)),
            None => Some(condition),
        };
        let matches = Projector::Subquery(Box::new(Projection::new(inner_select, inner.projector)));
        let value = self.with_scope(result.params[0], outer_projector, |b| {
            b.with_scope(result.params[1], matches, |b| b.bind_expr(&result.body))
        })?;
        let projector = flatten_projector(&value, &mut select);
        Ok(Projection::new(select, projector))
    }

    fn bind_group_by(
        &mut self,
        src: Projection,
        key: &Lambda,
        element: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        group::bind_group_by(self, src, key, element)
    }

    fn bind_set_op(
        &mut self,
        source: &QueryOp,
        other: &QueryOp,
        negated: bool,
    ) -> RelqResult<Projection> {
        let src = self.bind(source)?;
        let other = self.bind(other)?;
        // The row comparison sits inside the other select's where clause, so
        // its side of the comparison must use declaring expressions.
        let mut localizer = columns::ExprSubstitutor::for_select(&other.select);
        let other_row = localizer
            .rewrite_projector(&other.projector)
            .unwrap_or_else(|| other.projector.clone());
        let row_compare = Expr::RowCompare {
            negated: false,
            left: Box::new(src.projector.clone()),
            right: Box::new(other_row),
        };
        let mut other_select = other.select;
        other_select.where_clause = match other_select.where_clause.take() {
            Some(existing) => Some(Expr::and(existing, row_compare)),
            None => Some(row_compare),
        };
        let exists = Expr::Exists(Box::new(other_select));
        let (mut select, projector) = wrap(src, &mut self.aliases);
        select.where_clause = Some(if negated {
            Expr::Not(Box::new(exists))
        } else {
            exists
        });
        select.distinct = true;
        Ok(Projection::new(select, projector))
    }

    fn bind_quantify(
        &mut self,
        source: &QueryOp,
        kind: QuantifyKind,
        predicate: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        let src = self.bind(source)?;
        let expr = self.quantify_expr(src, kind, predicate)?;
        self.scalar_result(expr)
    }

    /// `EXISTS`-based rendering of any/all over an already-bound sequence.
    fn quantify_expr(
        &mut self,
        src: Projection,
        kind: QuantifyKind,
        predicate: Option<&Lambda>,
    ) -> RelqResult<Expr> {
        match kind {
            QuantifyKind::Any => {
                let filtered = match predicate {
                    Some(p) => self.bind_filter(src, p)?,
                    None => src,
                };
                Ok(Expr::Exists(Box::new(filtered.select)))
            }
            QuantifyKind::All => {
                let predicate = predicate
                    .ok_or_else(|| RelqError::bind("all() requires a predicate"))?;
                // all(p) == not exists(not p)
                let row = src.projector.clone();
                let (mut select, _) = wrap(src, &mut self.aliases);
                let pred = self.with_scope(predicate.params[0], row, |b| {
                    b.bind_scalar(&predicate.body)
                })?;
                select.where_clause = Some(Expr::Not(Box::new(pred)));
                Ok(Expr::Not(Box::new(Expr::Exists(Box::new(select)))))
            }
        }
    }

    /// A one-row, one-column projection around a computed boolean/scalar.
    fn scalar_result(&mut self, expr: Expr) -> RelqResult<Projection> {
        let alias = self.aliases.fresh();
        let ty = expr.sql_type();
        let mut select = Select::new(alias);
        select.columns.push(ColumnDecl::new("result", expr));
        let projector = Projector::Expr(Expr::Column(ColumnRef::new(alias, "result", ty)));
        Ok(Projection::new(select, projector).with_aggregator(Aggregator::Single))
    }

    /// Wrap a bound sequence in an aggregate-producing select named `agg`.
    fn aggregate_over(
        &mut self,
        src: &Projection,
        func: AggregateFunc,
        selector: Option<&Lambda>,
        distinct: bool,
    ) -> RelqResult<Select> {
        let arg = match selector {
            Some(lambda) => Some(self.with_scope(lambda.params[0], src.projector.clone(), |b| {
                b.bind_scalar(&lambda.body)
            })?),
            None => match func {
                AggregateFunc::Count => None,
                _ => Some(self.expect_expr(src.projector.clone())?),
            },
        };
        let alias = self.aliases.fresh();
        let mut select = Select::new(alias);
        select.columns.push(ColumnDecl::new(
            "agg",
            Expr::Aggregate {
                func,
                arg: arg.map(Box::new),
                distinct,
            },
        ));
        select.from = Some(Source::Select(Box::new(src.select.clone())));
        Ok(select)
    }

    /// Bind an operator-level expression to its denotation.
    fn bind_expr(&mut self, expr: &OpExpr) -> RelqResult<Projector> {
        match expr {
            OpExpr::Var(id) => self
                .scope
                .get(id)
                .cloned()
                .ok_or_else(|| RelqError::bind("unbound variable in operator expression")),
            OpExpr::Member(source, name) => {
                let src = self.bind_expr(source)?;
                self.bind_member(src, name)
            }
            OpExpr::Value(v) => Ok(Projector::Expr(Expr::Value(v.clone()))),
            OpExpr::Bind(name, ty) => Ok(Projector::Expr(Expr::Named(NamedValue {
                name: name.clone(),
                ty: *ty,
                value: None,
            }))),
            OpExpr::Binary(op, left, right) => self.bind_binary(*op, left, right),
            OpExpr::Not(inner) => {
                let e = self.bind_scalar(inner)?;
                Ok(Projector::Expr(Expr::Not(Box::new(e))))
            }
            OpExpr::Negate(inner) => {
                let e = self.bind_scalar(inner)?;
                Ok(Projector::Expr(Expr::Negate(Box::new(e))))
            }
            OpExpr::IsNull(inner, negated) => {
                let e = self.bind_scalar(inner)?;
                Ok(Projector::Expr(Expr::IsNull {
                    expr: Box::new(e),
                    negated: *negated,
                }))
            }
            OpExpr::Func(name, args) => {
                let mut bound = Vec::with_capacity(args.len());
                for a in args {
                    bound.push(self.bind_scalar(a)?);
                }
                Ok(Projector::Expr(Expr::Function {
                    name: name.clone(),
                    args: bound,
                }))
            }
            OpExpr::Record(fields) => {
                let mut members = Vec::with_capacity(fields.len());
                for (name, e) in fields {
                    members.push((name.clone(), self.bind_expr(e)?));
                }
                Ok(Projector::Record(members))
            }
            OpExpr::Aggregate {
                func,
                source,
                selector,
                distinct,
            } => self.bind_aggregate(*func, source, selector.as_deref(), *distinct),
            OpExpr::InList(inner, values) => {
                let e = self.bind_scalar(inner)?;
                Ok(Projector::Expr(Expr::In {
                    expr: Box::new(e),
                    set: InSet::List(values.iter().map(|v| Expr::Value(v.clone())).collect()),
                }))
            }
            OpExpr::Subquery(op) => {
                let p = self.bind(op)?;
                Ok(Projector::Subquery(Box::new(p)))
            }
            OpExpr::Any { source, predicate } => {
                let src = self.sequence(source)?;
                let e = self.quantify_expr(src, QuantifyKind::Any, predicate.as_deref())?;
                Ok(Projector::Expr(e))
            }
            OpExpr::All { source, predicate } => {
                let src = self.sequence(source)?;
                let e = self.quantify_expr(src, QuantifyKind::All, Some(predicate))?;
                Ok(Projector::Expr(e))
            }
        }
    }

    fn bind_binary(&mut self, op: BinaryOp, left: &OpExpr, right: &OpExpr) -> RelqResult<Projector> {
        let left = self.bind_expr(left)?;
        let right = self.bind_expr(right)?;
        let composite = |p: &Projector| {
            matches!(
                p,
                Projector::Entity { .. } | Projector::Record(_) | Projector::OuterJoined { .. }
            )
        };
        if (op == BinaryOp::Eq || op == BinaryOp::Ne) && (composite(&left) || composite(&right)) {
            // Entities and records have no single comparable representation;
            // the comparison rewrite expands this into member-wise predicates.
            return Ok(Projector::Expr(Expr::RowCompare {
                negated: op == BinaryOp::Ne,
                left: Box::new(left),
                right: Box::new(right),
            }));
        }
        let left = self.expect_expr(left)?;
        let right = self.expect_expr(right)?;
        Ok(Projector::Expr(Expr::binary(op, left, right)))
    }

    fn bind_aggregate(
        &mut self,
        func: AggregateFunc,
        source: &OpExpr,
        selector: Option<&Lambda>,
        distinct: bool,
    ) -> RelqResult<Projector> {
        let src = self.sequence(source)?;
        let fallback_select = self.aggregate_over(&src, func, selector, distinct)?;
        let fallback = Expr::Scalar(Box::new(fallback_select));
        if let Some(info) = self.group_elements.get(&src.select.alias) {
            let group_alias = info.group_alias;
            let row = info.row_projector.clone();
            let arg = match selector {
                Some(lambda) => {
                    Some(self.with_scope(lambda.params[0], row, |b| b.bind_scalar(&lambda.body))?)
                }
                None => match func {
                    AggregateFunc::Count => None,
                    _ => Some(self.expect_expr(row)?),
                },
            };
            let in_group = Expr::Aggregate {
                func,
                arg: arg.map(Box::new),
                distinct,
            };
            return Ok(Projector::Expr(Expr::AggregateSubquery(Box::new(
                AggregateSubquery {
                    group_alias,
                    in_group,
                    fallback,
                },
            ))));
        }
        Ok(Projector::Expr(fallback))
    }

    /// Bind an expression that must denote a sequence.
    fn sequence(&mut self, expr: &OpExpr) -> RelqResult<Projection> {
        match self.bind_expr(expr)? {
            Projector::Subquery(p) => Ok(*p),
            _ => Err(RelqError::bind("expected a sequence-valued expression")),
        }
    }

    pub(crate) fn bind_scalar(&mut self, expr: &OpExpr) -> RelqResult<Expr> {
        let bound = self.bind_expr(expr)?;
        self.expect_expr(bound)
    }

    /// Narrow a denotation to a single scalar expression.
    fn expect_expr(&self, projector: Projector) -> RelqResult<Expr> {
        match projector {
            Projector::Expr(e) => Ok(e),
            Projector::OuterJoined { inner, .. } => self.expect_expr(*inner),
            Projector::Subquery(p) => {
                if p.aggregator.is_none() {
                    return Err(RelqError::bind(
                        "sequence value used where a scalar is required",
                    ));
                }
                match &p.projector {
                    Projector::Expr(Expr::Column(c)) => {
                        let name = c.name.clone();
                        let mut select = p.select;
                        select.columns.retain(|d| d.name == name);
                        Ok(Expr::Scalar(Box::new(select)))
                    }
                    _ => Err(RelqError::bind(
                        "composite singleton used where a scalar is required",
                    )),
                }
            }
            Projector::Entity { .. } | Projector::Record(_) => Err(RelqError::bind(
                "composite value used where a scalar is required",
            )),
            Projector::ClientJoin(_) | Projector::Deferred(_) => Err(RelqError::bind(
                "related collection used where a scalar is required",
            )),
        }
    }

    /// Resolve a member access against a bound denotation.
    fn bind_member(&mut self, source: Projector, name: &str) -> RelqResult<Projector> {
        match source {
            Projector::Entity { entity, members } => {
                if let Some((_, m)) = members.iter().find(|(n, _)| n == name) {
                    return Ok(m.clone());
                }
                self.bind_relationship(&entity, &members, name)
            }
            Projector::Record(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| RelqError::bind(format!("no field '{}' on record value", name))),
            Projector::OuterJoined { test, inner } => {
                let bound = self.bind_member(*inner, name)?;
                Ok(Projector::OuterJoined {
                    test,
                    inner: Box::new(bound),
                })
            }
            Projector::Expr(_) => Err(RelqError::bind(format!(
                "member '{}' accessed on a scalar value",
                name
            ))),
            _ => Err(RelqError::bind(format!(
                "member '{}' accessed on a sequence value",
                name
            ))),
        }
    }

    /// Bind a relationship member into a correlated subquery (or a deferred
    /// thunk when the mapping marks the member deferred).
    fn bind_relationship(
        &mut self,
        entity: &str,
        members: &[(String, Projector)],
        name: &str,
    ) -> RelqResult<Projector> {
        let def = self.mapping.entity(entity)?;
        let rel = def.find_relationship(name).cloned().ok_or_else(|| {
            RelqError::UnknownMember {
                entity: entity.to_string(),
                member: name.to_string(),
            }
        })?;
        let target = self.bind_root(&rel.target)?;
        let mut outer_keys = Vec::with_capacity(rel.key_pairs.len());
        let mut inner_keys = Vec::with_capacity(rel.key_pairs.len());
        for (local, remote) in &rel.key_pairs {
            let outer = members
                .iter()
                .find(|(n, _)| n == local)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| RelqError::UnknownMember {
                    entity: entity.to_string(),
                    member: local.clone(),
                })?;
            let outer = self.expect_expr(outer)?;
            // Correlation lives in the target select's own where clause, so
            // the key must be the declaring expression, not an output ref.
            let inner = target
                .select
                .column(remote)
                .map(|decl| decl.expr.clone())
                .ok_or_else(|| RelqError::UnknownMember {
                    entity: rel.target.clone(),
                    member: remote.clone(),
                })?;
            outer_keys.push(outer);
            inner_keys.push(inner);
        }
        if rel.deferred {
            return self.bind_deferred(&rel, target, outer_keys, inner_keys);
        }
        let correlation = Expr::conjoin(
            outer_keys
                .iter()
                .zip(&inner_keys)
                .map(|(o, i)| Expr::eq(o.clone(), i.clone())),
        )
        .ok_or_else(|| RelqError::bind("relationship declares no key pairs"))?;
        let mut select = target.select;
        select.where_clause = Some(match select.where_clause.take() {
            Some(existing) => Expr::and(existing, correlation),
            None => correlation,
        });
        let mut projection = Projection::new(select, target.projector);
        if rel.kind == RelationshipKind::Single {
            projection.aggregator = Some(Aggregator::SingleOrDefault);
        }
        Ok(Projector::Subquery(Box::new(projection)))
    }

    /// A deferred member binds its correlation as named key parameters; the
    /// plan compiles it into a thunk that round-trips on first access.
    fn bind_deferred(
        &mut self,
        rel: &RelationshipDef,
        target: Projection,
        outer_keys: Vec<Expr>,
        inner_keys: Vec<Expr>,
    ) -> RelqResult<Projector> {
        let mut key_params = Vec::with_capacity(inner_keys.len());
        let mut conjuncts = Vec::with_capacity(inner_keys.len());
        for (i, inner) in inner_keys.iter().enumerate() {
            let param = format!("{}_k{}", rel.name, i);
            conjuncts.push(Expr::eq(
                inner.clone(),
                Expr::Named(NamedValue {
                    name: param.clone(),
                    ty: inner.sql_type(),
                    value: None,
                }),
            ));
            key_params.push(param);
        }
        let mut select = target.select;
        let correlation = Expr::conjoin(conjuncts)
            .ok_or_else(|| RelqError::bind("relationship declares no key pairs"))?;
        select.where_clause = Some(match select.where_clause.take() {
            Some(existing) => Expr::and(existing, correlation),
            None => correlation,
        });
        let mut projection = Projection::new(select, target.projector);
        if rel.kind == RelationshipKind::Single {
            projection.aggregator = Some(Aggregator::SingleOrDefault);
        }
        Ok(Projector::Deferred(Box::new(DeferredMember {
            projection,
            outer_keys,
            key_params,
        })))
    }

    /// Pairwise equality over possibly-composite keys.
    fn key_equals(
        &self,
        left: &Projector,
        right: &Projector,
        null_safe: bool,
    ) -> RelqResult<Expr> {
        match (left, right) {
            (Projector::OuterJoined { inner, .. }, r) => self.key_equals(inner, r, null_safe),
            (l, Projector::OuterJoined { inner, .. }) => self.key_equals(l, inner, null_safe),
            (Projector::Expr(a), Projector::Expr(b)) => Ok(if null_safe {
                Expr::null_safe_eq(a.clone(), b.clone())
            } else {
                Expr::eq(a.clone(), b.clone())
            }),
            (Projector::Record(a), Projector::Record(b)) if a.len() == b.len() => {
                let mut parts = Vec::with_capacity(a.len());
                for ((_, l), (_, r)) in a.iter().zip(b) {
                    parts.push(self.key_equals(l, r, null_safe)?);
                }
                Expr::conjoin(parts).ok_or_else(|| RelqError::bind("empty composite key"))
            }
            (
                Projector::Entity { members: a, .. },
                Projector::Entity { members: b, .. },
            ) if a.len() == b.len() => {
                let mut parts = Vec::with_capacity(a.len());
                for ((_, l), (_, r)) in a.iter().zip(b) {
                    parts.push(self.key_equals(l, r, null_safe)?);
                }
                Expr::conjoin(parts).ok_or_else(|| RelqError::bind("empty composite key"))
            }
            (Projector::Expr(a), Projector::Entity { members, .. })
            | (Projector::Entity { members, .. }, Projector::Expr(a))
                if matches!(a, Expr::Value(Value::Null)) =>
            {
                // entity == null: every member null.
                let parts = members
                    .iter()
                    .filter_map(|(_, m)| match m {
                        Projector::Expr(e) => Some(Expr::is_null(e.clone())),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                Expr::conjoin(parts).ok_or_else(|| RelqError::bind("empty composite key"))
            }
            _ => Err(RelqError::bind("mismatched key shapes in comparison")),
        }
    }

    pub(crate) fn register_group(
        &mut self,
        element_alias: TableAlias,
        group_alias: TableAlias,
        row_projector: Projector,
    ) {
        self.group_elements.insert(
            element_alias,
            GroupInfo {
                group_alias,
                row_projector,
            },
        );
    }

    pub(crate) fn duplicate(&mut self, projection: &Projection) -> Projection {
        duplicate_projection(projection, &mut self.aliases)
    }

    pub(crate) fn scoped<T>(
        &mut self,
        var: VarId,
        projector: Projector,
        f: impl FnOnce(&mut Self) -> RelqResult<T>,
    ) -> RelqResult<T> {
        self.with_scope(var, projector, f)
    }

    pub(crate) fn bind_value(&mut self, expr: &OpExpr) -> RelqResult<Projector> {
        self.bind_expr(expr)
    }
}
