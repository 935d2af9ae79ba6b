//! Shared tree traversal: rebuild-only-on-change rewriting and read-only
//! visiting over the closed node set.
//!
//! Rewriters return `Option<Node>`: `None` means "unchanged, keep the
//! original". The recursion lives once in the `walk_*` helpers so every
//! rewrite pass only overrides the node kinds it cares about, and chained
//! passes stay cheap: untouched subtrees are cloned at most once, at the
//! point a parent actually changes.

use crate::ast::command::{
    BatchCommand, Command, ColumnAssignment, DeclarationCommand, DeleteCommand, IfCommand,
    InsertCommand, UpdateCommand,
};
use crate::ast::expr::{AggregateSubquery, Expr, InSet, NamedValue, OrderExpr};
use crate::ast::projector::{ClientJoin, DeferredMember, Projection, Projector};
use crate::ast::query::{ColumnDecl, Join, Select, Source};

/// Rebuild-only-on-change tree transform.
pub trait Rewriter {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        walk_expr(self, expr)
    }

    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        walk_select(self, select)
    }

    fn rewrite_source(&mut self, source: &Source) -> Option<Source> {
        walk_source(self, source)
    }

    fn rewrite_projector(&mut self, projector: &Projector) -> Option<Projector> {
        walk_projector(self, projector)
    }

    fn rewrite_projection(&mut self, projection: &Projection) -> Option<Projection> {
        walk_projection(self, projection)
    }

    fn rewrite_command(&mut self, command: &Command) -> Option<Command> {
        walk_command(self, command)
    }

    /// Apply this rewriter to a projection, consuming and returning it.
    fn apply(&mut self, projection: Projection) -> Projection
    where
        Self: Sized,
    {
        self.rewrite_projection(&projection).unwrap_or(projection)
    }

    /// Apply this rewriter to a command, consuming and returning it.
    fn apply_command(&mut self, command: Command) -> Command
    where
        Self: Sized,
    {
        self.rewrite_command(&command).unwrap_or(command)
    }
}

/// Rewrite a slice, returning `Some` only when at least one element changed.
pub fn rewrite_vec<T: Clone>(
    items: &[T],
    mut f: impl FnMut(&T) -> Option<T>,
) -> Option<Vec<T>> {
    let mut changed = false;
    let rebuilt: Vec<T> = items
        .iter()
        .map(|item| match f(item) {
            Some(new) => {
                changed = true;
                new
            }
            None => item.clone(),
        })
        .collect();
    changed.then_some(rebuilt)
}

/// Rewrite an optional node, returning `Some` only when the inner changed.
pub fn rewrite_opt<T>(item: &Option<T>, f: impl FnOnce(&T) -> Option<T>) -> Option<Option<T>> {
    item.as_ref().and_then(f).map(Some)
}

pub fn walk_expr<R: Rewriter + ?Sized>(r: &mut R, expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Value(_) | Expr::Column(_) | Expr::Named(_) => None,
        Expr::Binary { op, left, right } => {
            let new_left = r.rewrite_expr(left);
            let new_right = r.rewrite_expr(right);
            if new_left.is_none() && new_right.is_none() {
                return None;
            }
            Some(Expr::Binary {
                op: *op,
                left: Box::new(new_left.unwrap_or_else(|| (**left).clone())),
                right: Box::new(new_right.unwrap_or_else(|| (**right).clone())),
            })
        }
        Expr::Not(inner) => r.rewrite_expr(inner).map(|e| Expr::Not(Box::new(e))),
        Expr::Negate(inner) => r.rewrite_expr(inner).map(|e| Expr::Negate(Box::new(e))),
        Expr::IsNull { expr: inner, negated } => r.rewrite_expr(inner).map(|e| Expr::IsNull {
            expr: Box::new(e),
            negated: *negated,
        }),
        Expr::Function { name, args } => rewrite_vec(args, |a| r.rewrite_expr(a)).map(|args| {
            Expr::Function {
                name: name.clone(),
                args,
            }
        }),
        Expr::Aggregate {
            func,
            arg,
            distinct,
        } => match arg {
            Some(a) => r.rewrite_expr(a).map(|a| Expr::Aggregate {
                func: *func,
                arg: Some(Box::new(a)),
                distinct: *distinct,
            }),
            None => None,
        },
        Expr::Scalar(select) => r
            .rewrite_select(select)
            .map(|s| Expr::Scalar(Box::new(s))),
        Expr::Exists(select) => r
            .rewrite_select(select)
            .map(|s| Expr::Exists(Box::new(s))),
        Expr::In { expr: inner, set } => {
            let new_inner = r.rewrite_expr(inner);
            let new_set = match set {
                InSet::List(items) => rewrite_vec(items, |e| r.rewrite_expr(e)).map(InSet::List),
                InSet::Query(select) => r
                    .rewrite_select(select)
                    .map(|s| InSet::Query(Box::new(s))),
            };
            if new_inner.is_none() && new_set.is_none() {
                return None;
            }
            Some(Expr::In {
                expr: Box::new(new_inner.unwrap_or_else(|| (**inner).clone())),
                set: new_set.unwrap_or_else(|| set.clone()),
            })
        }
        Expr::AggregateSubquery(agg) => {
            let new_in_group = r.rewrite_expr(&agg.in_group);
            let new_fallback = r.rewrite_expr(&agg.fallback);
            if new_in_group.is_none() && new_fallback.is_none() {
                return None;
            }
            Some(Expr::AggregateSubquery(Box::new(AggregateSubquery {
                group_alias: agg.group_alias,
                in_group: new_in_group.unwrap_or_else(|| agg.in_group.clone()),
                fallback: new_fallback.unwrap_or_else(|| agg.fallback.clone()),
            })))
        }
        Expr::RowCompare {
            negated,
            left,
            right,
        } => {
            let new_left = r.rewrite_projector(left);
            let new_right = r.rewrite_projector(right);
            if new_left.is_none() && new_right.is_none() {
                return None;
            }
            Some(Expr::RowCompare {
                negated: *negated,
                left: Box::new(new_left.unwrap_or_else(|| (**left).clone())),
                right: Box::new(new_right.unwrap_or_else(|| (**right).clone())),
            })
        }
        Expr::RowNumber { order_by } => {
            rewrite_vec(order_by, |o| walk_order(r, o)).map(|order_by| Expr::RowNumber { order_by })
        }
    }
}

pub fn walk_order<R: Rewriter + ?Sized>(r: &mut R, order: &OrderExpr) -> Option<OrderExpr> {
    r.rewrite_expr(&order.expr).map(|expr| OrderExpr {
        expr,
        order: order.order,
    })
}

pub fn walk_select<R: Rewriter + ?Sized>(r: &mut R, select: &Select) -> Option<Select> {
    let columns = rewrite_vec(&select.columns, |c| {
        r.rewrite_expr(&c.expr).map(|expr| ColumnDecl {
            name: c.name.clone(),
            expr,
        })
    });
    let from = rewrite_opt(&select.from, |f| r.rewrite_source(f));
    let where_clause = rewrite_opt(&select.where_clause, |w| r.rewrite_expr(w));
    let order_by = rewrite_vec(&select.order_by, |o| walk_order(r, o));
    let group_by = rewrite_vec(&select.group_by, |g| r.rewrite_expr(g));
    let skip = rewrite_opt(&select.skip, |e| r.rewrite_expr(e));
    let take = rewrite_opt(&select.take, |e| r.rewrite_expr(e));

    if columns.is_none()
        && from.is_none()
        && where_clause.is_none()
        && order_by.is_none()
        && group_by.is_none()
        && skip.is_none()
        && take.is_none()
    {
        return None;
    }
    Some(Select {
        alias: select.alias,
        columns: columns.unwrap_or_else(|| select.columns.clone()),
        from: from.unwrap_or_else(|| select.from.clone()),
        where_clause: where_clause.unwrap_or_else(|| select.where_clause.clone()),
        order_by: order_by.unwrap_or_else(|| select.order_by.clone()),
        group_by: group_by.unwrap_or_else(|| select.group_by.clone()),
        distinct: select.distinct,
        skip: skip.unwrap_or_else(|| select.skip.clone()),
        take: take.unwrap_or_else(|| select.take.clone()),
        reverse: select.reverse,
    })
}

pub fn walk_source<R: Rewriter + ?Sized>(r: &mut R, source: &Source) -> Option<Source> {
    match source {
        Source::Table(_) => None,
        Source::Select(select) => r
            .rewrite_select(select)
            .map(|s| Source::Select(Box::new(s))),
        Source::Join(join) => {
            let left = r.rewrite_source(&join.left);
            let right = r.rewrite_source(&join.right);
            let condition = rewrite_opt(&join.condition, |c| r.rewrite_expr(c));
            if left.is_none() && right.is_none() && condition.is_none() {
                return None;
            }
            Some(Source::Join(Box::new(Join {
                kind: join.kind,
                left: left.unwrap_or_else(|| join.left.clone()),
                right: right.unwrap_or_else(|| join.right.clone()),
                condition: condition.unwrap_or_else(|| join.condition.clone()),
            })))
        }
    }
}

pub fn walk_projector<R: Rewriter + ?Sized>(r: &mut R, projector: &Projector) -> Option<Projector> {
    match projector {
        Projector::Expr(e) => r.rewrite_expr(e).map(Projector::Expr),
        Projector::Entity { entity, members } => {
            rewrite_vec(members, |(name, m)| {
                r.rewrite_projector(m).map(|m| (name.clone(), m))
            })
            .map(|members| Projector::Entity {
                entity: entity.clone(),
                members,
            })
        }
        Projector::Record(members) => rewrite_vec(members, |(name, m)| {
            r.rewrite_projector(m).map(|m| (name.clone(), m))
        })
        .map(Projector::Record),
        Projector::OuterJoined { test, inner } => {
            let new_test = r.rewrite_expr(test);
            let new_inner = r.rewrite_projector(inner);
            if new_test.is_none() && new_inner.is_none() {
                return None;
            }
            Some(Projector::OuterJoined {
                test: Box::new(new_test.unwrap_or_else(|| (**test).clone())),
                inner: Box::new(new_inner.unwrap_or_else(|| (**inner).clone())),
            })
        }
        Projector::Subquery(projection) => r
            .rewrite_projection(projection)
            .map(|p| Projector::Subquery(Box::new(p))),
        Projector::ClientJoin(cj) => {
            let projection = r.rewrite_projection(&cj.projection);
            let outer_keys = rewrite_vec(&cj.outer_keys, |e| r.rewrite_expr(e));
            let inner_keys = rewrite_vec(&cj.inner_keys, |e| r.rewrite_expr(e));
            if projection.is_none() && outer_keys.is_none() && inner_keys.is_none() {
                return None;
            }
            Some(Projector::ClientJoin(Box::new(ClientJoin {
                projection: projection.unwrap_or_else(|| cj.projection.clone()),
                outer_keys: outer_keys.unwrap_or_else(|| cj.outer_keys.clone()),
                inner_keys: inner_keys.unwrap_or_else(|| cj.inner_keys.clone()),
            })))
        }
        Projector::Deferred(d) => {
            let projection = r.rewrite_projection(&d.projection);
            let outer_keys = rewrite_vec(&d.outer_keys, |e| r.rewrite_expr(e));
            if projection.is_none() && outer_keys.is_none() {
                return None;
            }
            Some(Projector::Deferred(Box::new(DeferredMember {
                projection: projection.unwrap_or_else(|| d.projection.clone()),
                outer_keys: outer_keys.unwrap_or_else(|| d.outer_keys.clone()),
                key_params: d.key_params.clone(),
            })))
        }
    }
}

pub fn walk_projection<R: Rewriter + ?Sized>(
    r: &mut R,
    projection: &Projection,
) -> Option<Projection> {
    let select = r.rewrite_select(&projection.select);
    let projector = r.rewrite_projector(&projection.projector);
    if select.is_none() && projector.is_none() {
        return None;
    }
    Some(Projection {
        select: select.unwrap_or_else(|| projection.select.clone()),
        projector: projector.unwrap_or_else(|| projection.projector.clone()),
        aggregator: projection.aggregator,
    })
}

fn walk_assignments<R: Rewriter + ?Sized>(
    r: &mut R,
    assignments: &[ColumnAssignment],
) -> Option<Vec<ColumnAssignment>> {
    rewrite_vec(assignments, |a| {
        r.rewrite_expr(&a.value).map(|value| ColumnAssignment {
            column: a.column.clone(),
            ty: a.ty,
            value,
        })
    })
}

pub fn walk_command<R: Rewriter + ?Sized>(r: &mut R, command: &Command) -> Option<Command> {
    match command {
        Command::Insert(insert) => walk_assignments(r, &insert.assignments).map(|assignments| {
            Command::Insert(InsertCommand {
                table: insert.table.clone(),
                assignments,
            })
        }),
        Command::Update(update) => {
            let where_clause = r.rewrite_expr(&update.where_clause);
            let assignments = walk_assignments(r, &update.assignments);
            if where_clause.is_none() && assignments.is_none() {
                return None;
            }
            Some(Command::Update(UpdateCommand {
                table: update.table.clone(),
                where_clause: where_clause.unwrap_or_else(|| update.where_clause.clone()),
                assignments: assignments.unwrap_or_else(|| update.assignments.clone()),
            }))
        }
        Command::Delete(delete) => r.rewrite_expr(&delete.where_clause).map(|where_clause| {
            Command::Delete(DeleteCommand {
                table: delete.table.clone(),
                where_clause,
            })
        }),
        Command::Block(commands) => {
            rewrite_vec(commands, |c| r.rewrite_command(c)).map(Command::Block)
        }
        Command::If(if_cmd) => {
            let check = r.rewrite_expr(&if_cmd.check);
            let then_command = r.rewrite_command(&if_cmd.then_command);
            let else_command = rewrite_opt(&if_cmd.else_command, |c| r.rewrite_command(c));
            if check.is_none() && then_command.is_none() && else_command.is_none() {
                return None;
            }
            Some(Command::If(Box::new(IfCommand {
                check: check.unwrap_or_else(|| if_cmd.check.clone()),
                then_command: then_command.unwrap_or_else(|| if_cmd.then_command.clone()),
                else_command: else_command.unwrap_or_else(|| if_cmd.else_command.clone()),
            })))
        }
        Command::Declare(decl) => r.rewrite_select(&decl.source).map(|source| {
            Command::Declare(DeclarationCommand {
                variables: decl.variables.clone(),
                source,
            })
        }),
        Command::Query(projection) => r.rewrite_projection(projection).map(Command::Query),
        Command::Batch(batch) => r.rewrite_command(&batch.template).map(|template| {
            Command::Batch(BatchCommand {
                template: Box::new(template),
                batch_size: batch.batch_size,
                stream: batch.stream,
            })
        }),
    }
}

/// Read-only traversal, for passes that only collect.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        visit_expr_children(self, expr)
    }

    fn visit_select(&mut self, select: &Select) {
        visit_select_children(self, select)
    }

    fn visit_source(&mut self, source: &Source) {
        visit_source_children(self, source)
    }

    fn visit_projector(&mut self, projector: &Projector) {
        visit_projector_children(self, projector)
    }

    fn visit_projection(&mut self, projection: &Projection) {
        self.visit_select(&projection.select);
        self.visit_projector(&projection.projector);
    }
}

pub fn visit_expr_children<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Value(_) | Expr::Column(_) | Expr::Named(_) => {}
        Expr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Not(inner) | Expr::Negate(inner) => v.visit_expr(inner),
        Expr::IsNull { expr: inner, .. } => v.visit_expr(inner),
        Expr::Function { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        Expr::Aggregate { arg, .. } => {
            if let Some(a) = arg {
                v.visit_expr(a);
            }
        }
        Expr::Scalar(select) | Expr::Exists(select) => v.visit_select(select),
        Expr::In { expr: inner, set } => {
            v.visit_expr(inner);
            match set {
                InSet::List(items) => {
                    for i in items {
                        v.visit_expr(i);
                    }
                }
                InSet::Query(select) => v.visit_select(select),
            }
        }
        Expr::AggregateSubquery(agg) => {
            v.visit_expr(&agg.in_group);
            v.visit_expr(&agg.fallback);
        }
        Expr::RowCompare { left, right, .. } => {
            v.visit_projector(left);
            v.visit_projector(right);
        }
        Expr::RowNumber { order_by } => {
            for o in order_by {
                v.visit_expr(&o.expr);
            }
        }
    }
}

pub fn visit_select_children<V: Visitor + ?Sized>(v: &mut V, select: &Select) {
    for c in &select.columns {
        v.visit_expr(&c.expr);
    }
    if let Some(from) = &select.from {
        v.visit_source(from);
    }
    if let Some(w) = &select.where_clause {
        v.visit_expr(w);
    }
    for o in &select.order_by {
        v.visit_expr(&o.expr);
    }
    for g in &select.group_by {
        v.visit_expr(g);
    }
    if let Some(skip) = &select.skip {
        v.visit_expr(skip);
    }
    if let Some(take) = &select.take {
        v.visit_expr(take);
    }
}

pub fn visit_source_children<V: Visitor + ?Sized>(v: &mut V, source: &Source) {
    match source {
        Source::Table(_) => {}
        Source::Select(select) => v.visit_select(select),
        Source::Join(join) => {
            v.visit_source(&join.left);
            v.visit_source(&join.right);
            if let Some(c) = &join.condition {
                v.visit_expr(c);
            }
        }
    }
}

pub fn visit_projector_children<V: Visitor + ?Sized>(v: &mut V, projector: &Projector) {
    match projector {
        Projector::Expr(e) => v.visit_expr(e),
        Projector::Entity { members, .. } | Projector::Record(members) => {
            for (_, m) in members {
                v.visit_projector(m);
            }
        }
        Projector::OuterJoined { test, inner } => {
            v.visit_expr(test);
            v.visit_projector(inner);
        }
        Projector::Subquery(projection) => v.visit_projection(projection),
        Projector::ClientJoin(cj) => {
            v.visit_projection(&cj.projection);
            for e in &cj.outer_keys {
                v.visit_expr(e);
            }
            for e in &cj.inner_keys {
                v.visit_expr(e);
            }
        }
        Projector::Deferred(d) => {
            v.visit_projection(&d.projection);
            for e in &d.outer_keys {
                v.visit_expr(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::alias::AliasGenerator;
    use crate::ast::expr::{BinaryOp, ColumnRef};
    use crate::ast::value::Value;
    use crate::types::SqlType;

    /// Replaces every integer literal with `0`.
    struct ZeroInts;

    impl Rewriter for ZeroInts {
        fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
            match expr {
                Expr::Value(Value::Int(n)) if *n != 0 => Some(Expr::Value(Value::Int(0))),
                _ => walk_expr(self, expr),
            }
        }
    }

    #[test]
    fn test_unchanged_tree_returns_none() {
        let mut aliases = AliasGenerator::new();
        let col = Expr::Column(ColumnRef::new(aliases.fresh(), "id", SqlType::Int));
        let pred = Expr::binary(BinaryOp::Eq, col.clone(), col);
        assert!(ZeroInts.rewrite_expr(&pred).is_none());
    }

    #[test]
    fn test_changed_leaf_rebuilds_spine() {
        let mut aliases = AliasGenerator::new();
        let col = Expr::Column(ColumnRef::new(aliases.fresh(), "id", SqlType::Int));
        let pred = Expr::binary(BinaryOp::Eq, col.clone(), Expr::value(7));
        let rewritten = ZeroInts.rewrite_expr(&pred).expect("should change");
        assert_eq!(rewritten, Expr::binary(BinaryOp::Eq, col, Expr::value(0)));
    }
}
