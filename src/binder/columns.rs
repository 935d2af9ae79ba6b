//! Column rebinding: wrapping a bound projection in a fresh select and
//! repointing projector references at the new alias.

use std::collections::HashMap;

use crate::ast::expr::{ColumnRef, Expr};
use crate::ast::projector::{Projection, Projector};
use crate::ast::query::{ColumnDecl, Select, Source};
use crate::ast::visit::{self, Rewriter};
use crate::ast::{AliasGenerator, TableAlias};

/// Maps (alias, column name) pairs to replacement column references.
pub type ColumnMap = HashMap<(TableAlias, String), ColumnRef>;

/// Rewrites column references through a [`ColumnMap`].
pub struct Remapper<'a> {
    map: &'a ColumnMap,
}

impl<'a> Remapper<'a> {
    pub fn new(map: &'a ColumnMap) -> Self {
        Self { map }
    }
}

impl Rewriter for Remapper<'_> {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        if let Expr::Column(c) = expr {
            if let Some(replacement) = self.map.get(&(c.alias, c.name.clone())) {
                return Some(Expr::Column(replacement.clone()));
            }
            return None;
        }
        visit::walk_expr(self, expr)
    }
}

/// Replaces column references with arbitrary expressions. Used to localize
/// references to a select's own alias (replacing them with the declared
/// expressions) and when a merged-away select's columns must be inlined.
pub struct ExprSubstitutor {
    map: HashMap<(TableAlias, String), Expr>,
}

impl ExprSubstitutor {
    pub fn new(map: HashMap<(TableAlias, String), Expr>) -> Self {
        Self { map }
    }

    /// Substitutes references to `select`'s output with their declarations.
    pub fn for_select(select: &Select) -> Self {
        let map = select
            .columns
            .iter()
            .map(|c| ((select.alias, c.name.clone()), c.expr.clone()))
            .collect();
        Self { map }
    }
}

impl Rewriter for ExprSubstitutor {
    fn rewrite_expr(&mut self, expr: &Expr) -> Option<Expr> {
        if let Expr::Column(c) = expr {
            return self.map.get(&(c.alias, c.name.clone())).cloned();
        }
        visit::walk_expr(self, expr)
    }
}

/// Remap every column reference in a projector through `map`.
pub fn remap_projector(projector: &Projector, map: &ColumnMap) -> Projector {
    let mut remapper = Remapper::new(map);
    remapper
        .rewrite_projector(projector)
        .unwrap_or_else(|| projector.clone())
}

/// Remap every column reference in an expression through `map`.
pub fn remap_expr(expr: &Expr, map: &ColumnMap) -> Expr {
    let mut remapper = Remapper::new(map);
    remapper.rewrite_expr(expr).unwrap_or_else(|| expr.clone())
}

/// Declare pass-through columns for everything `inner` declares, extending
/// `map` so references to the inner select repoint at `outer_alias`.
pub fn pass_through(
    inner: &Select,
    outer_alias: TableAlias,
    columns: &mut Vec<ColumnDecl>,
    map: &mut ColumnMap,
) {
    for decl in &inner.columns {
        let mut name = decl.name.clone();
        // Joined sides may declare colliding names; uniquify on the outside.
        if columns.iter().any(|c| c.name == name) {
            let mut n = 1;
            loop {
                let candidate = format!("{}{}", decl.name, n);
                if !columns.iter().any(|c| c.name == candidate) {
                    name = candidate;
                    break;
                }
                n += 1;
            }
        }
        let ty = decl.sql_type();
        columns.push(ColumnDecl::new(
            name.clone(),
            Expr::Column(ColumnRef::new(inner.alias, decl.name.clone(), ty)),
        ));
        map.insert(
            (inner.alias, decl.name.clone()),
            ColumnRef::new(outer_alias, name, ty),
        );
    }
}

/// Wrap a bound projection in a fresh pass-through select, the canonical
/// step before folding an operator's clause in. The redundant-subquery pass
/// later merges wrappers that stayed trivial.
pub fn wrap(projection: Projection, aliases: &mut AliasGenerator) -> (Select, Projector) {
    let alias = aliases.fresh();
    let mut columns = Vec::new();
    let mut map = ColumnMap::new();
    pass_through(&projection.select, alias, &mut columns, &mut map);
    let projector = remap_projector(&projection.projector, &map);
    let mut select = Select::new(alias);
    select.columns = columns;
    select.from = Some(Source::Select(Box::new(projection.select)));
    (select, projector)
}

/// Wrap two bound projections around a join source.
pub fn wrap_join(
    left: &Select,
    right: &Select,
    aliases: &mut AliasGenerator,
) -> (TableAlias, Vec<ColumnDecl>, ColumnMap) {
    let alias = aliases.fresh();
    let mut columns = Vec::new();
    let mut map = ColumnMap::new();
    pass_through(left, alias, &mut columns, &mut map);
    pass_through(right, alias, &mut columns, &mut map);
    (alias, columns, map)
}

/// Ensure `expr` is readable as a declared column of `select`, declaring a
/// computed column when necessary. Returns the reading reference.
pub fn import_expr(select: &mut Select, expr: &Expr, preferred: &str) -> Expr {
    if let Expr::Column(c) = expr {
        if c.alias == select.alias && select.declares_column(&c.name) {
            return expr.clone();
        }
    }
    let ty = expr.sql_type();
    let name = select.declare(preferred, expr.clone());
    Expr::Column(ColumnRef::new(select.alias, name, ty))
}

/// Push every scalar leaf of a projector into declared columns of `select`,
/// so the projector reads only declared columns afterwards.
pub fn flatten_projector(projector: &Projector, select: &mut Select) -> Projector {
    match projector {
        Projector::Expr(e) => Projector::Expr(import_expr(select, e, "c")),
        Projector::Entity { entity, members } => Projector::Entity {
            entity: entity.clone(),
            members: members
                .iter()
                .map(|(n, m)| (n.clone(), flatten_member(m, select, n)))
                .collect(),
        },
        Projector::Record(members) => Projector::Record(
            members
                .iter()
                .map(|(n, m)| (n.clone(), flatten_member(m, select, n)))
                .collect(),
        ),
        Projector::OuterJoined { test, inner } => Projector::OuterJoined {
            test: Box::new(import_expr(select, test, "test")),
            inner: Box::new(flatten_projector(inner, select)),
        },
        // Nested projections run as their own queries; their key expressions
        // are imported by the client-join compilation step instead.
        Projector::Subquery(_) | Projector::ClientJoin(_) | Projector::Deferred(_) => {
            projector.clone()
        }
    }
}

fn flatten_member(projector: &Projector, select: &mut Select, preferred: &str) -> Projector {
    match projector {
        Projector::Expr(e) => Projector::Expr(import_expr(select, e, preferred)),
        other => flatten_projector(other, select),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::BinaryOp;
    use crate::types::SqlType;

    #[test]
    fn test_wrap_repoints_projector() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        let inner_alias = select.alias;
        select.columns.push(ColumnDecl::new(
            "id",
            Expr::Column(ColumnRef::new(table, "id", SqlType::Int)),
        ));
        let projection = Projection::new(
            select,
            Projector::Expr(Expr::Column(ColumnRef::new(inner_alias, "id", SqlType::Int))),
        );
        let (wrapped, projector) = wrap(projection, &mut aliases);
        match projector {
            Projector::Expr(Expr::Column(c)) => {
                assert_eq!(c.alias, wrapped.alias);
                assert_eq!(c.name, "id");
            }
            other => panic!("unexpected projector {:?}", other),
        }
    }

    #[test]
    fn test_flatten_declares_computed_columns() {
        let mut aliases = AliasGenerator::new();
        let table = aliases.fresh();
        let mut select = Select::new(aliases.fresh());
        let sum = Expr::binary(
            BinaryOp::Add,
            Expr::Column(ColumnRef::new(table, "a", SqlType::Int)),
            Expr::Column(ColumnRef::new(table, "b", SqlType::Int)),
        );
        let flattened = flatten_projector(&Projector::Expr(sum), &mut select);
        assert_eq!(select.columns.len(), 1);
        match flattened {
            Projector::Expr(Expr::Column(c)) => assert_eq!(c.alias, select.alias),
            other => panic!("unexpected projector {:?}", other),
        }
    }
}
