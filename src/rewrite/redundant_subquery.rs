//! Merges select-over-select chains the binder's wrapping discipline leaves
//! behind.
//!
//! Two directions:
//! - a plain-projection inner select dissolves into its outer, its declared
//!   expressions inlined at every use;
//! - a pass-through outer select collapses onto its inner, keeping the
//!   outer's alias so references from above stay valid.
//!
//! Join sides are never merged; correlation from sibling subqueries may
//! target them by alias.

use std::collections::HashMap;

use super::util::ExprSubstitutor;
use super::Remapper;
use crate::ast::expr::{ColumnRef, Expr};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source};
use crate::ast::visit::{self, Rewriter};
use crate::ast::TableAlias;
use crate::binder::columns::ColumnMap;

pub fn run(mut projection: Projection) -> Projection {
    loop {
        let mut merger = Merger {
            renames: ColumnMap::new(),
            inlined: HashMap::new(),
            changed: false,
        };
        projection = merger.apply(projection);
        if !merger.renames.is_empty() {
            projection = Remapper::new(&merger.renames).apply(projection);
        }
        // Correlated projector subqueries may reference a dissolved select
        // from outside the walk that merged it; inline those uses too.
        let inlined = std::mem::take(&mut merger.inlined);
        if !inlined.is_empty() {
            projection = ExprSubstitutor::new(inlined).apply(projection);
        }
        if !merger.changed {
            return projection;
        }
    }
}

struct Merger {
    renames: ColumnMap,
    /// Declarations of dissolved selects, keyed by the vanished alias.
    inlined: HashMap<(TableAlias, String), Expr>,
    changed: bool,
}

impl Merger {
    /// The inner select shapes no rows: inline its columns into the outer.
    fn dissolve_inner(&mut self, outer: &Select) -> Option<Select> {
        let inner = match &outer.from {
            Some(Source::Select(inner)) => inner,
            _ => return None,
        };
        if !inner.is_plain_projection() {
            return None;
        }
        // Complex inner expressions are only safe to inline into a select
        // that adds no clauses of its own (no duplication into predicates).
        if !inner.has_simple_columns() && !outer.is_plain_projection() {
            return None;
        }
        let mut substitutor = ExprSubstitutor::for_select(inner);
        let mut merged = substitutor.rewrite_select(outer).unwrap_or_else(|| outer.clone());
        merged.from = inner.from.clone();
        for decl in &inner.columns {
            self.inlined
                .insert((inner.alias, decl.name.clone()), decl.expr.clone());
        }
        self.changed = true;
        Some(merged)
    }

    /// The outer select is a bare pass-through: keep the inner, under the
    /// outer's alias.
    fn collapse_outer(&mut self, outer: &Select) -> Option<Select> {
        let inner = match &outer.from {
            Some(Source::Select(inner)) => inner,
            _ => return None,
        };
        if !outer.is_plain_projection() {
            return None;
        }
        // The grouped select's alias anchors hoisted aggregates; renaming it
        // would strand them.
        if !inner.group_by.is_empty() {
            return None;
        }
        let mut sources = Vec::with_capacity(outer.columns.len());
        for decl in &outer.columns {
            match &decl.expr {
                Expr::Column(c) if c.alias == inner.alias => sources.push((decl, c)),
                _ => return None,
            }
        }
        let mut merged = (**inner).clone();
        merged.alias = outer.alias;
        for (decl, source) in sources {
            if decl.name != source.name {
                self.renames.insert(
                    (outer.alias, decl.name.clone()),
                    ColumnRef::new(outer.alias, source.name.clone(), source.ty),
                );
            }
        }
        // The inner alias vanishes; repoint stragglers (correlated projector
        // subqueries) at the surviving alias.
        for decl in &inner.columns {
            self.renames.insert(
                (inner.alias, decl.name.clone()),
                ColumnRef::new(outer.alias, decl.name.clone(), decl.sql_type()),
            );
        }
        self.changed = true;
        Some(merged)
    }
}

impl Rewriter for Merger {
    fn rewrite_select(&mut self, select: &Select) -> Option<Select> {
        let walked = visit::walk_select(self, select);
        let current = walked.as_ref().unwrap_or(select);
        if let Some(merged) = self.dissolve_inner(current) {
            return Some(merged);
        }
        if let Some(merged) = self.collapse_outer(current) {
            return Some(merged);
        }
        walked
    }
}
