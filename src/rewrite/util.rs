//! Shared machinery for the rewrite passes.

use std::collections::{HashMap, HashSet};

use crate::ast::dup;
use crate::ast::expr::{ColumnRef, Expr, InSet};
use crate::ast::projector::Projection;
use crate::ast::query::{Select, Source};
use crate::ast::visit::{self, Visitor};
use crate::ast::TableAlias;
use crate::error::{RelqError, RelqResult};

/// Every `(alias, column)` pair referenced anywhere in the tree.
///
/// Scalar subqueries and `IN (select ...)` read their first column by
/// position, so that column counts as referenced even though no name points
/// at it.
pub fn referenced_columns(projection: &Projection) -> HashSet<(TableAlias, String)> {
    let mut collector = RefCollector::default();
    collector.visit_projection(projection);
    collector.found
}

#[derive(Default)]
pub struct RefCollector {
    pub found: HashSet<(TableAlias, String)>,
}

impl RefCollector {
    fn positional(&mut self, select: &Select) {
        if let Some(first) = select.columns.first() {
            self.found.insert((select.alias, first.name.clone()));
        }
    }
}

impl Visitor for RefCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column(c) => {
                self.found.insert((c.alias, c.name.clone()));
            }
            Expr::Scalar(select) => self.positional(select),
            Expr::In {
                set: InSet::Query(select),
                ..
            } => self.positional(select),
            _ => {}
        }
        visit::visit_expr_children(self, expr);
    }
}

/// Whether any column reference in `expr` targets one of `aliases`.
pub fn expr_references(expr: &Expr, aliases: &HashSet<TableAlias>) -> bool {
    let mut probe = RefProbe {
        targets: aliases,
        found: false,
    };
    probe.visit_expr(expr);
    probe.found
}

/// Whether any column reference in `select` targets one of `aliases`.
pub fn select_references(select: &Select, aliases: &HashSet<TableAlias>) -> bool {
    let mut probe = RefProbe {
        targets: aliases,
        found: false,
    };
    probe.visit_select(select);
    probe.found
}

struct RefProbe<'a> {
    targets: &'a HashSet<TableAlias>,
    found: bool,
}

impl Visitor for RefProbe<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.found {
            return;
        }
        if let Expr::Column(c) = expr {
            if self.targets.contains(&c.alias) {
                self.found = true;
                return;
            }
        }
        visit::visit_expr_children(self, expr);
    }
}

pub use crate::binder::columns::ExprSubstitutor;

/// The selects a select's clauses can reference directly: its immediate
/// from-sources, flattened through join trees.
pub fn visible_selects_mut(source: &mut Source) -> Vec<&mut Select> {
    match source {
        Source::Table(_) => vec![],
        Source::Select(select) => vec![select.as_mut()],
        Source::Join(join) => {
            let mut out = visible_selects_mut(&mut join.left);
            out.extend(visible_selects_mut(&mut join.right));
            out
        }
    }
}

/// Highest alias declared or referenced in the tree, for seeding a fresh
/// generator that cannot collide.
pub fn max_alias(projection: &Projection) -> Option<TableAlias> {
    let declared = dup::declared_aliases(projection);
    let referenced = referenced_columns(projection);
    declared
        .into_iter()
        .chain(referenced.into_iter().map(|(a, _)| a))
        .max_by_key(|a| a.token())
}

/// Whole-tree alias integrity check, run after the pipeline: every column
/// reference must target a declared alias, and references into selects must
/// name declared columns.
pub fn verify(projection: &Projection) -> RelqResult<()> {
    let mut decls = DeclCollector::default();
    decls.visit_projection(projection);
    let referenced = referenced_columns(projection);
    for (alias, name) in &referenced {
        match decls.selects.get(alias) {
            Some(columns) => {
                if !columns.contains(name) {
                    return Err(RelqError::DanglingAlias {
                        alias: *alias,
                        column: name.clone(),
                    });
                }
            }
            None => {
                if !decls.tables.contains(alias) {
                    return Err(RelqError::DanglingAlias {
                        alias: *alias,
                        column: name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct DeclCollector {
    selects: HashMap<TableAlias, HashSet<String>>,
    tables: HashSet<TableAlias>,
}

impl Visitor for DeclCollector {
    fn visit_select(&mut self, select: &Select) {
        self.selects.insert(
            select.alias,
            select.columns.iter().map(|c| c.name.clone()).collect(),
        );
        visit::visit_select_children(self, select);
    }

    fn visit_source(&mut self, source: &Source) {
        if let Source::Table(t) = source {
            self.tables.insert(t.alias);
        }
        visit::visit_source_children(self, source);
    }
}

/// A column reference reading `name` from `select`.
pub fn column_of(select: &Select, name: &str) -> Option<Expr> {
    select
        .column(name)
        .map(|c| Expr::Column(ColumnRef::new(select.alias, name, c.sql_type())))
}
