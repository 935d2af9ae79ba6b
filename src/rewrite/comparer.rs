//! Structural equivalence of sources up to an alias correspondence.
//!
//! Two sources are equivalent when one can be obtained from the other by
//! renaming declared aliases consistently. The returned map sends aliases of
//! the second source to their counterparts in the first.

use std::collections::HashMap;

use crate::ast::expr::{Expr, InSet};
use crate::ast::query::{Select, Source};
use crate::ast::TableAlias;

pub type AliasCorrespondence = HashMap<TableAlias, TableAlias>;

pub fn equivalent_sources(a: &Source, b: &Source) -> Option<AliasCorrespondence> {
    let mut map = AliasCorrespondence::new();
    sources_match(a, b, &mut map).then_some(map)
}

fn sources_match(a: &Source, b: &Source, map: &mut AliasCorrespondence) -> bool {
    match (a, b) {
        (Source::Table(ta), Source::Table(tb)) => {
            if ta.name != tb.name {
                return false;
            }
            map.insert(tb.alias, ta.alias);
            true
        }
        (Source::Select(sa), Source::Select(sb)) => selects_match(sa, sb, map),
        (Source::Join(ja), Source::Join(jb)) => {
            ja.kind == jb.kind
                && sources_match(&ja.left, &jb.left, map)
                && sources_match(&ja.right, &jb.right, map)
                && match (&ja.condition, &jb.condition) {
                    (None, None) => true,
                    (Some(ca), Some(cb)) => exprs_match(ca, cb, map),
                    _ => false,
                }
        }
        _ => false,
    }
}

fn selects_match(a: &Select, b: &Select, map: &mut AliasCorrespondence) -> bool {
    if a.columns.len() != b.columns.len()
        || a.order_by.len() != b.order_by.len()
        || a.group_by.len() != b.group_by.len()
        || a.distinct != b.distinct
        || a.reverse != b.reverse
    {
        return false;
    }
    match (&a.from, &b.from) {
        (None, None) => {}
        (Some(fa), Some(fb)) => {
            if !sources_match(fa, fb, map) {
                return false;
            }
        }
        _ => return false,
    }
    map.insert(b.alias, a.alias);
    for (ca, cb) in a.columns.iter().zip(&b.columns) {
        if ca.name != cb.name || !exprs_match(&ca.expr, &cb.expr, map) {
            return false;
        }
    }
    if !opt_exprs_match(&a.where_clause, &b.where_clause, map) {
        return false;
    }
    for (oa, ob) in a.order_by.iter().zip(&b.order_by) {
        if oa.order != ob.order || !exprs_match(&oa.expr, &ob.expr, map) {
            return false;
        }
    }
    for (ga, gb) in a.group_by.iter().zip(&b.group_by) {
        if !exprs_match(ga, gb, map) {
            return false;
        }
    }
    opt_exprs_match(&a.skip, &b.skip, map) && opt_exprs_match(&a.take, &b.take, map)
}

fn opt_exprs_match(a: &Option<Expr>, b: &Option<Expr>, map: &mut AliasCorrespondence) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(ea), Some(eb)) => exprs_match(ea, eb, map),
        _ => false,
    }
}

fn exprs_match(a: &Expr, b: &Expr, map: &mut AliasCorrespondence) -> bool {
    match (a, b) {
        (Expr::Column(ca), Expr::Column(cb)) => {
            // Aliases declared outside both sources must agree literally.
            let mapped = map.get(&cb.alias).copied().unwrap_or(cb.alias);
            mapped == ca.alias && ca.name == cb.name
        }
        (Expr::Value(va), Expr::Value(vb)) => va == vb,
        (Expr::Named(na), Expr::Named(nb)) => na == nb,
        (
            Expr::Binary {
                op: oa,
                left: la,
                right: ra,
            },
            Expr::Binary {
                op: ob,
                left: lb,
                right: rb,
            },
        ) => oa == ob && exprs_match(la, lb, map) && exprs_match(ra, rb, map),
        (Expr::Not(ia), Expr::Not(ib)) | (Expr::Negate(ia), Expr::Negate(ib)) => {
            exprs_match(ia, ib, map)
        }
        (
            Expr::IsNull {
                expr: ia,
                negated: na,
            },
            Expr::IsNull {
                expr: ib,
                negated: nb,
            },
        ) => na == nb && exprs_match(ia, ib, map),
        (
            Expr::Function {
                name: na,
                args: aa,
            },
            Expr::Function {
                name: nb,
                args: ab,
            },
        ) => {
            na == nb
                && aa.len() == ab.len()
                && aa.iter().zip(ab).all(|(x, y)| exprs_match(x, y, map))
        }
        (
            Expr::Aggregate {
                func: fa,
                arg: aa,
                distinct: da,
            },
            Expr::Aggregate {
                func: fb,
                arg: ab,
                distinct: db,
            },
        ) => {
            fa == fb
                && da == db
                && match (aa, ab) {
                    (None, None) => true,
                    (Some(x), Some(y)) => exprs_match(x, y, map),
                    _ => false,
                }
        }
        (Expr::Scalar(sa), Expr::Scalar(sb)) | (Expr::Exists(sa), Expr::Exists(sb)) => {
            selects_match(sa, sb, map)
        }
        (
            Expr::In {
                expr: ia,
                set: seta,
            },
            Expr::In {
                expr: ib,
                set: setb,
            },
        ) => {
            exprs_match(ia, ib, map)
                && match (seta, setb) {
                    (InSet::List(la), InSet::List(lb)) => {
                        la.len() == lb.len()
                            && la.iter().zip(lb).all(|(x, y)| exprs_match(x, y, map))
                    }
                    (InSet::Query(qa), InSet::Query(qb)) => selects_match(qa, qb, map),
                    _ => false,
                }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::ColumnRef;
    use crate::ast::query::TableSource;
    use crate::ast::AliasGenerator;
    use crate::types::SqlType;

    #[test]
    fn test_same_table_different_alias_is_equivalent() {
        let mut aliases = AliasGenerator::new();
        let a = Source::Table(TableSource {
            alias: aliases.fresh(),
            name: "orders".into(),
        });
        let b = Source::Table(TableSource {
            alias: aliases.fresh(),
            name: "orders".into(),
        });
        assert!(equivalent_sources(&a, &b).is_some());
    }

    #[test]
    fn test_different_tables_are_not_equivalent() {
        let mut aliases = AliasGenerator::new();
        let a = Source::Table(TableSource {
            alias: aliases.fresh(),
            name: "orders".into(),
        });
        let b = Source::Table(TableSource {
            alias: aliases.fresh(),
            name: "customers".into(),
        });
        assert!(equivalent_sources(&a, &b).is_none());
    }

    #[test]
    fn test_select_columns_must_agree() {
        let mut aliases = AliasGenerator::new();
        let table = TableSource {
            alias: aliases.fresh(),
            name: "orders".into(),
        };
        let mut sa = Select::new(aliases.fresh());
        sa.from = Some(Source::Table(table.clone()));
        sa.columns.push(crate::ast::query::ColumnDecl::new(
            "id",
            Expr::Column(ColumnRef::new(table.alias, "id", SqlType::Int)),
        ));
        let table_b = TableSource {
            alias: aliases.fresh(),
            name: "orders".into(),
        };
        let mut sb = Select::new(aliases.fresh());
        sb.from = Some(Source::Table(table_b.clone()));
        sb.columns.push(crate::ast::query::ColumnDecl::new(
            "id",
            Expr::Column(ColumnRef::new(table_b.alias, "id", SqlType::Int)),
        ));
        assert!(equivalent_sources(
            &Source::Select(Box::new(sa)),
            &Source::Select(Box::new(sb))
        )
        .is_some());
    }
}
