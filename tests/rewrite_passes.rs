//! Pipeline-level properties: plan caching, parameter determinism, and
//! dialect gating.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use relq::{Postgres, Query, QueryCompiler, RelqError, Sqlite};

fn compiler(dialect: Arc<dyn relq::Dialect>) -> QueryCompiler {
    QueryCompiler::new(Arc::new(common::mapping()), dialect)
}

#[test]
fn test_plans_shared_across_literal_values() {
    let c = compiler(Arc::new(Postgres));
    let london = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").eq("London"))
                .select(|c| c.member("name")),
        )
        .unwrap();
    let paris = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").eq("Paris"))
                .select(|c| c.member("name")),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&london, &paris));
    assert_eq!(c.cache().len(), 1);
}

#[test]
fn test_structurally_different_queries_get_distinct_plans() {
    let c = compiler(Arc::new(Postgres));
    let filtered = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").eq("London"))
                .select(|c| c.member("name")),
        )
        .unwrap();
    let unfiltered = c
        .compile(&Query::entity("Customer").select(|c| c.member("name")))
        .unwrap();
    assert!(!Arc::ptr_eq(&filtered, &unfiltered));
    assert_eq!(c.cache().len(), 2);
}

#[test]
fn test_compilation_is_deterministic() {
    let build = || {
        compiler(Arc::new(Postgres))
            .compile(
                &Query::entity("Order")
                    .filter(|o| o.member("amount").gt(100i64).and(o.member("customer_id").eq(7i64)))
                    .select(|o| o.member("id")),
            )
            .unwrap()
    };
    let first = build();
    let second = build();
    assert_eq!(first.query.query.sql, second.query.query.sql);
    let names = |plan: &relq::QueryPlan| {
        plan.query
            .query
            .params
            .iter()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
}

#[test]
fn test_identical_literals_share_one_parameter() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .filter(|cu| {
                    cu.member("name")
                        .eq("x")
                        .or(cu.member("city").eq("x"))
                })
                .select(|cu| cu.member("id")),
        )
        .unwrap();
    assert_eq!(plan.query.query.params.len(), 1);
    assert!(plan.query.query.sql.contains("$1"), "{}", plan.query.query.sql);
    assert!(!plan.query.query.sql.contains("$2"), "{}", plan.query.query.sql);
}

#[test]
fn test_reverse_flips_ordering_instead_of_rows() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .order_by(|cu| cu.member("name"))
                .select(|cu| cu.member("name"))
                .reverse(),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains(" DESC"), "{}", plan.query.query.sql);
    assert!(!plan.query.query.sql.contains(" ASC"), "{}", plan.query.query.sql);
}

#[test]
fn test_last_compiles_to_reversed_first() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .order_by(|cu| cu.member("name"))
                .select(|cu| cu.member("name"))
                .last(),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains(" DESC"), "{}", plan.query.query.sql);
    assert!(plan.query.query.sql.contains("LIMIT"), "{}", plan.query.query.sql);
}

#[test]
fn test_exists_renders_for_any() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Order").any_where(|o| o.member("amount").gt(0i64)))
        .unwrap();
    assert!(plan.query.query.sql.contains("EXISTS ("), "{}", plan.query.query.sql);
}

#[test]
fn test_all_renders_as_negated_exists() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Order").all(|o| o.member("amount").gt(0i64)))
        .unwrap();
    let sql = &plan.query.query.sql;
    assert!(sql.contains("NOT ("), "{}", sql);
    assert!(sql.contains("EXISTS ("), "{}", sql);
}

#[test]
fn test_unknown_member_fails_at_bind_time() {
    let c = compiler(Arc::new(Postgres));
    let err = c
        .compile(&Query::entity("Customer").select(|cu| cu.member("missing")))
        .unwrap_err();
    assert!(
        matches!(err, RelqError::UnknownMember { .. }),
        "{:?}",
        err
    );
}

#[test]
fn test_unknown_entity_fails_at_bind_time() {
    let c = compiler(Arc::new(Postgres));
    let err = c.compile(&Query::entity("Invoice")).unwrap_err();
    assert!(matches!(err, RelqError::UnknownEntity(_)), "{:?}", err);
}

#[test]
fn test_sqlite_compiles_simple_queries() {
    let c = compiler(Arc::new(Sqlite));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .filter(|cu| cu.member("city").eq("London"))
                .select(|cu| cu.member("name")),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains("?"), "{}", plan.query.query.sql);
}
