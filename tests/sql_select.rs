//! Compiled SQL for query chains, across dialects.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use relq::ast::value::Value;
use relq::query::OpExpr;
use relq::{MySql, Postgres, Query, QueryCompiler, SqlServer};

fn compiler(dialect: Arc<dyn relq::Dialect>) -> QueryCompiler {
    QueryCompiler::new(Arc::new(common::mapping()), dialect)
}

#[test]
fn test_filter_and_project_collapse_to_one_select() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").eq("London"))
                .select(|c| c.member("name")),
        )
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT t0.name AS name FROM customers AS t0 WHERE (t0.city = $1)"
    );
    assert_eq!(plan.query.query.params.len(), 1);
    assert_eq!(plan.query.query.params[0].name, "p0");
    assert_eq!(
        plan.query.query.params[0].value,
        Some(Value::Text("London".into()))
    );
}

#[test]
fn test_count_renders_as_aggregate() {
    let c = compiler(Arc::new(Postgres));
    let plan = c.compile(&Query::entity("Order").count()).unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT COUNT(*) AS agg FROM orders AS t0"
    );
    assert_eq!(plan.aggregator, Some(relq::ast::Aggregator::Single));
}

#[test]
fn test_paging_uses_limit_offset_on_postgres() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .order_by(|c| c.member("name"))
                .select(|c| c.member("name"))
                .skip(2i64)
                .take(3i64),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains("ORDER BY"), "{}", plan.query.query.sql);
    assert!(plan.query.query.sql.contains("LIMIT"), "{}", plan.query.query.sql);
    assert!(plan.query.query.sql.contains("OFFSET"), "{}", plan.query.query.sql);
}

#[test]
fn test_paging_uses_row_number_on_sqlserver() {
    let c = compiler(Arc::new(SqlServer));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .order_by(|c| c.member("name"))
                .select(|c| c.member("name"))
                .skip(2i64)
                .take(3i64),
        )
        .unwrap();
    assert!(
        plan.query.query.sql.contains("ROW_NUMBER() OVER"),
        "{}",
        plan.query.query.sql
    );
    assert!(!plan.query.query.sql.contains("LIMIT"), "{}", plan.query.query.sql);
}

#[test]
fn test_take_without_skip_is_top_on_sqlserver() {
    let c = compiler(Arc::new(SqlServer));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .select(|c| c.member("name"))
                .take(5i64),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains("TOP ("), "{}", plan.query.query.sql);
    assert!(
        !plan.query.query.sql.contains("ROW_NUMBER"),
        "{}",
        plan.query.query.sql
    );
}

#[test]
fn test_mysql_quotes_with_backticks() {
    let c = compiler(Arc::new(MySql));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").eq("Paris"))
                .select(|c| c.member("name")),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains("?"), "{}", plan.query.query.sql);
    assert!(!plan.query.query.sql.contains("$1"), "{}", plan.query.query.sql);
}

#[test]
fn test_distinct_renders() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Customer").select(|c| c.member("city")).distinct())
        .unwrap();
    assert!(
        plan.query.query.sql.starts_with("SELECT DISTINCT "),
        "{}",
        plan.query.query.sql
    );
}

#[test]
fn test_group_by_renders() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Order").group_by(|o| o.member("customer_id")))
        .unwrap();
    assert!(plan.query.query.sql.contains("GROUP BY"), "{}", plan.query.query.sql);
}

#[test]
fn test_join_renders_keyed_inner_join() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Customer").join(
            Query::entity("Order"),
            |c| c.member("id"),
            |o| o.member("customer_id"),
            |c, o| OpExpr::record([("name", c.member("name")), ("amount", o.member("amount"))]),
        ))
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT t0.name AS name, t1.amount AS amount \
         FROM (SELECT t2.id AS id, t2.name AS name FROM customers AS t2) AS t0 \
         INNER JOIN (SELECT t3.customer_id AS customer_id, t3.amount AS amount \
         FROM orders AS t3) AS t1 ON (t0.id = t1.customer_id)"
    );
}

#[test]
fn test_group_join_compiles_matches_as_client_join() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Customer").group_join(
            Query::entity("Order"),
            |c| c.member("id"),
            |o| o.member("customer_id"),
            |c, os| OpExpr::record([("name", c.member("name")), ("orders", os.expr())]),
        ))
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT t0.id AS id, t0.name AS name FROM customers AS t0"
    );
    assert_eq!(plan.query.children.len(), 1);
    let child = &plan.query.children[0];
    assert_eq!(
        child.plan.query.sql,
        "SELECT t0.id AS id, t0.customer_id AS customer_id, t0.amount AS amount \
         FROM orders AS t0"
    );
    assert_eq!(child.key_ordinals, vec![1]);
}

#[test]
fn test_select_many_flattens_to_a_join() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(&Query::entity("Customer").select_many(|c| c.member("orders")))
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT t1.id AS id1, t1.customer_id AS customer_id, t1.amount AS amount \
         FROM (SELECT t2.id AS id FROM customers AS t2) AS t0 \
         INNER JOIN (SELECT t3.id AS id, t3.customer_id AS customer_id, \
         t3.amount AS amount FROM orders AS t3) AS t1 ON (t0.id = t1.customer_id)"
    );
    assert!(plan.query.children.is_empty());
}

#[test]
fn test_intersect_renders_as_distinct_exists() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .select(|c| c.member("name"))
                .intersect(Query::entity("Customer").select(|c| c.member("name"))),
        )
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT DISTINCT t0.id AS id, t0.name AS name, t0.city AS city \
         FROM customers AS t0 \
         WHERE EXISTS (SELECT t1.id AS id FROM customers AS t1 WHERE (t0.name = t1.name))"
    );
}

#[test]
fn test_except_renders_as_distinct_not_exists() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .select(|c| c.member("name"))
                .except(Query::entity("Customer").select(|c| c.member("name"))),
        )
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT DISTINCT t0.id AS id, t0.name AS name, t0.city AS city \
         FROM customers AS t0 \
         WHERE NOT (EXISTS (SELECT t1.id AS id FROM customers AS t1 WHERE (t0.name = t1.name)))"
    );
}

#[test]
fn test_contains_renders_as_scalar_exists() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .select(|c| c.member("name"))
                .contains("Ann"),
        )
        .unwrap();
    assert_eq!(
        plan.query.query.sql,
        "SELECT EXISTS (SELECT t0.id AS id FROM customers AS t0 \
         WHERE (t0.name = $1)) AS result"
    );
    assert_eq!(plan.query.query.params.len(), 1);
    assert_eq!(
        plan.query.query.params[0].value,
        Some(Value::Text("Ann".into()))
    );
    assert_eq!(plan.aggregator, Some(relq::ast::Aggregator::Single));
}

#[test]
fn test_in_list_renders_inline() {
    let c = compiler(Arc::new(Postgres));
    let plan = c
        .compile(
            &Query::entity("Customer")
                .filter(|c| c.member("city").in_list(["London", "Paris"]))
                .select(|c| c.member("name")),
        )
        .unwrap();
    assert!(plan.query.query.sql.contains(" IN ("), "{}", plan.query.query.sql);
}
