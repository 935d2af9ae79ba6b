#![allow(dead_code)]

//! Shared fixtures: the test mapping and a scripted connection double.

use std::collections::VecDeque;

use relq::ast::value::Value;
use relq::error::RelqResult;
use relq::exec::{Connection, Rows, SqlCommand};
use relq::mapping::{
    EntityDef, MappingRegistry, MemberDef, RelationshipDef, RelationshipKind,
};
use relq::types::SqlType;

/// Customers with a generated key, an eager orders collection, and a
/// deferred invoices collection over the same order rows.
pub fn mapping() -> MappingRegistry {
    MappingRegistry::new()
        .register(
            EntityDef::new("Customer", "customers")
                .member(MemberDef::new("id", "id", SqlType::Int).primary_key().generated())
                .member(MemberDef::new("name", "name", SqlType::Text))
                .member(MemberDef::new("city", "city", SqlType::Text))
                .relationship(RelationshipDef {
                    name: "orders".into(),
                    target: "Order".into(),
                    kind: RelationshipKind::Collection,
                    key_pairs: vec![("id".into(), "customer_id".into())],
                    deferred: false,
                })
                .relationship(RelationshipDef {
                    name: "invoices".into(),
                    target: "Order".into(),
                    kind: RelationshipKind::Collection,
                    key_pairs: vec![("id".into(), "customer_id".into())],
                    deferred: true,
                }),
        )
        .register(
            EntityDef::new("Order", "orders")
                .member(MemberDef::new("id", "id", SqlType::Int).primary_key())
                .member(MemberDef::new("customer_id", "customer_id", SqlType::Int))
                .member(MemberDef::new("amount", "amount", SqlType::Int)),
        )
}

/// A connection returning pre-scripted row sets, one per `query` call in
/// order, and recording every command issued.
#[derive(Default)]
pub struct ScriptedConnection {
    scripts: VecDeque<Vec<Vec<Value>>>,
    pub issued: Vec<SqlCommand>,
    pub affected: u64,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.scripts.push_back(rows);
        self
    }

    pub fn affecting(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }
}

struct ScriptedRows {
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl Rows for ScriptedRows {
    fn advance(&mut self) -> RelqResult<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);
        Ok(next < self.rows.len())
    }

    fn value(&self, ordinal: usize) -> RelqResult<Value> {
        let row = self
            .cursor
            .and_then(|c| self.rows.get(c))
            .expect("no current row");
        Ok(row.get(ordinal).cloned().unwrap_or(Value::Null))
    }
}

impl Connection for ScriptedConnection {
    fn query(&mut self, command: &SqlCommand) -> RelqResult<Box<dyn Rows + '_>> {
        self.issued.push(command.clone());
        let rows = self
            .scripts
            .pop_front()
            .expect("no scripted result for query");
        Ok(Box::new(ScriptedRows { rows, cursor: None }))
    }

    fn execute(&mut self, command: &SqlCommand) -> RelqResult<u64> {
        self.issued.push(command.clone());
        Ok(self.affected)
    }
}
