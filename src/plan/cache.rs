//! Shape-keyed plan cache.
//!
//! Keys are operator-shape hashes, so two queries differing only in literal
//! values share one compiled plan. Read-mostly; the write lock is held only
//! for the insert after a miss.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CommandPlan, QueryPlan};

#[derive(Default)]
pub struct PlanCache {
    queries: RwLock<HashMap<u64, Arc<QueryPlan>>>,
    commands: RwLock<HashMap<u64, Arc<CommandPlan>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shape: u64) -> Option<Arc<QueryPlan>> {
        self.queries.read().get(&shape).cloned()
    }

    pub fn insert(&self, shape: u64, plan: Arc<QueryPlan>) {
        self.queries.write().insert(shape, plan);
    }

    pub fn get_command(&self, shape: u64) -> Option<Arc<CommandPlan>> {
        self.commands.read().get(&shape).cloned()
    }

    pub fn insert_command(&self, shape: u64, plan: Arc<CommandPlan>) {
        self.commands.write().insert(shape, plan);
    }

    pub fn len(&self) -> usize {
        self.queries.read().len() + self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.queries.write().clear();
        self.commands.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::projector::{Projection, Projector};
    use crate::ast::query::Select;
    use crate::ast::{AliasGenerator, ColumnDecl, Expr};
    use crate::format::Postgres;

    #[test]
    fn test_cache_round_trip() {
        let mut aliases = AliasGenerator::new();
        let mut select = Select::new(aliases.fresh());
        select.columns.push(ColumnDecl::new("x", Expr::value(1i64)));
        let projection = Projection::new(
            select.clone(),
            Projector::Expr(Expr::Column(crate::ast::ColumnRef::new(
                select.alias,
                "x",
                crate::types::SqlType::Int,
            ))),
        );
        let plan = Arc::new(crate::plan::compile_query(&Postgres, &projection).unwrap());

        let cache = PlanCache::new();
        assert!(cache.get(42).is_none());
        cache.insert(42, Arc::clone(&plan));
        assert_eq!(cache.len(), 1);
        let hit = cache.get(42).unwrap();
        assert_eq!(hit.query.query.sql, plan.query.query.sql);
        cache.clear();
        assert!(cache.is_empty());
    }
}
