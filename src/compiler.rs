//! The compiler facade: operator tree in, cached execution plan out.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::binder::Binder;
use crate::error::{RelqError, RelqResult};
use crate::exec::Connection;
use crate::format::Dialect;
use crate::mapping::EntityMapping;
use crate::plan::{self, CommandPlan, CommandResult, PlanCache, QueryPlan, ResultValue};
use crate::query::{CommandRequest, Query};
use crate::{params, rewrite};
use crate::ast::value::Value;

/// Compiles operator trees for one mapping and one dialect, caching plans by
/// query shape.
pub struct QueryCompiler {
    mapping: Arc<dyn EntityMapping>,
    dialect: Arc<dyn Dialect>,
    cache: PlanCache,
}

impl QueryCompiler {
    pub fn new(mapping: Arc<dyn EntityMapping>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            mapping,
            dialect,
            cache: PlanCache::new(),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Compile a query, reusing the cached plan when its shape was seen
    /// before.
    pub fn compile(&self, query: &Query) -> RelqResult<Arc<QueryPlan>> {
        let shape = query.shape_hash();
        if let Some(plan) = self.cache.get(shape) {
            tracing::debug!(shape, "plan cache hit");
            return Ok(plan);
        }
        tracing::debug!(shape, "plan cache miss");
        let bound = Binder::new(self.mapping.as_ref()).bind_query(query.op())?;
        let rewritten = rewrite::finalize(bound, self.dialect.as_ref())?;
        let parameterized = params::parameterize(rewritten);
        let plan = Arc::new(plan::compile_query(self.dialect.as_ref(), &parameterized)?);
        self.cache.insert(shape, Arc::clone(&plan));
        Ok(plan)
    }

    pub fn compile_command(&self, request: &CommandRequest) -> RelqResult<Arc<CommandPlan>> {
        let shape = command_shape(request)?;
        if let Some(plan) = self.cache.get_command(shape) {
            tracing::debug!(shape, "command plan cache hit");
            return Ok(plan);
        }
        tracing::debug!(shape, "command plan cache miss");
        let bound = Binder::new(self.mapping.as_ref()).bind_command(request)?;
        let rewritten = rewrite::finalize_command(bound, self.dialect.as_ref())?;
        let parameterized = params::parameterize_command(rewritten);
        let plan = Arc::new(plan::compile_command(self.dialect.as_ref(), &parameterized)?);
        self.cache.insert_command(shape, Arc::clone(&plan));
        Ok(plan)
    }

    /// Compile and run in one step.
    pub fn fetch(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        binds: &[(String, Value)],
    ) -> RelqResult<ResultValue> {
        let plan = self.compile(query)?;
        plan::run_query(conn, &plan, binds)
    }

    pub fn execute(
        &self,
        conn: &mut dyn Connection,
        request: &CommandRequest,
        binds: &[(String, Value)],
    ) -> RelqResult<CommandResult> {
        let plan = self.compile_command(request)?;
        plan::run_command(conn, &plan, binds)
    }

    pub fn execute_batch(
        &self,
        conn: &mut dyn Connection,
        request: &CommandRequest,
        items: &[Vec<(String, Value)>],
    ) -> RelqResult<Vec<CommandResult>> {
        let plan = self.compile_command(request)?;
        plan::run_batch(conn, &plan, items)
    }
}

fn command_shape(request: &CommandRequest) -> RelqResult<u64> {
    let encoded = serde_json::to_vec(request)
        .map_err(|e| RelqError::bind(format!("unencodable command request: {}", e)))?;
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Ok(hasher.finish())
}
