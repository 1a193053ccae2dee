//! The query engine: parameterization, cached compilation, invocation.

use std::sync::Arc;

use navq_ir::QueryExpr;
use tracing::debug;

use crate::cache::{QueryCache, QueryFingerprint};
use crate::compile::{parameterize, CompiledQuery, QueryCompilationContext};
use crate::error::Error;
use crate::execution::{ExecutionContext, ParameterStore, QueryResult};
use crate::model::Model;
use crate::provider::{ShapeOptimizer, ShapeTranslator};

/// Ties the model, provider translator, optional shape optimizer, and
/// compiled-plan cache together.
pub struct QueryEngine {
    model: Arc<Model>,
    translator: Arc<dyn ShapeTranslator>,
    optimizer: Option<Arc<dyn ShapeOptimizer>>,
    cache: QueryCache,
}

impl QueryEngine {
    /// Create an engine over a model and provider translator.
    pub fn new(model: Arc<Model>, translator: Arc<dyn ShapeTranslator>) -> Self {
        Self {
            model,
            translator,
            optimizer: None,
            cache: QueryCache::new(),
        }
    }

    /// Install an external shape-level optimizer.
    pub fn with_optimizer(mut self, optimizer: Arc<dyn ShapeOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// The compiled-plan cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The model snapshot.
    pub fn model(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    /// Parameterize and compile a query, hitting the plan cache by
    /// structural shape. Returns the delegate and the captured parameter
    /// values extracted from the expression.
    pub fn compile(
        &self,
        query: impl Into<QueryExpr>,
        is_async: bool,
    ) -> Result<(Arc<CompiledQuery>, ParameterStore), Error> {
        let (expr, captured) = parameterize(query.into());
        let fingerprint = QueryFingerprint::compute(&expr, is_async);

        let compiled = self.cache.get_or_compile(&fingerprint, || {
            debug!(?fingerprint, "compiling query plan");
            let ctx = QueryCompilationContext::new(Arc::clone(&self.model), is_async);
            ctx.compile(
                expr.clone(),
                self.translator.as_ref(),
                self.optimizer.as_deref(),
            )
        })?;

        Ok((compiled, captured))
    }

    /// Compile (or fetch) and invoke a query against an execution context.
    ///
    /// An invocation failing with a materialization type mismatch indicates
    /// a stale or corrupt compiled plan; the cache entry is dropped so the
    /// next execution recompiles.
    pub fn execute(
        &self,
        query: impl Into<QueryExpr>,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult, Error> {
        let (expr, captured) = parameterize(query.into());
        let fingerprint = QueryFingerprint::compute(&expr, false);

        let compiled = self.cache.get_or_compile(&fingerprint, || {
            debug!(?fingerprint, "compiling query plan");
            let compilation = QueryCompilationContext::new(Arc::clone(&self.model), false);
            compilation.compile(
                expr.clone(),
                self.translator.as_ref(),
                self.optimizer.as_deref(),
            )
        })?;

        match compiled.invoke(ctx, &captured) {
            Err(error @ Error::MaterializationTypeMismatch { .. }) => {
                debug!(?fingerprint, "dropping cache entry after materialization type mismatch");
                self.cache.remove(&fingerprint);
                Err(error)
            }
            other => other,
        }
    }
}
