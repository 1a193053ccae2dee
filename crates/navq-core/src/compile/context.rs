//! The query compilation context and pipeline.
//!
//! One [`QueryCompilationContext`] exists per compilation and is discarded
//! once the delegate is produced. It threads the per-compilation mutable
//! state (tags, tracking flag, tier-2 parameter-value store, tier-3 runtime
//! parameters) through the fixed pipeline:
//!
//! optimize → navigation expansion → shape-level optimization (external) →
//! provider translation (external) → shaped-query compilation → parameter
//! prologue → [`CompiledQuery`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use navq_ir::{QueryExpr, ScalarExpr};
use tracing::debug;

use super::optimize;
use super::parameters::ParameterExtractor;
use crate::error::Error;
use crate::execution::{ExecutionContext, ParameterStore, QueryResult};
use crate::expand::NavigationExpander;
use crate::model::Model;
use crate::provider::{ShapeOptimizer, ShapeTranslator};
use crate::shaped::compile_shaped_query;

/// The compiled delegate body: stateless, reusable, bound only to the
/// per-execution context and parameter values passed in on each call.
pub type QueryBody =
    Arc<dyn Fn(&ExecutionContext, &ParameterStore) -> Result<QueryResult, Error> + Send + Sync>;

/// Per-compilation mutable state.
pub struct QueryCompilationContext {
    model: Arc<Model>,
    is_async: bool,
    tracking: bool,
    tags: BTreeSet<String>,
    parameter_values: Vec<(String, ParameterExtractor)>,
    runtime_parameters: Vec<(String, ParameterExtractor)>,
}

impl QueryCompilationContext {
    /// Create a context for one compilation.
    pub fn new(model: Arc<Model>, is_async: bool) -> Self {
        Self {
            model,
            is_async,
            tracking: true,
            tags: BTreeSet::new(),
            parameter_values: Vec::new(),
            runtime_parameters: Vec::new(),
        }
    }

    /// The declaring model snapshot.
    pub fn model(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    /// Whether this compilation targets the async execution surface.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Whether materialized entities are tracked.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Set the tracking flag.
    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    /// Add a free-text plan annotation.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    /// The collected annotations.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Store a tier-2 (context-scoped) parameter value extractor, returning
    /// a placeholder usable downstream. Names are unique; an existing name
    /// is reused.
    pub fn add_parameter_value(
        &mut self,
        name: impl Into<String>,
        extractor: ParameterExtractor,
    ) -> Result<ScalarExpr, Error> {
        extractor.validate()?;
        let name = name.into();
        if !self.parameter_values.iter().any(|(n, _)| n == &name) {
            self.parameter_values.push((name.clone(), extractor));
        }
        Ok(ScalarExpr::Parameter(name))
    }

    /// Register a tier-3 runtime parameter, returning a placeholder usable
    /// anywhere downstream in the tree. The extractor must take exactly the
    /// execution context as its sole input; re-registering a name overwrites
    /// the extractor.
    pub fn register_runtime_parameter(
        &mut self,
        name: impl Into<String>,
        extractor: ParameterExtractor,
    ) -> Result<ScalarExpr, Error> {
        extractor.validate()?;
        let name = name.into();
        match self.runtime_parameters.iter_mut().find(|(n, _)| n == &name) {
            Some(slot) => slot.1 = extractor,
            None => self.runtime_parameters.push((name.clone(), extractor)),
        }
        Ok(ScalarExpr::Parameter(name))
    }

    /// The tier-2 parameter-value store, in registration order.
    pub fn parameter_values(&self) -> &[(String, ParameterExtractor)] {
        &self.parameter_values
    }

    /// The tier-3 runtime parameters, in registration order.
    pub fn runtime_parameters(&self) -> &[(String, ParameterExtractor)] {
        &self.runtime_parameters
    }

    /// Run the pipeline and produce the executor delegate.
    pub fn compile(
        mut self,
        expr: QueryExpr,
        translator: &dyn ShapeTranslator,
        optimizer: Option<&dyn ShapeOptimizer>,
    ) -> Result<CompiledQuery, Error> {
        let expr = optimize::normalize(expr);

        let plan = NavigationExpander::new(&mut self).expand(expr)?;
        debug!(
            root = %plan.root_entity,
            joins = plan.tree.join_count(),
            includes = plan.includes.len(),
            tracking = plan.tracking,
            "expanded navigation tree"
        );

        let plan = match optimizer {
            Some(optimizer) => optimizer.optimize(plan)?,
            None => plan,
        };

        let shape = translator.translate(&plan)?;
        let body = compile_shaped_query(self.model(), &plan, shape)?;

        Ok(CompiledQuery {
            is_async: self.is_async,
            tracking: self.tracking,
            tags: self.tags,
            context_parameters: self.parameter_values,
            runtime_parameters: self.runtime_parameters,
            body,
        })
    }
}

/// A compiled, reusable query delegate.
///
/// Invocation evaluates the parameter prologue (tier-2 context-scoped
/// values, then tier-3 runtime parameters, one assignment per registered
/// name) against the caller's execution context, then runs the body. The
/// delegate is stateless; many threads may invoke it concurrently provided
/// each supplies its own context.
pub struct CompiledQuery {
    is_async: bool,
    tracking: bool,
    tags: BTreeSet<String>,
    context_parameters: Vec<(String, ParameterExtractor)>,
    runtime_parameters: Vec<(String, ParameterExtractor)>,
    body: QueryBody,
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("is_async", &self.is_async)
            .field("tracking", &self.tracking)
            .field("tags", &self.tags)
            .field("context_parameters", &self.context_parameters.len())
            .field("runtime_parameters", &self.runtime_parameters.len())
            .finish_non_exhaustive()
    }
}

impl CompiledQuery {
    /// Invoke the delegate with an execution context and the captured
    /// parameter values extracted at parameterization time.
    pub fn invoke(
        &self,
        ctx: &ExecutionContext,
        captured: &ParameterStore,
    ) -> Result<QueryResult, Error> {
        let mut params = ctx.parameters().clone();
        for (name, value) in captured.iter() {
            params.upsert(name, value.clone());
        }
        // Tier 2 before tier 3; both re-evaluated against the current
        // context on every invocation, never cached across calls.
        for (name, extractor) in &self.context_parameters {
            let value = extractor.evaluate(ctx)?;
            params.upsert(name.clone(), value);
        }
        for (name, extractor) in &self.runtime_parameters {
            let value = extractor.evaluate(ctx)?;
            params.upsert(name.clone(), value);
        }
        (self.body)(ctx, &params)
    }

    /// Whether this plan was compiled for the async surface.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Whether this plan tracks materialized entities.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The plan annotations.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}
