//! Provider boundary: translation of the shaped plan into an executable
//! shape, plus the in-memory reference provider.

mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use navq_ir::Value;

use crate::error::Error;
use crate::execution::{ExecutionContext, ParameterStore};
use crate::shaped::ShapedQueryPlan;

pub use memory::{MemoryProvider, MemoryStore};

/// Field values of one source row.
pub type FieldValues = BTreeMap<String, Value>;

/// One joined result row: field values per source alias. Unmatched left-join
/// sources are absent.
#[derive(Debug, Clone, Default)]
pub struct AliasedRow {
    sources: HashMap<String, FieldValues>,
}

impl AliasedRow {
    /// A row with a single source.
    pub fn single(alias: impl Into<String>, values: FieldValues) -> Self {
        let mut row = Self::default();
        row.sources.insert(alias.into(), values);
        row
    }

    /// Attach a source's values.
    pub fn insert_source(&mut self, alias: impl Into<String>, values: FieldValues) {
        self.sources.insert(alias.into(), values);
    }

    /// All values of one source, if present on this row.
    pub fn source(&self, alias: &str) -> Option<&FieldValues> {
        self.sources.get(alias)
    }

    /// One column value; absent sources yield `None`.
    pub fn column(&self, alias: &str, field: &str) -> Option<&Value> {
        self.sources.get(alias).and_then(|values| values.get(field))
    }
}

/// One related row of a keyed include fetch.
#[derive(Debug, Clone)]
pub struct IncludeRow {
    /// The join-key value linking back to the parent row.
    pub parent_key: Value,
    /// Entity type of the row as stated by the provider; checked against
    /// the navigation's declared relation type at fixup time.
    pub entity_type: String,
    /// Field values.
    pub values: FieldValues,
}

/// Rows produced by executing a shaped plan.
#[derive(Debug, Clone, Default)]
pub struct ShapedResultSet {
    /// Joined root rows in result order.
    pub root_rows: Vec<AliasedRow>,
    /// Related rows per include target alias.
    pub include_rows: HashMap<String, Vec<IncludeRow>>,
}

/// A provider-specific executable shape: the row-producing stage the
/// shaped-query compiler wraps with materialization and fixup.
#[derive(Clone)]
pub struct ExecutableShape {
    fetch: Arc<
        dyn Fn(&ExecutionContext, &ParameterStore) -> Result<ShapedResultSet, Error>
            + Send
            + Sync,
    >,
}

impl ExecutableShape {
    /// Wrap a row-producing closure.
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn(&ExecutionContext, &ParameterStore) -> Result<ShapedResultSet, Error>
            + Send
            + Sync
            + 'static,
    {
        Self {
            fetch: Arc::new(fetch),
        }
    }

    /// Produce the rows for one execution.
    pub fn fetch(
        &self,
        ctx: &ExecutionContext,
        params: &ParameterStore,
    ) -> Result<ShapedResultSet, Error> {
        (self.fetch)(ctx, params)
    }
}

impl std::fmt::Debug for ExecutableShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExecutableShape(..)")
    }
}

/// Evaluation environment over one joined row plus the execution's
/// parameter values.
pub(crate) struct RowEnv<'a> {
    pub row: &'a AliasedRow,
    pub params: &'a ParameterStore,
}

impl crate::eval::EvalEnv for RowEnv<'_> {
    fn column(&self, source: &str, field: &str) -> Result<Value, Error> {
        // Absent sources are unmatched left joins.
        Ok(self
            .row
            .column(source, field)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn parameter(&self, name: &str) -> Result<Value, Error> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Parameter(format!("parameter '{name}' is absent")))
    }

    fn context_value(&self, name: &str) -> Result<Value, Error> {
        Err(Error::InvalidData(format!(
            "unresolved context value '{name}' in executable shape"
        )))
    }
}

/// Translates the provider-neutral shaped plan into an executable shape.
/// This core treats the stage as opaque.
pub trait ShapeTranslator: Send + Sync {
    /// Translate one shaped plan.
    fn translate(&self, plan: &ShapedQueryPlan) -> Result<ExecutableShape, Error>;
}

/// External shape-level optimization hook, applied between expansion and
/// translation.
pub trait ShapeOptimizer: Send + Sync {
    /// Optimize one shaped plan.
    fn optimize(&self, plan: ShapedQueryPlan) -> Result<ShapedQueryPlan, Error>;
}

/// The default pass-through optimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShapeOptimizer;

impl ShapeOptimizer for NoopShapeOptimizer {
    fn optimize(&self, plan: ShapedQueryPlan) -> Result<ShapedQueryPlan, Error> {
        Ok(plan)
    }
}
