//! NAVQ core - navigation expansion, query compilation, and include fixup.
//!
//! This crate rewrites object-graph queries into explicit join structure,
//! compiles the result shape into a reusable executor delegate, caches
//! compiled plans by structural shape, and wires eagerly-loaded related
//! entities together with tracking/non-tracking loaded-state policies.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod cache;
pub mod compile;
pub mod engine;
pub mod error;
pub mod eval;
pub mod execution;
pub mod expand;
pub mod model;
pub mod provider;
pub mod shaped;
pub mod tree;

pub use cache::{CacheStats, QueryCache, QueryFingerprint};
pub use compile::{parameterize, CompiledQuery, ParameterExtractor, QueryCompilationContext};
pub use engine::QueryEngine;
pub use error::Error;
pub use execution::{
    ChangeTracker, CollectionAccessor, EntityHandle, EntityKey, ExecutionContext, KeyValue,
    LazyLoadState, ParameterStore, QueryResult, TrackedEntry,
};
pub use expand::NavigationExpander;
pub use model::{
    EntityDef, FieldDef, FieldType, Model, ModelBuilder, NavigationDef, NavigationKind, ScalarType,
};
pub use provider::{
    ExecutableShape, MemoryProvider, MemoryStore, NoopShapeOptimizer, ShapeOptimizer,
    ShapeTranslator, ShapedResultSet,
};
pub use shaped::{IncludeShape, ShapedQueryPlan};
pub use tree::{EntityReference, IncludeTreeNode, NavigationTree};

/// Re-export the query IR.
pub use navq_ir as ir;
