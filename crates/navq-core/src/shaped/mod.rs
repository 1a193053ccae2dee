//! The shaped query form and its compiler.

mod fixup;
mod plan;

pub use fixup::compile_shaped_query;
pub use plan::{IncludeShape, OrderingTerm, PendingSelector, ShapedQueryPlan};
