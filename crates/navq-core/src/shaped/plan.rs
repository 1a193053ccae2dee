//! The provider-neutral shaped query form.
//!
//! Output of the navigation-expansion pass and input to the provider
//! translator. All navigation accesses have been replaced by bound columns
//! over source aliases; the pending selector describes the still-unapplied
//! final projection.

use std::collections::BTreeSet;

use navq_ir::{CardinalityOp, OrderDirection, ProjectedField, ScalarExpr};

use crate::model::NavigationDef;
use crate::tree::NavigationTree;

/// One term of the ordering chain.
#[derive(Debug, Clone)]
pub struct OrderingTerm {
    /// Bound ordering key.
    pub key: ScalarExpr,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// The still-unapplied final projection.
#[derive(Debug, Clone)]
pub enum PendingSelector {
    /// Materialize entity instances of the root source.
    EntityShape {
        /// Root source alias.
        source: String,
    },
    /// Project named scalar fields (bound expressions).
    Fields(Vec<ProjectedField>),
}

/// One eager-load directive in the final shape.
#[derive(Debug, Clone)]
pub struct IncludeShape {
    /// The navigation being loaded.
    pub navigation: NavigationDef,
    /// Alias of the parent source.
    pub parent_source: String,
    /// Alias of the related source.
    pub target_source: String,
    /// True when the related data rides on the main join tree (the
    /// navigation was already expanded for filtering or ordering); false
    /// when the provider fetches it as a separate keyed set.
    pub from_tree: bool,
    /// Declarative query filter for the related entity type, bound to the
    /// target alias.
    pub filter: Option<ScalarExpr>,
    /// Nested includes below this one.
    pub children: Vec<IncludeShape>,
}

/// The expanded, provider-neutral query plan.
#[derive(Debug, Clone)]
pub struct ShapedQueryPlan {
    /// Root entity type.
    pub root_entity: String,
    /// Root source alias.
    pub root_source: String,
    /// The join tree.
    pub tree: NavigationTree,
    /// Rewritten row predicate.
    pub predicate: Option<ScalarExpr>,
    /// Ordering chain, primary term first.
    pub orderings: Vec<OrderingTerm>,
    /// The pending selector.
    pub selector: PendingSelector,
    /// Eager-load directives.
    pub includes: Vec<IncludeShape>,
    /// Rows to skip, if any.
    pub skip: Option<ScalarExpr>,
    /// Row limit, if any.
    pub take: Option<ScalarExpr>,
    /// Cardinality reduction, if any.
    pub cardinality: Option<CardinalityOp>,
    /// Free-text plan annotations.
    pub tags: BTreeSet<String>,
    /// Whether materialized entities are tracked.
    pub tracking: bool,
}

impl ShapedQueryPlan {
    /// Walk all include shapes depth-first.
    pub fn walk_includes(&self, mut visit: impl FnMut(&IncludeShape)) {
        fn walk(includes: &[IncludeShape], visit: &mut impl FnMut(&IncludeShape)) {
            for include in includes {
                visit(include);
                walk(&include.children, visit);
            }
        }
        walk(&self.includes, &mut visit);
    }
}
