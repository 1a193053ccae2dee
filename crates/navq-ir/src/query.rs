//! Query-composition grammar.
//!
//! A query is a tree of composition operators over an entity source. The tree
//! is built innermost-first: `Query::from("User").filter(..).include("posts")`
//! produces `Include { source: Filter { source: Source { .. }, .. }, .. }`.
//! The compiler consumes the tree with an exhaustive match; constructs the
//! expansion pass does not recognize abort with an unsupported-shape error.

use crate::expr::ScalarExpr;
use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Cardinality-reducing operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardinalityOp {
    /// First result; absence is an error.
    First,
    /// First result or none.
    FirstOrDefault,
    /// Exactly one result; absence or surplus is an error.
    Single,
    /// At most one result; surplus is an error.
    SingleOrDefault,
}

/// A named projected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedField {
    /// Output field name.
    pub name: String,
    /// The projected expression.
    pub expr: ScalarExpr,
}

impl ProjectedField {
    /// Create a projected field.
    pub fn new(name: impl Into<String>, expr: ScalarExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// The final result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// Materialize full entity instances.
    EntityShape,
    /// Project named scalar fields.
    Fields(Vec<ProjectedField>),
}

/// A node in the query-composition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpr {
    /// An entity-set source.
    Source {
        /// Root entity type name.
        entity: String,
    },
    /// Restrict rows by a predicate.
    Filter {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// The predicate.
        predicate: ScalarExpr,
    },
    /// Pin the final projection.
    Select {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// The result shape.
        projection: Projection,
    },
    /// Order results. `append = false` starts a fresh primary ordering chain
    /// (discarding any pending chain); `append = true` extends the chain.
    OrderBy {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// Ordering key.
        key: ScalarExpr,
        /// Sort direction.
        direction: OrderDirection,
        /// Whether this clause extends the pending chain.
        append: bool,
    },
    /// Request eager loading of a navigation path. `extend_previous = true`
    /// continues from the most recent include path (ThenInclude).
    Include {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// Navigation segments.
        path: Vec<String>,
        /// Whether this extends the previous include path.
        extend_previous: bool,
    },
    /// Keep at most `count` rows. The count is a scalar expression so it
    /// participates in parameterization.
    Take {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// Row limit.
        count: ScalarExpr,
    },
    /// Skip the first `count` rows.
    Skip {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// Rows to skip.
        count: ScalarExpr,
    },
    /// Reduce the result to a single (optional) value.
    Reduce {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// The reduction operator.
        op: CardinalityOp,
    },
    /// Attach a free-text annotation to the compiled plan.
    Tag {
        /// Upstream query.
        source: Box<QueryExpr>,
        /// The annotation.
        tag: String,
    },
    /// Compile without change tracking.
    AsNoTracking {
        /// Upstream query.
        source: Box<QueryExpr>,
    },
}

impl QueryExpr {
    /// The upstream query, if any.
    pub fn source(&self) -> Option<&QueryExpr> {
        match self {
            QueryExpr::Source { .. } => None,
            QueryExpr::Filter { source, .. }
            | QueryExpr::Select { source, .. }
            | QueryExpr::OrderBy { source, .. }
            | QueryExpr::Include { source, .. }
            | QueryExpr::Take { source, .. }
            | QueryExpr::Skip { source, .. }
            | QueryExpr::Reduce { source, .. }
            | QueryExpr::Tag { source, .. }
            | QueryExpr::AsNoTracking { source } => Some(source),
        }
    }
}

/// Fluent builder over [`QueryExpr`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query(QueryExpr);

impl Query {
    /// Start a query over an entity set.
    pub fn from(entity: impl Into<String>) -> Self {
        Query(QueryExpr::Source {
            entity: entity.into(),
        })
    }

    /// Add a filter predicate.
    pub fn filter(self, predicate: ScalarExpr) -> Self {
        Query(QueryExpr::Filter {
            source: Box::new(self.0),
            predicate,
        })
    }

    /// Project named scalar fields.
    pub fn select(self, fields: Vec<ProjectedField>) -> Self {
        Query(QueryExpr::Select {
            source: Box::new(self.0),
            projection: Projection::Fields(fields),
        })
    }

    /// Start a fresh primary ordering chain.
    pub fn order_by(self, key: ScalarExpr, direction: OrderDirection) -> Self {
        Query(QueryExpr::OrderBy {
            source: Box::new(self.0),
            key,
            direction,
            append: false,
        })
    }

    /// Extend the pending ordering chain.
    pub fn then_by(self, key: ScalarExpr, direction: OrderDirection) -> Self {
        Query(QueryExpr::OrderBy {
            source: Box::new(self.0),
            key,
            direction,
            append: true,
        })
    }

    /// Request eager loading of a dot-separated navigation path.
    pub fn include(self, path: &str) -> Self {
        Query(QueryExpr::Include {
            source: Box::new(self.0),
            path: split_path(path),
            extend_previous: false,
        })
    }

    /// Continue the most recent include path.
    pub fn then_include(self, path: &str) -> Self {
        Query(QueryExpr::Include {
            source: Box::new(self.0),
            path: split_path(path),
            extend_previous: true,
        })
    }

    /// Keep at most `count` rows.
    pub fn take(self, count: ScalarExpr) -> Self {
        Query(QueryExpr::Take {
            source: Box::new(self.0),
            count,
        })
    }

    /// Skip the first `count` rows.
    pub fn skip(self, count: ScalarExpr) -> Self {
        Query(QueryExpr::Skip {
            source: Box::new(self.0),
            count,
        })
    }

    /// Reduce to the first result (absence is an error).
    pub fn first(self) -> Self {
        self.reduce(CardinalityOp::First)
    }

    /// Reduce to the first result, if any.
    pub fn first_or_default(self) -> Self {
        self.reduce(CardinalityOp::FirstOrDefault)
    }

    /// Reduce to exactly one result.
    pub fn single(self) -> Self {
        self.reduce(CardinalityOp::Single)
    }

    /// Reduce to at most one result.
    pub fn single_or_default(self) -> Self {
        self.reduce(CardinalityOp::SingleOrDefault)
    }

    /// Apply a cardinality-reducing operator.
    pub fn reduce(self, op: CardinalityOp) -> Self {
        Query(QueryExpr::Reduce {
            source: Box::new(self.0),
            op,
        })
    }

    /// Attach a free-text annotation.
    pub fn tag(self, tag: impl Into<String>) -> Self {
        Query(QueryExpr::Tag {
            source: Box::new(self.0),
            tag: tag.into(),
        })
    }

    /// Compile without change tracking.
    pub fn as_no_tracking(self) -> Self {
        Query(QueryExpr::AsNoTracking {
            source: Box::new(self.0),
        })
    }

    /// Finish building.
    pub fn build(self) -> QueryExpr {
        self.0
    }
}

impl From<Query> for QueryExpr {
    fn from(query: Query) -> Self {
        query.0
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}
