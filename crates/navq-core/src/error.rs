//! Core error types.

use thiserror::Error;

/// Compilation and execution errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The expression grammar contains a construct the expansion pass cannot
    /// rewrite.
    #[error("unsupported query shape: {0}")]
    UnsupportedQueryShape(String),

    /// A path names a navigation absent from the model.
    #[error("unknown navigation '{navigation}' on entity '{entity}'")]
    UnknownNavigation {
        /// The entity the navigation was looked up on.
        entity: String,
        /// The missing navigation name.
        navigation: String,
    },

    /// The query references an entity type absent from the model.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A terminal field is absent from its entity.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField {
        /// The entity the field was looked up on.
        entity: String,
        /// The missing field name.
        field: String,
    },

    /// A runtime-parameter extractor violates the single
    /// execution-context-argument contract.
    #[error("invalid runtime parameter extractor: {0}")]
    InvalidRuntimeParameterExtractor(String),

    /// Merging include trees found conflicting entity types for one
    /// navigation key. Internal-consistency fault under a validated model.
    #[error("ambiguous include merge on navigation '{navigation}': '{existing}' vs '{incoming}'")]
    AmbiguousIncludeMerge {
        /// The conflicting navigation key.
        navigation: String,
        /// Entity type already recorded.
        existing: String,
        /// Entity type being merged in.
        incoming: String,
    },

    /// A materialized value cannot be cast to the navigation's declared
    /// relation type at fixup time. Fatal for the invocation; the engine
    /// drops the cached plan.
    #[error("materialization type mismatch on navigation '{navigation}': expected '{expected}', got '{actual}'")]
    MaterializationTypeMismatch {
        /// The navigation being fixed up.
        navigation: String,
        /// The declared relation type.
        expected: String,
        /// The actual materialized type.
        actual: String,
    },

    /// Parameter-store contract violation (duplicate add, absent replace or
    /// remove, missing value at evaluation time).
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Record not found.
    #[error("record not found")]
    NotFound,
}
