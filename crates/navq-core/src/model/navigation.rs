//! Navigation definitions between entities.

use serde::{Deserialize, Serialize};

/// The shape of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationKind {
    /// A single related entity.
    Reference,
    /// A set of related entities.
    Collection,
}

/// A navigation definition from one entity type to another.
///
/// The join condition is an equi-join between `from_field` on the source and
/// `to_field` on the target. Target-type and inverse resolution against this
/// metadata is a static lookup, never inferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationDef {
    /// Navigation name (unique within the source entity).
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Reference or collection.
    pub kind: NavigationKind,
    /// Join field on the source entity.
    pub from_field: String,
    /// Join field on the target entity.
    pub to_field: String,
    /// Name of the inverse navigation on the target entity, if declared.
    pub inverse: Option<String>,
    /// Whether the relationship is optional (nullable path, left join).
    pub optional: bool,
}

impl NavigationDef {
    /// Create a reference navigation.
    pub fn reference(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            kind: NavigationKind::Reference,
            from_field: from_field.into(),
            to_field: to_field.into(),
            inverse: None,
            optional: false,
        }
    }

    /// Create a collection navigation.
    pub fn collection(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        from_field: impl Into<String>,
        to_entity: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            kind: NavigationKind::Collection,
            from_field: from_field.into(),
            to_field: to_field.into(),
            inverse: None,
            optional: false,
        }
    }

    /// Declare the inverse navigation on the target entity.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Mark the relationship optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Check if this is a collection navigation.
    pub fn is_collection(&self) -> bool {
        self.kind == NavigationKind::Collection
    }
}
