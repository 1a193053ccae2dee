//! Entity definitions.

use super::types::{FieldType, ScalarType};
use serde::{Deserialize, Serialize};

/// A field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name (unique within the entity).
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
}

impl FieldDef {
    /// Create a new field definition.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Create a required scalar field.
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::Scalar(scalar))
    }

    /// Create a nullable scalar field.
    pub fn optional(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::OptionalScalar(scalar))
    }
}

/// An entity definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the model).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Field definitions.
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: identity_field.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_field_lookup() {
        let entity = EntityDef::new("User", "id")
            .with_field(FieldDef::scalar("id", ScalarType::Uuid))
            .with_field(FieldDef::scalar("name", ScalarType::String))
            .with_field(FieldDef::optional("email", ScalarType::String));

        assert!(entity.get_field("name").is_some());
        assert!(entity.get_field("missing").is_none());
        assert_eq!(entity.get_identity_field().unwrap().name, "id");
        assert!(entity.get_field("email").unwrap().field_type.is_nullable());
    }
}
