//! Core type definitions for the model.

use serde::{Deserialize, Serialize};

/// Scalar data types declared by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

/// Field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An optional scalar value (nullable).
    OptionalScalar(ScalarType),
}

impl FieldType {
    /// Whether the field admits null.
    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::OptionalScalar(_))
    }

    /// The underlying scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) => *s,
        }
    }
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float32 | ScalarType::Float64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_nullability() {
        assert!(FieldType::OptionalScalar(ScalarType::String).is_nullable());
        assert!(!FieldType::Scalar(ScalarType::String).is_nullable());
        assert_eq!(
            FieldType::OptionalScalar(ScalarType::Int32).scalar_type(),
            ScalarType::Int32
        );
    }

    #[test]
    fn test_numeric_types() {
        assert!(ScalarType::Int64.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
    }
}
