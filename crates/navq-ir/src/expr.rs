//! Scalar expression grammar.
//!
//! Scalar expressions appear in filter predicates, ordering keys, projections,
//! and take/skip counts. Navigation traversals are written as `Column` paths
//! and rewritten into `BoundColumn` references by the compiler; user-built
//! queries never contain `BoundColumn` nodes directly.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Null test.
    IsNull,
    /// Inverted null test.
    IsNotNull,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
    /// String pattern match with `%` wildcards.
    Like,
}

/// A scalar expression over the current result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarExpr {
    /// A literal value. Literals in value-bearing positions are extracted
    /// into captured parameters before compilation.
    Literal(Value),
    /// A named parameter resolved from the execution's parameter store.
    Parameter(String),
    /// A field access, optionally through a chain of reference navigations
    /// (e.g. path `["author"]`, field `"name"` for `post.author.name`).
    Column {
        /// Navigation segments from the current row root.
        path: Vec<String>,
        /// Terminal field name.
        field: String,
    },
    /// A field access against an expanded source alias. Produced by the
    /// navigation-expansion pass; not part of the user-facing grammar.
    BoundColumn {
        /// Alias of the expanded source.
        source: String,
        /// Field name on that source.
        field: String,
    },
    /// An ambient value read from the execution context (e.g. the current
    /// tenant). Hoisted into a runtime parameter during compilation.
    ContextValue(String),
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<ScalarExpr>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<ScalarExpr>,
        /// Right operand.
        right: Box<ScalarExpr>,
    },
}

/// Create a literal expression.
pub fn lit(value: impl Into<Value>) -> ScalarExpr {
    ScalarExpr::Literal(value.into())
}

/// Create a named parameter reference.
pub fn param(name: impl Into<String>) -> ScalarExpr {
    ScalarExpr::Parameter(name.into())
}

/// Create a field access on the current entity.
pub fn col(field: impl Into<String>) -> ScalarExpr {
    ScalarExpr::Column {
        path: vec![],
        field: field.into(),
    }
}

/// Create a field access through a navigation path.
pub fn nav_col<P, S>(path: P, field: impl Into<String>) -> ScalarExpr
where
    P: IntoIterator<Item = S>,
    S: Into<String>,
{
    ScalarExpr::Column {
        path: path.into_iter().map(Into::into).collect(),
        field: field.into(),
    }
}

/// Create an ambient execution-context value reference.
pub fn ctx_value(name: impl Into<String>) -> ScalarExpr {
    ScalarExpr::ContextValue(name.into())
}

impl ScalarExpr {
    fn binary(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> ScalarExpr {
        ScalarExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `self == other`
    pub fn eq(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Eq, self, other)
    }

    /// `self != other`
    pub fn ne(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Ne, self, other)
    }

    /// `self < other`
    pub fn lt(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Lt, self, other)
    }

    /// `self <= other`
    pub fn le(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Le, self, other)
    }

    /// `self > other`
    pub fn gt(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Gt, self, other)
    }

    /// `self >= other`
    pub fn ge(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Ge, self, other)
    }

    /// `self AND other`
    pub fn and(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::And, self, other)
    }

    /// `self OR other`
    pub fn or(self, other: ScalarExpr) -> ScalarExpr {
        Self::binary(BinaryOp::Or, self, other)
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: impl Into<String>) -> ScalarExpr {
        Self::binary(BinaryOp::Like, self, lit(pattern.into()))
    }

    /// `NOT self`
    pub fn not(self) -> ScalarExpr {
        ScalarExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `self IS NULL`
    pub fn is_null(self) -> ScalarExpr {
        ScalarExpr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> ScalarExpr {
        ScalarExpr::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self),
        }
    }
}

/// A value-extractor lambda in IR form.
///
/// Used for parameter extractors: the declared parameter list is data, so the
/// compiler can check the one-argument (execution context) contract at
/// registration time. The body is evaluated against the execution context;
/// `ContextValue` nodes read the context's ambient values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueLambda {
    /// Declared parameter names.
    pub params: Vec<String>,
    /// The extractor body.
    pub body: ScalarExpr,
}

impl ValueLambda {
    /// Create a lambda with an explicit parameter list.
    pub fn new<P, S>(params: P, body: ScalarExpr) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body,
        }
    }

    /// Create a single-argument lambda over the execution context.
    pub fn unary(param: impl Into<String>, body: ScalarExpr) -> Self {
        Self {
            params: vec![param.into()],
            body,
        }
    }
}
