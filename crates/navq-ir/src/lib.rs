//! NAVQ query IR.
//!
//! This crate defines the declarative input of the NAVQ compiler: runtime
//! values, the scalar expression grammar, and the query-composition grammar.
//! It carries no compilation logic; the `navq-core` crate consumes these
//! trees and rewrites them into executable plans.

pub mod expr;
pub mod query;
pub mod value;

pub use expr::{col, ctx_value, lit, nav_col, param, BinaryOp, ScalarExpr, UnaryOp, ValueLambda};
pub use query::{
    CardinalityOp, OrderDirection, Projection, ProjectedField, Query, QueryExpr,
};
pub use value::Value;
