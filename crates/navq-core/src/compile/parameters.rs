//! Parameter extraction and extractor evaluation.
//!
//! Captured literals are extracted into ordinal parameters before cache
//! lookup, so queries differing only in literal values share one structural
//! shape. Extractors produce tier-2 and tier-3 parameter values from the
//! execution context at invocation time.

use std::fmt;
use std::sync::Arc;

use navq_ir::{QueryExpr, ScalarExpr, Value, ValueLambda};

use crate::error::Error;
use crate::eval::{self, EvalEnv};
use crate::execution::{ExecutionContext, ParameterStore};

/// A single-argument value extractor over the execution context.
#[derive(Clone)]
pub enum ParameterExtractor {
    /// IR-form lambda; arity is data and is validated at registration.
    Lambda(ValueLambda),
    /// Native extractor; arity is statically one.
    Func(Arc<dyn Fn(&ExecutionContext) -> Result<Value, Error> + Send + Sync>),
}

impl fmt::Debug for ParameterExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterExtractor::Lambda(lambda) => f.debug_tuple("Lambda").field(lambda).finish(),
            ParameterExtractor::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl ParameterExtractor {
    /// An extractor reading one ambient context value.
    pub fn from_context_value(name: impl Into<String>) -> Self {
        ParameterExtractor::Lambda(ValueLambda::unary(
            "ctx",
            ScalarExpr::ContextValue(name.into()),
        ))
    }

    /// A native extractor.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<Value, Error> + Send + Sync + 'static,
    {
        ParameterExtractor::Func(Arc::new(f))
    }

    /// Check the single execution-context-argument contract.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            ParameterExtractor::Lambda(lambda) if lambda.params.len() != 1 => {
                Err(Error::InvalidRuntimeParameterExtractor(format!(
                    "extractor must take exactly one execution-context argument, got {}",
                    lambda.params.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluate against the current execution context.
    pub fn evaluate(&self, ctx: &ExecutionContext) -> Result<Value, Error> {
        match self {
            ParameterExtractor::Lambda(lambda) => {
                eval::evaluate(&lambda.body, &ContextEnv { ctx })
            }
            ParameterExtractor::Func(f) => f(ctx),
        }
    }
}

/// Evaluation environment for extractor lambdas: only ambient context values
/// are in scope.
struct ContextEnv<'a> {
    ctx: &'a ExecutionContext,
}

impl EvalEnv for ContextEnv<'_> {
    fn column(&self, source: &str, field: &str) -> Result<Value, Error> {
        Err(Error::InvalidData(format!(
            "column '{source}.{field}' is not in scope for a parameter extractor"
        )))
    }

    fn parameter(&self, name: &str) -> Result<Value, Error> {
        Err(Error::Parameter(format!(
            "parameter '{name}' is not in scope for a parameter extractor"
        )))
    }

    fn context_value(&self, name: &str) -> Result<Value, Error> {
        self.ctx
            .context_value(name)
            .cloned()
            .ok_or_else(|| Error::Parameter(format!("context value '{name}' is absent")))
    }
}

/// Replace captured literals in value-bearing positions (filter predicates,
/// take/skip counts) with ordinal parameters, returning the normalized
/// expression and the captured values.
///
/// Extraction order is the deterministic source-first traversal, so two
/// queries of the same shape produce identical parameter names.
pub fn parameterize(expr: QueryExpr) -> (QueryExpr, ParameterStore) {
    let mut extractor = LiteralExtractor::default();
    let expr = extractor.rewrite_query(expr);
    (expr, extractor.captured)
}

#[derive(Default)]
struct LiteralExtractor {
    captured: ParameterStore,
    next: u32,
}

impl LiteralExtractor {
    fn rewrite_query(&mut self, expr: QueryExpr) -> QueryExpr {
        match expr {
            QueryExpr::Source { .. } => expr,
            QueryExpr::Filter { source, predicate } => QueryExpr::Filter {
                source: Box::new(self.rewrite_query(*source)),
                predicate: self.rewrite_scalar(predicate),
            },
            QueryExpr::Select { source, projection } => QueryExpr::Select {
                source: Box::new(self.rewrite_query(*source)),
                projection,
            },
            QueryExpr::OrderBy {
                source,
                key,
                direction,
                append,
            } => QueryExpr::OrderBy {
                source: Box::new(self.rewrite_query(*source)),
                key,
                direction,
                append,
            },
            QueryExpr::Include {
                source,
                path,
                extend_previous,
            } => QueryExpr::Include {
                source: Box::new(self.rewrite_query(*source)),
                path,
                extend_previous,
            },
            QueryExpr::Take { source, count } => QueryExpr::Take {
                source: Box::new(self.rewrite_query(*source)),
                count: self.rewrite_scalar(count),
            },
            QueryExpr::Skip { source, count } => QueryExpr::Skip {
                source: Box::new(self.rewrite_query(*source)),
                count: self.rewrite_scalar(count),
            },
            QueryExpr::Reduce { source, op } => QueryExpr::Reduce {
                source: Box::new(self.rewrite_query(*source)),
                op,
            },
            QueryExpr::Tag { source, tag } => QueryExpr::Tag {
                source: Box::new(self.rewrite_query(*source)),
                tag,
            },
            QueryExpr::AsNoTracking { source } => QueryExpr::AsNoTracking {
                source: Box::new(self.rewrite_query(*source)),
            },
        }
    }

    fn rewrite_scalar(&mut self, expr: ScalarExpr) -> ScalarExpr {
        match expr {
            ScalarExpr::Literal(value) => {
                let name = format!("@p{}", self.next);
                self.next += 1;
                // Ordinal names are fresh by construction.
                self.captured.upsert(name.clone(), value);
                ScalarExpr::Parameter(name)
            }
            ScalarExpr::Unary { op, operand } => ScalarExpr::Unary {
                op,
                operand: Box::new(self.rewrite_scalar(*operand)),
            },
            ScalarExpr::Binary { op, left, right } => {
                let left = Box::new(self.rewrite_scalar(*left));
                let right = Box::new(self.rewrite_scalar(*right));
                ScalarExpr::Binary { op, left, right }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navq_ir::{col, ctx_value, lit, Query};

    #[test]
    fn test_parameterize_extracts_filter_literals() {
        let (expr, captured) = parameterize(
            Query::from("User")
                .filter(col("age").gt(lit(30)))
                .take(lit(5))
                .build(),
        );

        assert_eq!(captured.len(), 2);
        assert_eq!(captured.get("@p0"), Some(&Value::Int32(30)));
        assert_eq!(captured.get("@p1"), Some(&Value::Int32(5)));

        // Same shape with different values normalizes identically.
        let (expr2, captured2) = parameterize(
            Query::from("User")
                .filter(col("age").gt(lit(40)))
                .take(lit(7))
                .build(),
        );
        assert_eq!(expr, expr2);
        assert_eq!(captured2.get("@p0"), Some(&Value::Int32(40)));
    }

    #[test]
    fn test_extractor_arity_validation() {
        let valid = ParameterExtractor::from_context_value("tenant");
        assert!(valid.validate().is_ok());

        let invalid = ParameterExtractor::Lambda(ValueLambda::new(
            ["ctx", "extra"],
            ctx_value("tenant"),
        ));
        assert!(matches!(
            invalid.validate(),
            Err(Error::InvalidRuntimeParameterExtractor(_))
        ));
    }

    #[test]
    fn test_lambda_extractor_reads_context() {
        let extractor = ParameterExtractor::from_context_value("tenant");
        let ctx = ExecutionContext::new().with_context_value("tenant", "acme");

        assert_eq!(
            extractor.evaluate(&ctx).unwrap(),
            Value::String("acme".into())
        );

        let empty = ExecutionContext::new();
        assert!(extractor.evaluate(&empty).is_err());
    }

    #[test]
    fn test_func_extractor() {
        let extractor = ParameterExtractor::func(|_| Ok(Value::Int32(7)));
        let ctx = ExecutionContext::new();
        assert_eq!(extractor.evaluate(&ctx).unwrap(), Value::Int32(7));
    }
}
