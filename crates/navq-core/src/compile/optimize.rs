//! Pre-expansion normalization: constant folding over scalar expressions.

use navq_ir::{BinaryOp, QueryExpr, ScalarExpr, Value};

use crate::eval;

/// Fold literal-only subexpressions and simplify trivial logic.
pub fn normalize(expr: QueryExpr) -> QueryExpr {
    match expr {
        QueryExpr::Source { .. } => expr,
        QueryExpr::Filter { source, predicate } => QueryExpr::Filter {
            source: Box::new(normalize(*source)),
            predicate: fold_scalar(predicate),
        },
        QueryExpr::Select { source, projection } => QueryExpr::Select {
            source: Box::new(normalize(*source)),
            projection,
        },
        QueryExpr::OrderBy {
            source,
            key,
            direction,
            append,
        } => QueryExpr::OrderBy {
            source: Box::new(normalize(*source)),
            key: fold_scalar(key),
            direction,
            append,
        },
        QueryExpr::Include {
            source,
            path,
            extend_previous,
        } => QueryExpr::Include {
            source: Box::new(normalize(*source)),
            path,
            extend_previous,
        },
        QueryExpr::Take { source, count } => QueryExpr::Take {
            source: Box::new(normalize(*source)),
            count: fold_scalar(count),
        },
        QueryExpr::Skip { source, count } => QueryExpr::Skip {
            source: Box::new(normalize(*source)),
            count: fold_scalar(count),
        },
        QueryExpr::Reduce { source, op } => QueryExpr::Reduce {
            source: Box::new(normalize(*source)),
            op,
        },
        QueryExpr::Tag { source, tag } => QueryExpr::Tag {
            source: Box::new(normalize(*source)),
            tag,
        },
        QueryExpr::AsNoTracking { source } => QueryExpr::AsNoTracking {
            source: Box::new(normalize(*source)),
        },
    }
}

fn fold_scalar(expr: ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Unary { op, operand } => {
            let operand = fold_scalar(*operand);
            if let ScalarExpr::Literal(value) = &operand {
                if let Ok(folded) = eval::apply_unary(op, value.clone()) {
                    return ScalarExpr::Literal(folded);
                }
            }
            ScalarExpr::Unary {
                op,
                operand: Box::new(operand),
            }
        }
        ScalarExpr::Binary { op, left, right } => {
            let left = fold_scalar(*left);
            let right = fold_scalar(*right);
            match op {
                BinaryOp::And => fold_logic(op, left, right),
                BinaryOp::Or => fold_logic(op, left, right),
                _ => {
                    if let (ScalarExpr::Literal(a), ScalarExpr::Literal(b)) = (&left, &right) {
                        if let Ok(folded) = eval::apply_binary(op, a, b) {
                            return ScalarExpr::Literal(folded);
                        }
                    }
                    ScalarExpr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            }
        }
        other => other,
    }
}

fn fold_logic(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> ScalarExpr {
    let (absorbing, identity) = match op {
        BinaryOp::And => (false, true),
        BinaryOp::Or => (true, false),
        _ => unreachable!(),
    };

    if is_bool_literal(&left, absorbing) || is_bool_literal(&right, absorbing) {
        return ScalarExpr::Literal(Value::Bool(absorbing));
    }
    if is_bool_literal(&left, identity) {
        return right;
    }
    if is_bool_literal(&right, identity) {
        return left;
    }
    ScalarExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_bool_literal(expr: &ScalarExpr, expected: bool) -> bool {
    matches!(expr, ScalarExpr::Literal(Value::Bool(b)) if *b == expected)
}
