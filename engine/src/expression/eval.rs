//! Tree-walking evaluator.

use super::{
    ast::{BinaryOp, Expr, UnaryOp},
    context::Context,
    functions,
    value::{Value, ValueType},
};
use crate::error::ExpressionError;
use std::cmp::Ordering;

pub type EvalResult = Result<Value, ExpressionError>;

pub fn eval(expr: &Expr, ctx: &Context) -> EvalResult {
    match expr {
        Expr::Number { value } => Ok(Value::Number(*value)),
        Expr::Text { value } => Ok(Value::Text(value.clone())),
        Expr::Bool { value } => Ok(Value::Bool(*value)),
        Expr::Null => Ok(Value::Null),
        Expr::Variable(var) => ctx.resolve(var),
        Expr::Unary { op, operand } => unary(*op, eval(operand, ctx)?, ctx),
        Expr::Binary { op, left, right } => binary(*op, left, right, ctx),
        Expr::Call { function, args } => functions::call(*function, args, ctx),
    }
}

/// Number operand; null becomes `0.0` only when the context asks for it.
pub(super) fn number(value: &Value, ctx: &Context) -> Result<Option<f64>, ExpressionError> {
    if ctx.default_on_null {
        value.to_number_or_zero().map(Some)
    } else {
        value.to_number()
    }
}

fn boolean(value: &Value, ctx: &Context) -> Result<Option<bool>, ExpressionError> {
    match value.to_bool()? {
        None if ctx.default_on_null => Ok(Some(false)),
        other => Ok(other),
    }
}

fn unary(op: UnaryOp, operand: Value, ctx: &Context) -> EvalResult {
    match op {
        UnaryOp::Negate => Ok(number(&operand, ctx)?.map(|n| -n).into()),
        UnaryOp::Not => Ok(boolean(&operand, ctx)?.map(|b| !b).into()),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &Context) -> EvalResult {
    match op {
        BinaryOp::And => {
            let l = boolean(&eval(left, ctx)?, ctx)?;
            if l == Some(false) {
                return Ok(Value::Bool(false));
            }
            let r = boolean(&eval(right, ctx)?, ctx)?;
            Ok(match (l, r) {
                (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            })
        }
        BinaryOp::Or => {
            let l = boolean(&eval(left, ctx)?, ctx)?;
            if l == Some(true) {
                return Ok(Value::Bool(true));
            }
            let r = boolean(&eval(right, ctx)?, ctx)?;
            Ok(match (l, r) {
                (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => {
            compare(op, &eval(left, ctx)?, &eval(right, ctx)?)
        }
        BinaryOp::Add
        | BinaryOp::Sub
        | BinaryOp::Mul
        | BinaryOp::Div
        | BinaryOp::Mod
        | BinaryOp::Pow => {
            let l = number(&eval(left, ctx)?, ctx)?;
            let r = number(&eval(right, ctx)?, ctx)?;
            let (Some(l), Some(r)) = (l, r) else {
                return Ok(Value::Null);
            };
            Ok(arithmetic(op, l, r).into())
        }
    }
}

fn arithmetic(op: BinaryOp, l: f64, r: f64) -> Option<f64> {
    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div if r == 0.0 => return None,
        BinaryOp::Div => l / r,
        BinaryOp::Mod if r == 0.0 => return None,
        BinaryOp::Mod => l % r,
        BinaryOp::Pow => l.powf(r),
        _ => return None,
    };
    result.is_finite().then_some(result)
}

/// Compare two values, casting the right side to the type of the left.
fn compare(op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
    let Some(target) = left.value_type() else {
        return Ok(null_comparison(op, right.is_null()));
    };
    let right = right.cast(target)?;
    if right.is_null() {
        return Ok(null_comparison(op, false));
    }

    let ordering = match (left, &right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Err(ExpressionError::Cast {
            expected: target.name(),
        });
    };

    let result = match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Ge => ordering != Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        _ => return Err(ExpressionError::Cast { expected: ValueType::Boolean.name() }),
    };
    Ok(Value::Bool(result))
}

/// Equality against null is decidable; ordering is not.
fn null_comparison(op: BinaryOp, both_null: bool) -> Value {
    match op {
        BinaryOp::Eq => Value::Bool(both_null),
        BinaryOp::Ne => Value::Bool(!both_null),
        _ => Value::Null,
    }
}
