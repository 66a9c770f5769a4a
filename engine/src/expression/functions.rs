//! Built-in functions.

use super::{
    ast::{Expr, Function},
    context::Context,
    eval::{eval, number, EvalResult},
    value::Value,
};
use crate::error::ExpressionError;
use chrono::NaiveDate;

pub fn call(function: Function, args: &[Expr], ctx: &Context) -> EvalResult {
    match function {
        Function::DaysBetween => {
            arity(function, args, 2)?;
            Ok(match dates(&args[0], &args[1], ctx)? {
                Some((start, end)) => Value::Text((end - start).num_days().to_string()),
                None => Value::Text("0".into()),
            })
        }
        Function::WeeksBetween => {
            arity(function, args, 2)?;
            Ok(match dates(&args[0], &args[1], ctx)? {
                Some((start, end)) => Value::Text(((end - start).num_days() / 7).to_string()),
                None => Value::Text("0".into()),
            })
        }
        Function::Condition => {
            arity(function, args, 3)?;
            let test = eval(&args[0], ctx)?.to_bool()?.unwrap_or(false);
            eval(if test { &args[1] } else { &args[2] }, ctx)
        }
        Function::HasValue => {
            arity(function, args, 1)?;
            let present = match &args[0] {
                Expr::Variable(var) => match ctx.get(var) {
                    Some(value) => !is_empty(&value.current()?),
                    None => false,
                },
                other => !is_empty(&eval(other, ctx)?),
            };
            Ok(Value::Bool(present))
        }
        Function::Count => {
            arity(function, args, 1)?;
            let count = match &args[0] {
                Expr::Variable(var) => ctx.get(var).map_or(0, |v| v.count()),
                other => usize::from(!is_empty(&eval(other, ctx)?)),
            };
            Ok(Value::Number(count as f64))
        }
        Function::Ceil => rounding(function, args, ctx, f64::ceil),
        Function::Floor => rounding(function, args, ctx, f64::floor),
        Function::Round => {
            if args.is_empty() || args.len() > 2 {
                return Err(ExpressionError::ArgumentCount {
                    function: function.name().to_string(),
                    expected: 1,
                    found: args.len(),
                });
            }
            let Some(value) = number(&eval(&args[0], ctx)?, ctx)? else {
                return Ok(Value::Null);
            };
            let decimals = match args.get(1) {
                Some(arg) => number(&eval(arg, ctx)?, ctx)?.unwrap_or(0.0),
                None => 0.0,
            };
            Ok(Value::Number(round_to(value, decimals as i32)))
        }
        Function::Concatenate => {
            let mut joined = String::new();
            for arg in args {
                joined.push_str(&eval(arg, ctx)?.to_string());
            }
            Ok(Value::Text(joined))
        }
    }
}

/// Most decimal places `round_to` honours; an `f64` carries no more.
pub const MAX_DECIMALS: i32 = 15;

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if decimals <= 0 {
        return value.round();
    }
    let factor = 10f64.powi(decimals.min(MAX_DECIMALS));
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

fn arity(function: Function, args: &[Expr], expected: usize) -> Result<(), ExpressionError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExpressionError::ArgumentCount {
            function: function.name().to_string(),
            expected,
            found: args.len(),
        })
    }
}

/// Both arguments as dates, or `None` when either is empty.
fn dates(
    start: &Expr,
    end: &Expr,
    ctx: &Context,
) -> Result<Option<(NaiveDate, NaiveDate)>, ExpressionError> {
    let start = eval(start, ctx)?;
    let end = eval(end, ctx)?;
    if is_empty(&start) || is_empty(&end) {
        return Ok(None);
    }
    Ok(start.to_date()?.zip(end.to_date()?))
}

fn rounding(function: Function, args: &[Expr], ctx: &Context, op: fn(f64) -> f64) -> EvalResult {
    arity(function, args, 1)?;
    Ok(number(&eval(&args[0], ctx)?, ctx)?.map(op).into())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.is_empty(),
        _ => false,
    }
}
