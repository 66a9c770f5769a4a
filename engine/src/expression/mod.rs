//! Expression language for validation rules, program indicators and
//! program rules.
//!
//! Expressions are parsed once into an immutable tree and evaluated against
//! a [`Context`] holding variable values:
//!
//! ```
//! use d2_engine::expression::{Context, Expression, Value};
//!
//! let expr = Expression::parse("#{weight} / (#{height} ^ 2)").unwrap();
//! let ctx = Context::new().with("#{weight}", 80.0).with("#{height}", 2.0);
//! assert_eq!(expr.evaluate(&ctx).unwrap(), Value::Number(20.0));
//! ```

pub mod ast;
mod context;
mod eval;
mod functions;
mod lexer;
mod parser;
mod value;

pub use ast::{Expr, Function, VariableKind, VariableRef};
pub use context::{Context, ProgramRuleValue, VariableValue};
pub use functions::round_to;
pub use value::{parse_date, Value, ValueType};

use crate::error::{ExpressionError, Result};
use serde::{Deserialize, Serialize};

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> std::result::Result<Self, ExpressionError> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn evaluate(&self, ctx: &Context) -> std::result::Result<Value, ExpressionError> {
        eval::eval(&self.root, ctx)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Variables the expression reads, in order of first use.
    pub fn variables(&self) -> Vec<&VariableRef> {
        self.root.variables()
    }
}

/// Parse and evaluate in one step.
pub fn evaluate_str(source: &str, ctx: &Context) -> std::result::Result<Value, ExpressionError> {
    Expression::parse(source)?.evaluate(ctx)
}

/// Evaluate `expression`, reporting failures as engine errors.
pub fn evaluate(expression: &str, ctx: &Context) -> Result<Value> {
    Ok(evaluate_str(expression, ctx)?)
}
