//! Variable values supplied to an evaluation.

use super::{
    ast::VariableRef,
    value::{Value, ValueType},
};
use crate::error::ExpressionError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value of a program rule variable.
///
/// `value` is the current value as text; `candidates` holds every value
/// the variable took across events, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRuleValue {
    #[serde(default)]
    pub value: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<NaiveDate>,
}

impl ProgramRuleValue {
    pub fn new(value: impl Into<String>, value_type: ValueType) -> Self {
        let value = value.into();
        Self {
            candidates: vec![value.clone()],
            value: Some(value),
            value_type,
            event_date: None,
        }
    }

    /// A variable with no value.
    pub fn empty(value_type: ValueType) -> Self {
        Self {
            value: None,
            value_type,
            candidates: Vec::new(),
            event_date: None,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    /// The current value, typed.
    pub fn current(&self) -> Result<Value, ExpressionError> {
        match &self.value {
            None => Ok(Value::Null),
            Some(text) if text.is_empty() => Ok(Value::Null),
            Some(text) if self.value_type == ValueType::Boolean => {
                Ok(Value::Bool(text.eq_ignore_ascii_case("true")))
            }
            Some(text) => Value::Text(text.clone()).cast(self.value_type),
        }
    }
}

/// Either a plain value or a structured program rule value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Rule(ProgramRuleValue),
    Plain(Value),
}

impl VariableValue {
    pub fn current(&self) -> Result<Value, ExpressionError> {
        match self {
            VariableValue::Plain(value) => Ok(value.clone()),
            VariableValue::Rule(rule) => rule.current(),
        }
    }

    /// Number of values the variable holds.
    pub fn count(&self) -> usize {
        match self {
            VariableValue::Plain(Value::Null) => 0,
            VariableValue::Plain(Value::Text(s)) if s.is_empty() => 0,
            VariableValue::Plain(_) => 1,
            VariableValue::Rule(rule) => rule.candidates.len(),
        }
    }
}

impl From<Value> for VariableValue {
    fn from(value: Value) -> Self {
        VariableValue::Plain(value)
    }
}

macro_rules! plain_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for VariableValue {
            fn from(value: $ty) -> Self {
                VariableValue::Plain(value.into())
            }
        })*
    };
}

plain_from!(f64, bool, &str, String, NaiveDate);

impl From<ProgramRuleValue> for VariableValue {
    fn from(value: ProgramRuleValue) -> Self {
        VariableValue::Rule(value)
    }
}

/// Variables and options for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    pub variables: HashMap<String, VariableValue>,
    /// Read null as `0` in arithmetic and `false` in logic
    pub default_on_null: bool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<VariableValue>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn default_on_null(mut self, enabled: bool) -> Self {
        self.default_on_null = enabled;
        self
    }

    /// Find a variable by its written form (`#{abc}`) or by its bare name.
    pub fn get(&self, var: &VariableRef) -> Option<&VariableValue> {
        self.variables
            .get(&var.token())
            .or_else(|| self.variables.get(&var.name))
    }

    /// The current value of a variable. An unknown variable is an error.
    pub fn resolve(&self, var: &VariableRef) -> Result<Value, ExpressionError> {
        self.get(var)
            .ok_or_else(|| ExpressionError::MissingValue(var.token()))?
            .current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ast::VariableKind;

    fn var(kind: VariableKind, name: &str) -> VariableRef {
        VariableRef {
            kind,
            name: name.into(),
        }
    }

    #[test]
    fn lookup_by_token_then_name() {
        let ctx = Context::new()
            .with("#{weight}", 70.0)
            .with("height", "1.8");
        assert_eq!(
            ctx.resolve(&var(VariableKind::DataItem, "weight")).unwrap(),
            Value::Number(70.0)
        );
        assert_eq!(
            ctx.resolve(&var(VariableKind::Attribute, "height")).unwrap(),
            Value::from("1.8")
        );
        assert_eq!(
            ctx.resolve(&var(VariableKind::Plain, "age")),
            Err(ExpressionError::MissingValue("age".into()))
        );
    }

    #[test]
    fn rule_values_are_typed() {
        let weight = ProgramRuleValue::new("72.5", ValueType::Number);
        assert_eq!(weight.current().unwrap(), Value::Number(72.5));

        let flag = ProgramRuleValue::new("true", ValueType::Boolean);
        assert_eq!(flag.current().unwrap(), Value::Bool(true));

        let empty = ProgramRuleValue::empty(ValueType::Text);
        assert_eq!(empty.current().unwrap(), Value::Null);

        let bad = ProgramRuleValue::new("heavy", ValueType::Number);
        assert!(matches!(bad.current(), Err(ExpressionError::NumberParse(_))));
    }

    #[test]
    fn counts() {
        let rule = ProgramRuleValue::new("a", ValueType::Text)
            .with_candidates(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(VariableValue::from(rule).count(), 3);
        assert_eq!(VariableValue::from(Value::Null).count(), 0);
        assert_eq!(VariableValue::from(1.0).count(), 1);
    }

    #[test]
    fn context_from_json() {
        let ctx: Context = serde_json::from_str(
            r#"{
                "variables": {
                    "a": 3,
                    "b": {"value": "2020-01-01", "valueType": "Date"}
                },
                "defaultOnNull": true
            }"#,
        )
        .unwrap();
        assert!(ctx.default_on_null);
        assert_eq!(
            ctx.resolve(&var(VariableKind::Plain, "b")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
        );
    }
}
