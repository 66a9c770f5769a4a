//! Validation rules and program indicators.
//!
//! Both are thin layers over the expression engine: a validation rule
//! compares two expressions, an indicator evaluates one expression behind an
//! optional filter.

use crate::{
    error::Result,
    expression::{evaluate_str, round_to, Context, Expression, Value},
    Uid,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do when a side of a rule references missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingValueStrategy {
    /// Missing values count as zero
    NeverSkip,
    #[default]
    SkipIfAnyValueMissing,
    SkipIfAllValuesMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRuleOperator {
    EqualTo,
    NotEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    /// Both sides have a value or neither does
    CompulsoryPair,
    /// At most one side has a value
    ExclusivePair,
}

impl ValidationRuleOperator {
    /// Compare two side values. `None` for the pair operators, which test
    /// presence instead of value.
    pub fn compare(self, left: f64, right: f64) -> Option<bool> {
        Some(match self {
            ValidationRuleOperator::EqualTo => left == right,
            ValidationRuleOperator::NotEqualTo => left != right,
            ValidationRuleOperator::GreaterThan => left > right,
            ValidationRuleOperator::GreaterThanOrEqualTo => left >= right,
            ValidationRuleOperator::LessThan => left < right,
            ValidationRuleOperator::LessThanOrEqualTo => left <= right,
            ValidationRuleOperator::CompulsoryPair | ValidationRuleOperator::ExclusivePair => {
                return None
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSide {
    pub expression: String,
    #[serde(default)]
    pub missing_value_strategy: MissingValueStrategy,
}

impl RuleSide {
    pub fn new(expression: impl Into<String>, missing_value_strategy: MissingValueStrategy) -> Self {
        Self {
            expression: expression.into(),
            missing_value_strategy,
        }
    }

    /// Value of this side, or `None` when the strategy says to skip.
    pub fn value(&self, ctx: &Context) -> Result<Option<f64>> {
        let expression = Expression::parse(&self.expression)?;
        let variables = expression.variables();

        let mut filled = ctx.clone().default_on_null(true);
        let mut missing = 0;
        for var in &variables {
            let absent = match ctx.get(var) {
                Some(value) => matches!(value.current()?, Value::Null),
                None => true,
            };
            if absent {
                missing += 1;
                filled.set(var.token(), Value::Null);
            }
        }

        let skip = match self.missing_value_strategy {
            MissingValueStrategy::NeverSkip => false,
            MissingValueStrategy::SkipIfAnyValueMissing => missing > 0,
            MissingValueStrategy::SkipIfAllValuesMissing => {
                !variables.is_empty() && missing == variables.len()
            }
        };
        if skip {
            return Ok(None);
        }

        Ok(expression.evaluate(&filled)?.to_number()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    pub uid: Uid,
    #[serde(default)]
    pub name: String,
    pub left: RuleSide,
    pub operator: ValidationRuleOperator,
    pub right: RuleSide,
}

/// A rule that failed, with the values of both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule: Uid,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

impl ValidationRule {
    /// Evaluate both sides and report a violation, if any.
    pub fn check(&self, ctx: &Context) -> Result<Option<Violation>> {
        let left = self.left.value(ctx)?;
        let right = self.right.value(ctx)?;
        let violated = self.is_violation(left, right);
        debug!(rule = %self.uid, ?left, ?right, violated, "validation rule evaluated");
        Ok(violated.then(|| Violation {
            rule: self.uid.clone(),
            left,
            right,
        }))
    }

    /// Whether the side values break the rule.
    pub fn is_violation(&self, left: Option<f64>, right: Option<f64>) -> bool {
        match self.operator {
            ValidationRuleOperator::CompulsoryPair => return left.is_some() != right.is_some(),
            ValidationRuleOperator::ExclusivePair => return left.is_some() && right.is_some(),
            _ => {}
        }

        let resolve = |value: Option<f64>, side: &RuleSide| match value {
            Some(v) => Some(v),
            None if side.missing_value_strategy == MissingValueStrategy::NeverSkip => Some(0.0),
            None => None,
        };
        match (resolve(left, &self.left), resolve(right, &self.right)) {
            (Some(left), Some(right)) => self.operator.compare(left, right) == Some(false),
            _ => false,
        }
    }
}

/// Evaluate every rule and collect the violations.
pub fn validate(rules: &[ValidationRule], ctx: &Context) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for rule in rules {
        if let Some(violation) = rule.check(ctx)? {
            violations.push(violation);
        }
    }
    Ok(violations)
}

/// An aggregate computed from program data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramIndicator {
    pub uid: Uid,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

impl ProgramIndicator {
    /// The indicator value, or `None` when the filter excludes the data or
    /// the expression has no value.
    pub fn evaluate(&self, ctx: &Context) -> Result<Option<f64>> {
        if let Some(filter) = &self.filter {
            if evaluate_str(filter, ctx)?.to_bool()? != Some(true) {
                return Ok(None);
            }
        }
        let value = evaluate_str(&self.expression, ctx)?.to_number()?;
        Ok(value.map(|v| match self.decimals {
            Some(decimals) => round_to(v, decimals as i32),
            None => v,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn rule(operator: ValidationRuleOperator, left: MissingValueStrategy, right: MissingValueStrategy) -> ValidationRule {
        ValidationRule {
            uid: "vr1".into(),
            name: "ANC 1 >= ANC 2".into(),
            left: RuleSide::new("#{anc1}", left),
            operator,
            right: RuleSide::new("#{anc2}", right),
        }
    }

    #[test]
    fn comparison_rules() {
        let r = rule(
            ValidationRuleOperator::GreaterThanOrEqualTo,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        let ok = Context::new().with("#{anc1}", 10.0).with("#{anc2}", 8.0);
        assert_eq!(r.check(&ok).unwrap(), None);

        let bad = Context::new().with("#{anc1}", 3.0).with("#{anc2}", 8.0);
        assert_eq!(
            r.check(&bad).unwrap(),
            Some(Violation {
                rule: "vr1".into(),
                left: Some(3.0),
                right: Some(8.0)
            })
        );
    }

    #[test]
    fn missing_values() {
        let never = rule(
            ValidationRuleOperator::GreaterThan,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        // Missing left reads as zero: 0 > 5 fails.
        let ctx = Context::new().with("#{anc2}", 5.0);
        assert!(never.check(&ctx).unwrap().is_some());

        let skip = rule(
            ValidationRuleOperator::GreaterThan,
            MissingValueStrategy::SkipIfAnyValueMissing,
            MissingValueStrategy::NeverSkip,
        );
        assert!(skip.check(&ctx).unwrap().is_none());
    }

    #[test]
    fn skip_if_all_missing() {
        let side = RuleSide::new("#{a} + #{b}", MissingValueStrategy::SkipIfAllValuesMissing);
        assert_eq!(side.value(&Context::new()).unwrap(), None);
        assert_eq!(
            side.value(&Context::new().with("#{a}", 2.0)).unwrap(),
            Some(2.0)
        );
    }

    #[test]
    fn pair_operators() {
        let compulsory = rule(
            ValidationRuleOperator::CompulsoryPair,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        assert!(compulsory.is_violation(Some(1.0), None));
        assert!(!compulsory.is_violation(None, None));
        assert!(!compulsory.is_violation(Some(1.0), Some(2.0)));

        let exclusive = rule(
            ValidationRuleOperator::ExclusivePair,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        assert!(exclusive.is_violation(Some(1.0), Some(2.0)));
        assert!(!exclusive.is_violation(Some(1.0), None));
    }

    #[test]
    fn overflowing_values_compare_as_numbers() {
        let ctx = Context::new().with("#{anc1}", "1e400").with("#{anc2}", 5.0);

        let greater = rule(
            ValidationRuleOperator::GreaterThan,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        assert_eq!(greater.check(&ctx).unwrap(), None);

        let less = rule(
            ValidationRuleOperator::LessThan,
            MissingValueStrategy::NeverSkip,
            MissingValueStrategy::NeverSkip,
        );
        let violation = less.check(&ctx).unwrap().unwrap();
        assert_eq!(violation.left, Some(f64::INFINITY));
    }

    #[test]
    fn validate_collects_violations() {
        let rules = vec![
            rule(
                ValidationRuleOperator::EqualTo,
                MissingValueStrategy::NeverSkip,
                MissingValueStrategy::NeverSkip,
            ),
            ValidationRule {
                uid: "vr2".into(),
                ..rule(
                    ValidationRuleOperator::LessThanOrEqualTo,
                    MissingValueStrategy::NeverSkip,
                    MissingValueStrategy::NeverSkip,
                )
            },
        ];
        let ctx = Context::new().with("#{anc1}", 4.0).with("#{anc2}", 9.0);
        let violations = validate(&rules, &ctx).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "vr1");
    }

    #[test]
    fn rule_json() {
        let rule: ValidationRule = serde_json::from_str(
            r##"{
                "uid": "vr3",
                "left": {"expression": "#{a}", "missingValueStrategy": "NEVER_SKIP"},
                "operator": "less_than",
                "right": {"expression": "10"}
            }"##,
        )
        .unwrap();
        assert_eq!(rule.operator, ValidationRuleOperator::LessThan);
        assert_eq!(
            rule.right.missing_value_strategy,
            MissingValueStrategy::SkipIfAnyValueMissing
        );
    }

    #[test]
    fn indicators() {
        let bmi = ProgramIndicator {
            uid: "pi1".into(),
            expression: "#{weight} / (#{height} * #{height})".into(),
            filter: Some("#{height} > 0".into()),
            decimals: Some(1),
        };
        let ctx = Context::new().with("#{weight}", 70.0).with("#{height}", 1.75);
        assert_eq!(bmi.evaluate(&ctx).unwrap(), Some(22.9));

        let filtered = Context::new().with("#{weight}", 70.0).with("#{height}", 0.0);
        assert_eq!(bmi.evaluate(&filtered).unwrap(), None);

        let err = bmi.evaluate(&Context::new()).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
    }
}
