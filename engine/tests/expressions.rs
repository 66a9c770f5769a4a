//! Expression language through the public API.

use d2_engine::{
    evaluate,
    expression::{ProgramRuleValue, ValueType},
    validation::{MissingValueStrategy, RuleSide, ValidationRuleOperator},
    Context, Error, Expression, ExpressionError, ProgramIndicator, ValidationRule, Value,
};
use proptest::prelude::*;

fn expression_error(result: d2_engine::Result<Value>) -> ExpressionError {
    match result {
        Err(Error::Expression(err)) => err,
        other => panic!("expected an expression error, got {other:?}"),
    }
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn days_between_contract() {
    let ctx = Context::new();
    assert_eq!(
        evaluate("d2:daysBetween('2016-01-01', '2016-01-31')", &ctx).unwrap(),
        Value::Text("30".into())
    );
    assert!(matches!(
        expression_error(evaluate("d2:daysBetween('2016-01-01')", &ctx)),
        ExpressionError::ArgumentCount { expected: 2, found: 1, .. }
    ));
    assert!(matches!(
        expression_error(evaluate("d2:daysBetween('yesterday', 'today')", &ctx)),
        ExpressionError::DateParse(_)
    ));
}

#[test]
fn days_between_program_rule_variables() {
    let ctx = Context::new()
        .with(
            "#{enrollmentDate}",
            ProgramRuleValue::new("2020-01-01", ValueType::Date),
        )
        .with("V{current_date}", ProgramRuleValue::new("2020-03-01", ValueType::Date));

    assert_eq!(
        evaluate("d2:daysBetween(#{enrollmentDate}, V{current_date}) > 30", &ctx).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn unknown_function_is_rejected() {
    assert!(matches!(
        expression_error(evaluate("d2:zScoreWFA(1, 2, 3)", &Context::new())),
        ExpressionError::UnknownFunction(_)
    ));
}

// ============================================================================
// Operators and casting
// ============================================================================

#[test]
fn precedence() {
    let ctx = Context::new();
    assert_eq!(evaluate("1 + 2 * 3 ^ 2", &ctx).unwrap(), Value::Number(19.0));
    assert_eq!(evaluate("10 - 4 - 3", &ctx).unwrap(), Value::Number(3.0));
    assert_eq!(evaluate("!true || true", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(evaluate("1 + 1 == 2 && 3 > 2", &ctx).unwrap(), Value::Bool(true));
}

#[test]
fn malformed_input_is_a_parse_error() {
    let ctx = Context::new();
    for source in ["'unterminated", "1 +", "(1 + 2", "1 $ 2", ""] {
        assert!(
            matches!(expression_error(evaluate(source, &ctx)), ExpressionError::Parse { .. }),
            "{source}"
        );
    }
}

#[test]
fn numeric_operator_on_text() {
    let ctx = Context::new().with("#{name}", "Alice");
    assert_eq!(
        expression_error(evaluate("#{name} * 2", &ctx)),
        ExpressionError::NumberParse("Alice".into())
    );
    assert_eq!(
        evaluate("'12' * 2", &Context::new()).unwrap(),
        Value::Number(24.0)
    );
}

#[test]
fn casting_rules() {
    assert_eq!(Value::Number(30.0).cast(ValueType::Text).unwrap(), Value::Text("30".into()));
    assert!(matches!(
        Value::Number(1.0).cast(ValueType::Boolean),
        Err(ExpressionError::TypeMismatch { .. })
    ));
    assert!(matches!(
        Value::Bool(true).cast(ValueType::Number),
        Err(ExpressionError::TypeMismatch { .. })
    ));
    assert!(matches!(
        Value::Text("2020-13-45".into()).cast(ValueType::Date),
        Err(ExpressionError::DateParse(_))
    ));
    assert_eq!(Value::Text("x".into()).cast(ValueType::Text).unwrap(), Value::Text("x".into()));
    assert_eq!(Value::Null.cast(ValueType::Number).unwrap(), Value::Null);
}

#[test]
fn missing_values_and_default_on_null() {
    let ctx = Context::new().with("#{weight}", Value::Null);
    assert_eq!(evaluate("#{weight} + 5", &ctx).unwrap(), Value::Null);
    assert_eq!(
        evaluate("#{weight} + 5", &ctx.clone().default_on_null(true)).unwrap(),
        Value::Number(5.0)
    );
    assert!(matches!(
        expression_error(evaluate("#{height} + 5", &ctx)),
        ExpressionError::MissingValue(_)
    ));
}

proptest! {
    #[test]
    fn and_or_spellings_agree(a in any::<bool>(), b in any::<bool>()) {
        let ctx = Context::new().with("a", a).with("b", b);
        prop_assert_eq!(evaluate("a && b", &ctx).unwrap(), evaluate("a and b", &ctx).unwrap());
        prop_assert_eq!(evaluate("a || b", &ctx).unwrap(), evaluate("a or b", &ctx).unwrap());
        prop_assert_eq!(evaluate("a && b", &ctx).unwrap(), Value::Bool(a && b));
    }

    #[test]
    fn integer_arithmetic_matches_rust(a in -1_000i32..1_000, b in -1_000i32..1_000) {
        let ctx = Context::new().with("a", a as f64).with("b", b as f64);
        prop_assert_eq!(evaluate("a + b", &ctx).unwrap(), Value::Number((a + b) as f64));
        prop_assert_eq!(evaluate("a * b - a", &ctx).unwrap(), Value::Number((a * b - a) as f64));
        prop_assert_eq!(evaluate("a >= b", &ctx).unwrap(), Value::Bool(a >= b));
    }
}

// ============================================================================
// Parsed expressions
// ============================================================================

#[test]
fn parse_once_evaluate_many() {
    let bmi = Expression::parse("d2:round(#{weight} / (#{height} * #{height}), 1)").unwrap();
    assert_eq!(bmi.variables().len(), 2);

    let adult = Context::new().with("#{weight}", 70.0).with("#{height}", 1.75);
    let child = Context::new().with("#{weight}", 20.0).with("#{height}", 1.1);
    assert_eq!(bmi.evaluate(&adult).unwrap(), Value::Number(22.9));
    assert_eq!(bmi.evaluate(&child).unwrap(), Value::Number(16.5));
}

#[test]
fn parsed_tree_serializes() {
    let expr = Expression::parse("A{age} >= 18").unwrap();
    let json = serde_json::to_string(&expr).unwrap();
    let back: Expression = serde_json::from_str(&json).unwrap();
    assert_eq!(back, expr);
}

// ============================================================================
// Validation rules and indicators
// ============================================================================

#[test]
fn validation_rule_from_context() {
    let rule = ValidationRule {
        uid: "vr1".into(),
        name: "Doses given <= doses received".into(),
        left: RuleSide::new("#{given}", MissingValueStrategy::NeverSkip),
        operator: ValidationRuleOperator::LessThanOrEqualTo,
        right: RuleSide::new("#{received}", MissingValueStrategy::NeverSkip),
    };

    let ok = Context::new().with("#{given}", 10.0).with("#{received}", 12.0);
    assert!(rule.check(&ok).unwrap().is_none());

    let bad = Context::new().with("#{given}", 15.0).with("#{received}", 12.0);
    let violation = rule.check(&bad).unwrap().unwrap();
    assert_eq!(violation.left, Some(15.0));
    assert_eq!(violation.right, Some(12.0));
}

#[test]
fn indicator_with_filter() {
    let indicator = ProgramIndicator {
        uid: "pi1".into(),
        expression: "#{hb} * 10".into(),
        filter: Some("#{hb} < 11".into()),
        decimals: Some(0),
    };

    let anaemic = Context::new().with("#{hb}", 9.44);
    assert_eq!(indicator.evaluate(&anaemic).unwrap(), Some(94.0));

    let healthy = Context::new().with("#{hb}", 13.0);
    assert_eq!(indicator.evaluate(&healthy).unwrap(), None);
}
