//! Condition evaluation — a small expression language over event payloads.
//!
//! ```text
//! event.amount > 100 && event.to == "NdUL5oDPD159KeFpD5A9zw5xNF1xLX6nLT"
//! startsWith(lower(event.memo), "gm") || "vip" in event.tags
//! ```
//!
//! Conditions are evaluated with the context `{ "event": <event data> }`.

mod eval;
mod lexer;
mod parser;

use ledgerclaw_core::EvaluationError;
use ledgerclaw_core::traits::ConditionEvaluator;
use serde_json::{Map, Value};

/// The built-in evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        Self
    }
}

/// Map a comparison operator name to the expression it builds.
fn comparison_template(operator: &str) -> Option<(&'static str, bool)> {
    // (token, is_function)
    Some(match operator {
        "eq" | "==" => ("==", false),
        "ne" | "!=" => ("!=", false),
        "gt" | ">" => (">", false),
        "gte" | ">=" => (">=", false),
        "lt" | "<" => ("<", false),
        "lte" | "<=" => ("<=", false),
        "contains" => ("contains", true),
        "startsWith" => ("startsWith", true),
        "endsWith" => ("endsWith", true),
        _ => return None,
    })
}

/// Render a JSON value as an expression literal.
fn literal(value: &Value) -> Result<String, EvaluationError> {
    match value {
        Value::Object(_) => Err(EvaluationError::Type(
            "object literals are not supported in comparisons".into(),
        )),
        other => serde_json::to_string(other).map_err(|e| EvaluationError::Type(e.to_string())),
    }
}

fn require_bool(value: Value) -> Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvaluationError::NonBooleanResult(other.to_string())),
    }
}

impl ConditionEvaluator for ExprEvaluator {
    fn evaluate(&self, expression: &str, context: &Map<String, Value>) -> Result<Value, EvaluationError> {
        let expr = parser::parse(expression)?;
        let result = eval::eval(&expr, context)?;
        tracing::debug!(condition = expression, result = %result, "Evaluated condition");
        Ok(result)
    }

    fn evaluate_comparison(
        &self,
        field: &str,
        operator: &str,
        value: &Value,
        context: &Map<String, Value>,
    ) -> Result<bool, EvaluationError> {
        let (token, is_function) = comparison_template(operator)
            .ok_or_else(|| EvaluationError::UnsupportedOperator(operator.to_string()))?;
        let literal = literal(value)?;
        let expression = if is_function {
            format!("{token}(event.{field}, {literal})")
        } else {
            format!("event.{field} {token} {literal}")
        };
        require_bool(self.evaluate(&expression, context)?)
    }

    fn evaluate_multiple(
        &self,
        conditions: &[String],
        connective: &str,
        context: &Map<String, Value>,
    ) -> Result<bool, EvaluationError> {
        let is_and = match connective.to_ascii_lowercase().as_str() {
            "and" | "&&" => true,
            "or" | "||" => false,
            _ => return Err(EvaluationError::UnsupportedConnective(connective.to_string())),
        };
        if conditions.is_empty() {
            return Ok(true);
        }

        // parse everything up front so syntax errors surface regardless of short-circuit
        let parsed = conditions
            .iter()
            .map(|c| parser::parse(c))
            .collect::<Result<Vec<_>, _>>()?;

        for expr in &parsed {
            let holds = require_bool(eval::eval(expr, context)?)?;
            if holds != is_and {
                return Ok(holds);
            }
        }
        Ok(is_and)
    }
}

/// Whether `condition` holds for `context`; an empty condition always holds.
pub fn condition_holds(
    evaluator: &dyn ConditionEvaluator,
    condition: &str,
    context: &Map<String, Value>,
) -> Result<bool, EvaluationError> {
    if condition.trim().is_empty() {
        return Ok(true);
    }
    require_bool(evaluator.evaluate(condition, context)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(data: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("event".into(), data);
        map
    }

    #[test]
    fn test_comparison_operators() {
        let ev = ExprEvaluator::new();
        let c = ctx(json!({"amount": 150, "symbol": "GAS", "to": "NdUL5oDP"}));
        let cases = [
            ("amount", "eq", json!(150), true),
            ("amount", "==", json!(150), true),
            ("amount", "ne", json!(150), false),
            ("amount", "gt", json!(100), true),
            ("amount", "gte", json!(150), true),
            ("amount", "lt", json!(100), false),
            ("amount", "lte", json!(149.5), false),
            ("symbol", "eq", json!("GAS"), true),
            ("symbol", "contains", json!("A"), true),
            ("to", "startsWith", json!("Nd"), true),
            ("to", "endsWith", json!("Nd"), false),
        ];
        for (field, op, value, expected) in cases {
            assert_eq!(
                ev.evaluate_comparison(field, op, &value, &c).unwrap(),
                expected,
                "{field} {op} {value}"
            );
        }
    }

    #[test]
    fn test_comparison_quotes_string_literals() {
        let ev = ExprEvaluator::new();
        let c = ctx(json!({"memo": "say \"hi\""}));
        assert!(ev
            .evaluate_comparison("memo", "eq", &json!("say \"hi\""), &c)
            .unwrap());
    }

    #[test]
    fn test_unsupported_operator() {
        let ev = ExprEvaluator::new();
        let err = ev
            .evaluate_comparison("amount", "matches", &json!(1), &ctx(json!({"amount": 1})))
            .unwrap_err();
        assert_eq!(err, EvaluationError::UnsupportedOperator("matches".into()));
    }

    #[test]
    fn test_multiple_connectives() {
        let ev = ExprEvaluator::new();
        let c = ctx(json!({"amount": 150}));
        let both = vec!["event.amount > 100".to_string(), "event.amount < 200".to_string()];
        let one = vec!["event.amount > 1000".to_string(), "event.amount < 200".to_string()];

        assert!(ev.evaluate_multiple(&both, "and", &c).unwrap());
        assert!(!ev.evaluate_multiple(&one, "AND", &c).unwrap());
        assert!(ev.evaluate_multiple(&one, "Or", &c).unwrap());
        assert!(ev.evaluate_multiple(&[], "and", &c).unwrap());
        assert!(ev.evaluate_multiple(&[], "or", &c).unwrap());
        assert_eq!(
            ev.evaluate_multiple(&both, "xor", &c).unwrap_err(),
            EvaluationError::UnsupportedConnective("xor".into())
        );
    }

    #[test]
    fn test_multiple_reports_syntax_errors_after_short_circuit_point() {
        let ev = ExprEvaluator::new();
        let c = ctx(json!({"amount": 150}));
        let conditions = vec!["event.amount > 100".to_string(), "event.amount >".to_string()];
        assert!(matches!(
            ev.evaluate_multiple(&conditions, "or", &c),
            Err(EvaluationError::Syntax { .. })
        ));
    }

    #[test]
    fn test_non_boolean_results() {
        let ev = ExprEvaluator::new();
        let c = ctx(json!({"amount": 150}));
        assert!(matches!(
            condition_holds(&ev, "event.amount + 1", &c),
            Err(EvaluationError::NonBooleanResult(_))
        ));
        assert!(matches!(
            ev.evaluate_multiple(&["event.amount".to_string()], "and", &c),
            Err(EvaluationError::NonBooleanResult(_))
        ));
        assert!(condition_holds(&ev, "  ", &c).unwrap());
        assert_eq!(ev.evaluate("event.amount * 2", &c).unwrap(), json!(300));
    }
}
