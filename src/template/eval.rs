use super::ast::{BinaryOperator, Expression, UnaryOperator};
use super::context::Context;
use super::functions::FunctionRegistry;
use super::value::{as_i64, compare, float_value, is_truthy, values_equal};
use crate::error::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluates expressions against a context
///
/// Unknown names and missing attributes are `Error::Context`; operators on
/// mismatched types yield `null` or `false` instead of failing.
pub struct Evaluator<'r> {
    functions: &'r FunctionRegistry,
}

impl<'r> Evaluator<'r> {
    pub fn new(functions: &'r FunctionRegistry) -> Self {
        Self { functions }
    }

    /// Evaluate an expression to a value
    pub fn evaluate(&self, expr: &Expression, ctx: &Context<'_>) -> Result<Value> {
        match expr {
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Integer(n) => Ok(Value::from(*n)),
            Expression::Float(n) => Ok(float_value(*n)),
            Expression::Boolean(b) => Ok(Value::Bool(*b)),
            Expression::Null => Ok(Value::Null),

            Expression::Variable(name) => ctx
                .get(name)
                .cloned()
                .ok_or_else(|| Error::context(name.as_str())),

            Expression::PropertyAccess { object, property } => {
                let target = self.evaluate(object, ctx)?;
                attribute(&target, property).ok_or_else(|| Error::context(expr.to_string()))
            }

            Expression::Index { object, index } => {
                let target = self.evaluate(object, ctx)?;
                let key = self.evaluate(index, ctx)?;
                subscript(&target, &key).ok_or_else(|| Error::context(expr.to_string()))
            }

            Expression::Array(items) => {
                let values: Result<Vec<Value>> =
                    items.iter().map(|e| self.evaluate(e, ctx)).collect();
                Ok(Value::Array(values?))
            }

            Expression::FunctionCall { name, args } => {
                let values: Result<Vec<Value>> =
                    args.iter().map(|e| self.evaluate(e, ctx)).collect();
                self.functions.call(name, &values?)
            }

            // Short-circuit and return the deciding operand
            Expression::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } => {
                let left = self.evaluate(left, ctx)?;
                if is_truthy(&left) {
                    Ok(left)
                } else {
                    self.evaluate(right, ctx)
                }
            }
            Expression::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let left = self.evaluate(left, ctx)?;
                if is_truthy(&left) {
                    self.evaluate(right, ctx)
                } else {
                    Ok(left)
                }
            }

            Expression::BinaryOp { left, op, right } => {
                let left = self.evaluate(left, ctx)?;
                let right = self.evaluate(right, ctx)?;
                Ok(binary_op(&left, *op, &right))
            }

            Expression::UnaryOp { op, operand } => {
                let value = self.evaluate(operand, ctx)?;
                Ok(match op {
                    UnaryOperator::Not => Value::Bool(!is_truthy(&value)),
                    UnaryOperator::Minus => match &value {
                        Value::Number(n) => match n.as_i64() {
                            Some(i) => i.checked_neg().map(Value::from).unwrap_or(Value::Null),
                            None => n.as_f64().map(|f| float_value(-f)).unwrap_or(Value::Null),
                        },
                        _ => Value::Null,
                    },
                })
            }
        }
    }
}

/// `value.name`: object key, array index or `length`/`size`
fn attribute(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => match name {
            "length" | "size" => Some(Value::from(items.len())),
            _ => name.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        },
        Value::String(s) => match name {
            "length" | "size" => Some(Value::from(s.chars().count())),
            _ => None,
        },
        _ => None,
    }
}

/// `value[key]`; negative indexes count from the end
fn subscript(value: &Value, key: &Value) -> Option<Value> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned(),
        (Value::Array(items), key) => {
            let i = resolve_index(as_i64(key)?, items.len())?;
            items.get(i).cloned()
        }
        (Value::String(s), key) => {
            let count = s.chars().count();
            let i = resolve_index(as_i64(key)?, count)?;
            s.chars().nth(i).map(|c| Value::String(c.to_string()))
        }
        _ => None,
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    } else {
        usize::try_from(index).ok()
    }
}

fn contains(container: &Value, item: &Value) -> bool {
    match (container, item) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), item) => items.iter().any(|v| values_equal(v, item)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn binary_op(left: &Value, op: BinaryOperator, right: &Value) -> Value {
    let ordered = |accept: fn(Ordering) -> bool| {
        Value::Bool(compare(left, right).map(accept).unwrap_or(false))
    };

    match op {
        BinaryOperator::Equal => Value::Bool(values_equal(left, right)),
        BinaryOperator::NotEqual => Value::Bool(!values_equal(left, right)),
        BinaryOperator::LessThan => ordered(|o| o == Ordering::Less),
        BinaryOperator::LessThanOrEqual => ordered(|o| o != Ordering::Greater),
        BinaryOperator::GreaterThan => ordered(|o| o == Ordering::Greater),
        BinaryOperator::GreaterThanOrEqual => ordered(|o| o != Ordering::Less),
        BinaryOperator::In => Value::Bool(contains(right, left)),
        BinaryOperator::NotIn => Value::Bool(!contains(right, left)),

        BinaryOperator::Add => match (left, right) {
            (Value::String(l), Value::String(r)) => Value::String(format!("{}{}", l, r)),
            (Value::Array(l), Value::Array(r)) => {
                Value::Array(l.iter().chain(r.iter()).cloned().collect())
            }
            _ => arithmetic(left, right, i64::checked_add, |l, r| l + r),
        },
        BinaryOperator::Subtract => arithmetic(left, right, i64::checked_sub, |l, r| l - r),
        BinaryOperator::Multiply => arithmetic(left, right, i64::checked_mul, |l, r| l * r),
        BinaryOperator::Divide => match (left.as_f64(), right.as_f64()) {
            (Some(_), Some(r)) if r == 0.0 => Value::Null,
            (Some(l), Some(r)) => float_value(l / r),
            _ => Value::Null,
        },
        BinaryOperator::FloorDivide => match (as_int(left), as_int(right)) {
            (Some(l), Some(r)) => floor_div(l, r).map(Value::from).unwrap_or(Value::Null),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(_), Some(r)) if r == 0.0 => Value::Null,
                (Some(l), Some(r)) => float_value((l / r).floor()),
                _ => Value::Null,
            },
        },
        BinaryOperator::Modulo => match (as_int(left), as_int(right)) {
            (Some(l), Some(r)) => floor_mod(l, r).map(Value::from).unwrap_or(Value::Null),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(_), Some(r)) if r == 0.0 => Value::Null,
                (Some(l), Some(r)) => float_value(l - r * (l / r).floor()),
                _ => Value::Null,
            },
        },

        // Handled with short-circuiting in `evaluate`
        BinaryOperator::Or => Value::Bool(is_truthy(left) || is_truthy(right)),
        BinaryOperator::And => Value::Bool(is_truthy(left) && is_truthy(right)),
    }
}

/// Division rounding towards negative infinity; `None` on zero or overflow
fn floor_div(l: i64, r: i64) -> Option<i64> {
    let quotient = l.checked_div(r)?;
    if l % r != 0 && (l < 0) != (r < 0) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

/// Remainder taking the sign of the divisor
fn floor_mod(l: i64, r: i64) -> Option<i64> {
    let remainder = l.checked_rem(r)?;
    if remainder != 0 && (remainder < 0) != (r < 0) {
        Some(remainder + r)
    } else {
        Some(remainder)
    }
}

/// Integer operand, only for values stored as integers
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(l), Some(r)) = (as_int(left), as_int(right)) {
        if let Some(result) = int_op(l, r) {
            return Value::from(result);
        }
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => float_value(float_op(l, r)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::expr::ExpressionParser;
    use serde_json::json;

    fn eval_with(source: &str, data: Value) -> Result<Value> {
        let functions = FunctionRegistry::with_builtins();
        let ctx = Context::from_value(&data).unwrap();
        let expr = ExpressionParser::new(source, 1)?.parse_expression()?;
        Evaluator::new(&functions).evaluate(&expr, &ctx)
    }

    fn eval(source: &str) -> Value {
        eval_with(source, json!({})).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), json!(7));
        assert_eq!(eval("7 / 2"), json!(3.5));
        assert_eq!(eval("7 // 2"), json!(3));
        assert_eq!(eval("-7 // 2"), json!(-4));
        assert_eq!(eval("7 % 3"), json!(1));
        assert_eq!(eval("-7 % 3"), json!(2));
        assert_eq!(eval("1.5 + 1"), json!(2.5));
        assert_eq!(eval("1 / 0"), json!(null));
        assert_eq!(eval("'a' + 'b'"), json!("ab"));
        assert_eq!(eval("[1] + [2]"), json!([1, 2]));
        assert_eq!(eval("'a' + 1"), json!(null));
        assert_eq!(eval("-(2 + 3)"), json!(-5));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 == 1.0"), json!(true));
        assert_eq!(eval("2 < 10"), json!(true));
        assert_eq!(eval("'b' >= 'a'"), json!(true));
        assert_eq!(eval("1 < 'a'"), json!(false));
        assert_eq!(eval("'ell' in 'hello'"), json!(true));
        assert_eq!(eval("3 not in [1, 2]"), json!(true));
    }

    #[test]
    fn test_logic_returns_operands() {
        assert_eq!(eval_with("name or 'anon'", json!({"name": ""})).unwrap(), json!("anon"));
        assert_eq!(eval_with("name and name.first", json!({"name": null})).unwrap(), json!(null));
        assert_eq!(eval("not 0"), json!(true));
        // Right side is never evaluated
        assert_eq!(eval("true or missing"), json!(true));
    }

    #[test]
    fn test_attribute_and_index() {
        let data = json!({
            "user": {"name": "Ann", "tags": ["a", "b", "c"]},
            "key": "name"
        });
        assert_eq!(eval_with("user.name", data.clone()).unwrap(), json!("Ann"));
        assert_eq!(eval_with("user[key]", data.clone()).unwrap(), json!("Ann"));
        assert_eq!(eval_with("user.tags.1", data.clone()).unwrap(), json!("b"));
        assert_eq!(eval_with("user.tags[-1]", data.clone()).unwrap(), json!("c"));
        assert_eq!(eval_with("user.tags.length", data.clone()).unwrap(), json!(3));
        assert_eq!(eval_with("user.name[0]", data.clone()).unwrap(), json!("A"));
        assert_eq!(eval_with("user.name.size", data).unwrap(), json!(3));
    }

    #[test]
    fn test_unresolvable_is_context_error() {
        let data = json!({"user": {"name": "Ann"}, "items": [1]});
        for source in ["missing", "user.email", "items[5]", "items[-2]", "user.name.first", "nope()"] {
            let err = eval_with(source, data.clone()).unwrap_err();
            assert!(err.is_context_error(), "{} gave {:?}", source, err);
        }
        match eval_with("user.email", data).unwrap_err() {
            Error::Context(expr) => assert_eq!(expr, "user.email"),
            other => panic!("Expected context error, got {:?}", other),
        }
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(eval("range(3)"), json!([0, 1, 2]));
        assert_eq!(eval_with("len(xs)", json!({"xs": [1, 2]})).unwrap(), json!(2));
        // Failures are reported as-is; whether they render empty is the renderer's call
        let err = eval_with("range(1, 2, 0)", json!({})).unwrap_err();
        assert!(!err.is_context_error());
        assert_eq!(err.to_string(), "in call to range()");
        assert!(matches!(err.root_cause(), Error::Template(_)));
    }
}
