//! # Operator Components
//!
//! Pure components behind the language's operators. Values follow the
//! loose, dynamically typed rules of the language the graphs are compiled
//! from:
//!
//! - `||` and `&&` return one of their operands, chosen by truthiness
//!   (`null`, `false`, `0`, `NaN` and `""` are falsy);
//! - `+` adds numbers and concatenates as soon as either side is a string;
//! - other arithmetic and ordering operators need numbers (ordering also
//!   accepts two strings);
//! - `==` and `!=` compare structurally, with `1 == 1.0`;
//! - integer arithmetic stays integral while it fits in an `i64`.
//!
//! Anything else (adding an array, dividing by zero, indexing a number) is a
//! [`StreamError`] on the component's output.

use crate::error::StreamError;
use crate::protocol::Value;
use serde_json::{Map, Number};
use std::cmp::Ordering;

type OpResult = Result<Value, StreamError>;

/// Truthiness of a value.
pub fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

/// A number value; integral results that fit an `i64` are kept integral.
/// Anything outside `[-2^63, 2^63)` stays a float, never a saturated integer.
pub fn number(f: f64) -> Value {
  // `i64::MAX as f64` rounds up to 2^63, which is out of range.
  if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
    Value::from(f as i64)
  } else {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

fn operand_error(op: &str, a: &Value, b: &Value) -> StreamError {
  StreamError::new(format!(
    "cannot apply '{}' to {} and {}",
    op,
    type_name(a),
    type_name(b)
  ))
}

/// Plain text of a value, as string concatenation sees it.
pub fn to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn numbers(op: &str, a: &Value, b: &Value) -> Result<(f64, f64), StreamError> {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => Ok((x, y)),
    _ => Err(operand_error(op, a, b)),
  }
}

fn arithmetic(
  op: &str,
  a: &Value,
  b: &Value,
  int_op: fn(i64, i64) -> Option<i64>,
  float_op: fn(f64, f64) -> f64,
) -> OpResult {
  if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
    if let Some(result) = int_op(x, y) {
      return Ok(Value::from(result));
    }
  }
  let (x, y) = numbers(op, a, b)?;
  Ok(number(float_op(x, y)))
}

fn compare(op: &str, a: &Value, b: &Value) -> Result<Ordering, StreamError> {
  match (a, b) {
    (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
    _ => {
      let (x, y) = numbers(op, a, b)?;
      // NaN compares false with everything.
      x.partial_cmp(&y).ok_or_else(|| operand_error(op, a, b))
    }
  }
}

/// Structural equality, with numbers compared by value.
pub fn loose_equals(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
    (Value::Array(xs), Value::Array(ys)) => {
      xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_equals(x, y))
    }
    (Value::Object(xs), Value::Object(ys)) => {
      xs.len() == ys.len()
        && xs
          .iter()
          .all(|(k, x)| ys.get(k).map(|y| loose_equals(x, y)).unwrap_or(false))
    }
    _ => a == b,
  }
}

// ============================================================================
// Binary operators
// ============================================================================

/// `a || b`
pub fn or(a: &Value, b: &Value) -> OpResult {
  Ok(if truthy(a) { a.clone() } else { b.clone() })
}

/// `a && b`
pub fn and(a: &Value, b: &Value) -> OpResult {
  Ok(if truthy(a) { b.clone() } else { a.clone() })
}

/// `a <= b`
pub fn lte(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(compare("<=", a, b)? != Ordering::Greater))
}

/// `a < b`
pub fn lt(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(compare("<", a, b)? == Ordering::Less))
}

/// `a >= b`
pub fn gte(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(compare(">=", a, b)? != Ordering::Less))
}

/// `a > b`
pub fn gt(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(compare(">", a, b)? == Ordering::Greater))
}

/// `a == b`
pub fn eq(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(loose_equals(a, b)))
}

/// `a != b`
pub fn neq(a: &Value, b: &Value) -> OpResult {
  Ok(Value::Bool(!loose_equals(a, b)))
}

/// `a + b`
pub fn add(a: &Value, b: &Value) -> OpResult {
  if a.is_string() || b.is_string() {
    return Ok(Value::String(format!("{}{}", to_text(a), to_text(b))));
  }
  arithmetic("+", a, b, i64::checked_add, |x, y| x + y)
}

/// `a - b`
pub fn subtract(a: &Value, b: &Value) -> OpResult {
  arithmetic("-", a, b, i64::checked_sub, |x, y| x - y)
}

/// `a * b`
pub fn multiply(a: &Value, b: &Value) -> OpResult {
  arithmetic("*", a, b, i64::checked_mul, |x, y| x * y)
}

/// `a / b`; dividing by zero is an error.
pub fn divide(a: &Value, b: &Value) -> OpResult {
  let (x, y) = numbers("/", a, b)?;
  if y == 0.0 {
    return Err(StreamError::new("division by zero"));
  }
  Ok(number(x / y))
}

/// `a % b`, with the sign of `a`; modulo by zero is an error.
pub fn modulo(a: &Value, b: &Value) -> OpResult {
  let (_, y) = numbers("%", a, b)?;
  if y == 0.0 {
    return Err(StreamError::new("modulo by zero"));
  }
  arithmetic("%", a, b, i64::checked_rem, |x, y| x % y)
}

/// `[...array, element]`
pub fn array_push(array: &Value, element: &Value) -> OpResult {
  match array {
    Value::Array(items) => {
      let mut items = items.clone();
      items.push(element.clone());
      Ok(Value::Array(items))
    }
    other => Err(StreamError::new(format!(
      "cannot push onto {}",
      type_name(other)
    ))),
  }
}

/// `collection[index]`; a missing element is `null`.
pub fn index(collection: &Value, index: &Value) -> OpResult {
  match (collection, index) {
    (Value::Array(items), Value::Number(_)) => Ok(
      index
        .as_u64()
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| items.get(i))
        .cloned()
        .unwrap_or(Value::Null),
    ),
    (Value::Object(fields), key) => Ok(fields.get(&to_text(key)).cloned().unwrap_or(Value::Null)),
    (Value::String(text), Value::Number(_)) => Ok(
      index
        .as_u64()
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| text.chars().nth(i))
        .map(|c| Value::String(c.to_string()))
        .unwrap_or(Value::Null),
    ),
    _ => Err(operand_error("[]", collection, index)),
  }
}

/// `{ ...object, [key]: value }`
pub fn set_property_value(key: &Value, value: &Value, object: &Value) -> OpResult {
  match object {
    Value::Object(fields) => {
      let mut fields: Map<String, Value> = fields.clone();
      fields.insert(to_text(key), value.clone());
      Ok(Value::Object(fields))
    }
    other => Err(StreamError::new(format!(
      "cannot set property '{}' on {}",
      to_text(key),
      type_name(other)
    ))),
  }
}

// ============================================================================
// Unary operators
// ============================================================================

/// `-a`
pub fn negate(a: &Value) -> OpResult {
  if let Some(x) = a.as_i64() {
    if let Some(negated) = x.checked_neg() {
      return Ok(Value::from(negated));
    }
  }
  match a.as_f64() {
    Some(x) => Ok(number(-x)),
    None => Err(StreamError::new(format!("cannot negate {}", type_name(a)))),
  }
}

/// `!a`
pub fn not(a: &Value) -> OpResult {
  Ok(Value::Bool(!truthy(a)))
}
