//! Binary and unary operators over settled values. Poison propagates
//! purely: an operation with a poisoned operand yields poison carrying
//! the same error set, and two poisoned operands combine left-to-right.
//! Operands are settled by the caller before an operator is applied;
//! pendings never reach this module.

use crate::err::Error;
use crate::exp::strand::Strand;
use crate::exp::value::Value;

/// Combine operand poison, if any. Two poisons concatenate; one passes
/// through unchanged, preserving identity.
fn poisoned(a: &Value, b: &Value) -> Option<Value> {
	match (a, b) {
		(Value::Poison(x), Value::Poison(y)) => Some(Value::Poison(x.merge(y))),
		(Value::Poison(x), _) => Some(Value::Poison(x.clone())),
		(_, Value::Poison(y)) => Some(Value::Poison(y.clone())),
		_ => None,
	}
}

fn unsupported(op: &str, a: &Value, b: &Value) -> Value {
	Value::poison(Error::InvalidOperation {
		op: op.to_owned(),
		left: a.kindof().to_owned(),
		right: b.kindof().to_owned(),
	})
}

pub fn add(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => Value::Number(a + b),
		(Value::Strand(a), Value::Strand(b)) => Value::Strand(Strand(format!("{a}{b}"))),
		(Value::Strand(a), b) => Value::Strand(Strand(format!("{a}{}", b.to_raw_string()))),
		(a, Value::Strand(b)) => Value::Strand(Strand(format!("{}{b}", a.to_raw_string()))),
		(Value::Array(a), Value::Array(b)) => {
			Value::Array(a.items.into_iter().chain(b.items).collect())
		}
		(a, b) => unsupported("+", &a, &b),
	}
}

pub fn sub(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => Value::Number(a - b),
		(a, b) => unsupported("-", &a, &b),
	}
}

pub fn mul(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => Value::Number(a * b),
		(a, b) => unsupported("*", &a, &b),
	}
}

pub fn div(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => Value::Number(a / b),
		(a, b) => unsupported("/", &a, &b),
	}
}

pub fn rem(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match (a, b) {
		(Value::Number(a), Value::Number(b)) => Value::Number(a % b),
		(a, b) => unsupported("%", &a, &b),
	}
}

pub fn neg(a: Value) -> Value {
	match a {
		Value::Poison(_) => a,
		Value::Number(n) => Value::Number(-n),
		a => unsupported("-", &Value::None, &a),
	}
}

pub fn not(a: Value) -> Value {
	match a {
		Value::Poison(_) => a,
		a => Value::Bool(!a.is_truthy()),
	}
}

pub fn and(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match a.is_truthy() {
		true => b,
		false => a,
	}
}

pub fn or(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	match a.is_truthy() {
		true => a,
		false => b,
	}
}

pub fn equal(a: &Value, b: &Value) -> Value {
	if let Some(p) = poisoned(a, b) {
		return p;
	}
	Value::from(a == b)
}

fn compare(op: &str, a: Value, b: Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	let ordering = match (&a, &b) {
		(Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
		(Value::Strand(x), Value::Strand(y)) => x.partial_cmp(y),
		_ => None,
	};
	match ordering {
		Some(ordering) => Value::from(test(ordering)),
		None => unsupported(op, &a, &b),
	}
}

pub fn less_than(a: Value, b: Value) -> Value {
	compare("<", a, b, std::cmp::Ordering::is_lt)
}

pub fn less_than_or_equal(a: Value, b: Value) -> Value {
	compare("<=", a, b, std::cmp::Ordering::is_le)
}

pub fn more_than(a: Value, b: Value) -> Value {
	compare(">", a, b, std::cmp::Ordering::is_gt)
}

pub fn more_than_or_equal(a: Value, b: Value) -> Value {
	compare(">=", a, b, std::cmp::Ordering::is_ge)
}

pub fn not_equal(a: &Value, b: &Value) -> Value {
	if let Some(p) = poisoned(a, b) {
		return p;
	}
	Value::from(a != b)
}

/// String concatenation, coercing both sides to their output text.
pub fn concat(a: Value, b: Value) -> Value {
	if let Some(p) = poisoned(&a, &b) {
		return p;
	}
	Value::Strand(Strand(format!("{}{}", a.to_raw_string(), b.to_raw_string())))
}
