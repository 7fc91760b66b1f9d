pub(crate) mod get;
pub(crate) mod resolve;
pub(crate) mod set;

use crate::err::Error;
use crate::exp::array::Array;
use crate::exp::escape::quote_str;
use crate::exp::number::Number;
use crate::exp::object::Object;
use crate::exp::part::Part;
use crate::exp::pending::Pending;
use crate::exp::poison::Poison;
use crate::exp::strand::Strand;
use futures::future::LocalBoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

/// The signature of a native callable: an optional bound receiver and
/// the call arguments, producing a value or a soft error.
pub type NativeFn =
	Rc<dyn Fn(Option<Value>, Vec<Value>) -> LocalBoxFuture<'static, Result<Value, Error>>>;

/// A callable value, modelled as an explicit `(receiver, function)`
/// pair. Member lookup binds the receiver so a later invocation
/// dispatches on the object the function was read from.
#[derive(Clone)]
pub struct Func {
	pub(crate) receiver: Option<Rc<Value>>,
	pub(crate) call: NativeFn,
}

impl Func {
	/// Create an unbound callable
	pub fn new<F>(f: F) -> Self
	where
		F: Fn(Option<Value>, Vec<Value>) -> LocalBoxFuture<'static, Result<Value, Error>> + 'static,
	{
		Self {
			receiver: None,
			call: Rc::new(f),
		}
	}

	/// Bind a receiver, keeping the same underlying function
	pub fn bind(&self, receiver: Value) -> Self {
		Self {
			receiver: Some(Rc::new(receiver)),
			call: self.call.clone(),
		}
	}

	/// Invoke the function with its bound receiver, if any
	pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, Error> {
		(self.call)(self.receiver.as_deref().cloned(), args).await
	}
}

impl PartialEq for Func {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.call, &other.call)
			&& match (&self.receiver, &other.receiver) {
				(Some(a), Some(b)) => Rc::ptr_eq(a, b),
				(None, None) => true,
				_ => false,
			}
	}
}

impl Debug for Func {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self.receiver {
			Some(_) => f.write_str("Func(bound)"),
			None => f.write_str("Func"),
		}
	}
}

/// A runtime value. Every value is either concrete, pending (a
/// single-shot promise which will yield a value), or poison (an ordered
/// set of deferred errors). Pending and poison are disjoint: a pending
/// may settle with poison, but poison is never pending.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub enum Value {
	#[default]
	None,
	Null,
	Bool(bool),
	Number(Number),
	Strand(Strand),
	/// A safe string: flatten-time transformers must not re-escape it
	Safe(Strand),
	Array(Array),
	Object(Object),
	Func(Func),
	Pending(Pending),
	Poison(Poison),
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Number(v.into())
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Number(v.into())
	}
}

impl From<usize> for Value {
	fn from(v: usize) -> Self {
		Value::Number(v.into())
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Number(v.into())
	}
}

impl From<Number> for Value {
	fn from(v: Number) -> Self {
		Value::Number(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Strand(v.into())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Strand(v.into())
	}
}

impl From<Strand> for Value {
	fn from(v: Strand) -> Self {
		Value::Strand(v)
	}
}

impl From<Array> for Value {
	fn from(v: Array) -> Self {
		Value::Array(v)
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::Array(v.into())
	}
}

impl From<Object> for Value {
	fn from(v: Object) -> Self {
		Value::Object(v)
	}
}

impl From<BTreeMap<String, Value>> for Value {
	fn from(v: BTreeMap<String, Value>) -> Self {
		Value::Object(v.into())
	}
}

impl From<HashMap<String, Value>> for Value {
	fn from(v: HashMap<String, Value>) -> Self {
		Value::Object(v.into())
	}
}

impl From<Func> for Value {
	fn from(v: Func) -> Self {
		Value::Func(v)
	}
}

impl From<Pending> for Value {
	fn from(v: Pending) -> Self {
		Value::Pending(v)
	}
}

impl From<Poison> for Value {
	fn from(v: Poison) -> Self {
		Value::Poison(v)
	}
}

impl<T> From<Option<T>> for Value
where
	Value: From<T>,
{
	fn from(v: Option<T>) -> Self {
		match v {
			Some(v) => Value::from(v),
			None => Value::None,
		}
	}
}

impl Value {
	// -----------------------------------
	// Initial values
	// -----------------------------------

	/// The value a freshly-created intermediate container starts from
	pub fn base() -> Self {
		Value::Object(Object::default())
	}

	/// Wrap a string so flatten-time transformers leave it untouched
	pub fn safe<S: Into<Strand>>(s: S) -> Self {
		Value::Safe(s.into())
	}

	/// Create a poison carrying a single error. An error which is
	/// already wrapped in a render aggregation is unwrapped so its
	/// errors stay flat.
	pub fn poison(error: Error) -> Self {
		match error {
			Error::Poisoned {
				errors,
			} => Value::Poison(Poison::from_errors(errors)),
			error => Value::Poison(Poison::new(error)),
		}
	}

	/// Create a poison carrying an ordered error list
	pub fn poison_all(errors: Vec<Error>) -> Self {
		Value::Poison(Poison::from_errors(errors))
	}

	/// Convert a value into poison. An existing poison is returned
	/// unchanged, preserving its identity.
	pub fn into_poison(self, error: Error) -> Self {
		match self {
			Value::Poison(_) => self,
			_ => Value::poison(error),
		}
	}

	// -----------------------------------
	// Simple value detection
	// -----------------------------------

	/// Check if this value is none or null
	pub fn is_nullish(&self) -> bool {
		matches!(self, Value::None | Value::Null)
	}

	/// Check if this value is not none or null
	pub fn is_some(&self) -> bool {
		!self.is_nullish()
	}

	/// Check if this value is poison
	pub fn is_poison(&self) -> bool {
		matches!(self, Value::Poison(_))
	}

	/// Check if this value is a pending promise
	pub fn is_pending(&self) -> bool {
		matches!(self, Value::Pending(_))
	}

	/// Check if observing this value requires resolution: either the
	/// value itself is pending, or it is a container whose resolve
	/// marker is attached
	pub fn needs_resolve(&self) -> bool {
		match self {
			Value::Pending(_) => true,
			Value::Array(v) => v.deferred,
			Value::Object(v) => v.deferred,
			_ => false,
		}
	}

	/// Check if this value is truthy
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::None | Value::Null => false,
			Value::Bool(v) => *v,
			Value::Number(v) => v.is_truthy(),
			Value::Strand(v) | Value::Safe(v) => !v.is_empty(),
			Value::Array(v) => !v.is_empty(),
			Value::Object(v) => !v.is_empty(),
			Value::Func(_) => true,
			Value::Pending(_) => true,
			Value::Poison(_) => false,
		}
	}

	/// The name of this value's type, as surfaced in error messages
	pub fn kindof(&self) -> &'static str {
		match self {
			Value::None => "none",
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Number(_) => "number",
			Value::Strand(_) => "string",
			Value::Safe(_) => "string",
			Value::Array(_) => "array",
			Value::Object(_) => "object",
			Value::Func(_) => "function",
			Value::Pending(_) => "pending",
			Value::Poison(_) => "poison",
		}
	}

	// -----------------------------------
	// Output coercion
	// -----------------------------------

	/// The text this value contributes to rendered output. Only
	/// concrete values reach this point: the output buffer resolves
	/// pendings and intercepts poison before joining.
	pub fn to_raw_string(&self) -> String {
		match self {
			Value::None | Value::Null => String::new(),
			Value::Bool(v) => v.to_string(),
			Value::Number(v) => v.to_string(),
			Value::Strand(v) | Value::Safe(v) => v.to_string(),
			Value::Array(v) => v.to_string(),
			Value::Object(v) => v.to_string(),
			Value::Func(_) => String::new(),
			Value::Pending(_) | Value::Poison(_) => String::new(),
		}
	}

	// -----------------------------------
	// Synchronous path traversal
	// -----------------------------------

	/// Read the value at a concrete path, without resolution. Missing
	/// segments yield none.
	pub fn pick(&self, path: &[Part]) -> Value {
		match path.first() {
			Some(p) => match (self, p) {
				(Value::Object(v), Part::Field(f)) => match v.get(f.as_str()) {
					Some(v) => v.pick(&path[1..]),
					None => Value::None,
				},
				(Value::Object(v), Part::Index(i)) => match v.get(&i.to_string()) {
					Some(v) => v.pick(&path[1..]),
					None => Value::None,
				},
				(Value::Array(v), Part::Index(i)) => match v.get(i.to_usize()) {
					Some(v) => v.pick(&path[1..]),
					None => Value::None,
				},
				(Value::Array(v), Part::Append) => match v.last() {
					Some(v) => v.pick(&path[1..]),
					None => Value::None,
				},
				_ => Value::None,
			},
			None => self.clone(),
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Value::None => f.write_str("none"),
			Value::Null => f.write_str("null"),
			Value::Bool(v) => Display::fmt(v, f),
			Value::Number(v) => Display::fmt(v, f),
			Value::Strand(v) | Value::Safe(v) => quote_str(f, v),
			Value::Array(v) => Display::fmt(v, f),
			Value::Object(v) => Display::fmt(v, f),
			Value::Func(_) => f.write_str("[function]"),
			Value::Pending(_) => f.write_str("[pending]"),
			Value::Poison(v) => write!(f, "[poison: {v}]"),
		}
	}
}
