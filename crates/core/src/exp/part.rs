use crate::exp::number::Number;
use crate::exp::value::Value;
use std::fmt;

/// A single segment of an assignment or data path.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Part {
	/// A named field of an object
	Field(String),
	/// A numeric index into an array
	Index(Number),
	/// The `[]` sentinel: appends in terminal position, addresses the
	/// last element anywhere else
	Append,
	/// A computed segment whose key may still be pending or poisoned
	Value(Value),
}

impl From<i32> for Part {
	fn from(v: i32) -> Self {
		Self::Index(v.into())
	}
}

impl From<i64> for Part {
	fn from(v: i64) -> Self {
		Self::Index(v.into())
	}
}

impl From<usize> for Part {
	fn from(v: usize) -> Self {
		Self::Index(v.into())
	}
}

impl From<Number> for Part {
	fn from(v: Number) -> Self {
		Self::Index(v)
	}
}

impl From<String> for Part {
	fn from(v: String) -> Self {
		Self::Field(v)
	}
}

impl From<&str> for Part {
	fn from(v: &str) -> Self {
		match v {
			"[]" => Self::Append,
			_ => match v.parse::<i64>() {
				Ok(i) => Self::from(i),
				_ => Self::from(v.to_owned()),
			},
		}
	}
}

impl fmt::Display for Part {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Part::Field(v) => write!(f, ".{v}"),
			Part::Index(v) => write!(f, "[{v}]"),
			Part::Append => f.write_str("[]"),
			Part::Value(v) => write!(f, "[{v}]"),
		}
	}
}

// ------------------------------

pub trait Next<'a> {
	fn next(&'a self) -> &'a [Part];
}

impl<'a> Next<'a> for &'a [Part] {
	fn next(&'a self) -> &'a [Part] {
		match self.len() {
			0 => &[],
			_ => &self[1..],
		}
	}
}
