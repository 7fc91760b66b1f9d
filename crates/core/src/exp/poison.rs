use crate::err::Error;
use crate::exp::value::Value;
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

/// A poison value: an ordered, non-empty set of soft errors flowing
/// through the dataflow in place of the value that failed to be
/// produced. Poison propagates through every value-consuming operation
/// and is aggregated, never deduplicated, when failures combine.
/// Equality is identity, so two separately-created poisons carrying
/// equal errors are still distinct values.
#[derive(Clone)]
pub struct Poison {
	errors: Rc<Vec<Error>>,
}

impl Poison {
	/// Create a poison carrying a single error
	pub fn new(error: Error) -> Self {
		Self {
			errors: Rc::new(vec![error]),
		}
	}

	/// Create a poison carrying an ordered error list
	pub fn from_errors(errors: Vec<Error>) -> Self {
		debug_assert!(!errors.is_empty(), "poison must carry at least one error");
		Self {
			errors: Rc::new(errors),
		}
	}

	/// The errors carried by this poison, in discovery order
	pub fn errors(&self) -> &[Error] {
		&self.errors
	}

	/// Combine two poisons, concatenating error lists left-to-right
	pub fn merge(&self, other: &Poison) -> Poison {
		let mut errors = Vec::with_capacity(self.errors.len() + other.errors.len());
		errors.extend_from_slice(&self.errors);
		errors.extend_from_slice(&other.errors);
		Poison {
			errors: Rc::new(errors),
		}
	}

	/// Check whether two handles are the same poison value
	pub fn same(&self, other: &Poison) -> bool {
		Rc::ptr_eq(&self.errors, &other.errors)
	}
}

impl From<Error> for Poison {
	fn from(error: Error) -> Self {
		Self::new(error)
	}
}

impl PartialEq for Poison {
	fn eq(&self, other: &Self) -> bool {
		self.same(other)
	}
}

impl Debug for Poison {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.debug_list().entries(self.errors.iter()).finish()
	}
}

impl Display for Poison {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		for (i, e) in self.errors.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			write!(f, "{e}")?;
		}
		Ok(())
	}
}

/// Await each value and gather every error it carries, in input order.
/// A poisoned entry contributes its whole error list contiguously; a
/// concrete entry contributes nothing. Pending entries are awaited
/// first, so the check sees what they settled with.
pub async fn collect_errors(values: &[Value]) -> Vec<Error> {
	let mut errors = Vec::new();
	for value in values {
		let value = match value {
			Value::Pending(p) => p.value().await,
			v => v.clone(),
		};
		if let Value::Poison(p) = value {
			errors.extend_from_slice(p.errors());
		}
	}
	errors
}
