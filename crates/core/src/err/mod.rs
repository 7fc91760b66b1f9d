use crate::cnf::UNKNOWN_PATH;
use std::fmt;
use thiserror::Error;

/// A source position carried by positioned errors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Position {
	pub line: u32,
	pub col: u32,
}

impl Position {
	pub fn new(line: u32, col: u32) -> Self {
		Self {
			line,
			col,
		}
	}
}

impl fmt::Display for Position {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "[Line {}, Column {}]", self.line, self.col)
	}
}

/// The errors which can occur while executing a compiled template or
/// script. Soft errors become poison values and the render continues
/// past them; fatal errors are breaches of the compiler-runtime
/// contract and abort the render immediately.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// A soft error enriched with its source position and template path
	#[error("{path} {position}: {message}")]
	Template {
		message: String,
		position: Position,
		path: String,
		context: String,
	},

	/// A variable was read which is not declared in any reachable scope
	#[error("Can not look up unknown variable: {0}")]
	UnknownVariable(String),

	/// A variable was assigned which is not declared in any reachable scope
	#[error("Cannot assign to undeclared variable: {0}")]
	UndeclaredAssign(String),

	/// A member was accessed on a value which has no members
	#[error("Cannot read property '{field}' of {target}")]
	MemberOnNone {
		field: String,
		target: String,
	},

	/// An operator was applied to operand types it does not support
	#[error("Unsupported operation: {left} {op} {right}")]
	InvalidOperation {
		op: String,
		left: String,
		right: String,
	},

	/// A user `error()` call or other explicit failure
	#[error("{0}")]
	Thrown(String),

	/// A path segment was applied to a value it cannot index
	#[error("Invalid path: {0}")]
	InvalidPath(String),

	/// The `[]` sentinel addressed the last element of an empty array
	#[error("Cannot address the last element of an empty array")]
	LastOfEmptyArray,

	/// A statement iterated over a value which is not iterable
	#[error("Cannot iterate over {0}")]
	InvalidLoopTarget(String),

	/// A sequence lock operation failed and was recorded on its key
	#[error("Sequential operation failed on '{key}': {message}")]
	SequenceFailed {
		key: String,
		message: String,
	},

	/// A guard selector named a variable which is not declared
	#[error("Guard target '{0}' is not a declared variable")]
	GuardUnknownVariable(String),

	/// A guard selector named a variable the body never modifies
	#[error("Guard target '{0}' is never modified inside the guard body")]
	GuardUnmodifiedVariable(String),

	/// A guard selector named a sequence lock the body never invokes
	#[error("Guard target '{0}!' is never invoked inside the guard body")]
	GuardUnusedLock(String),

	/// Guard selectors combined in a way that is not allowed
	#[error("Guard selector '{0}' can not be combined with other selectors")]
	GuardSelectorConflict(String),

	/// The same guard selector appeared twice
	#[error("Duplicate guard selector '{0}'")]
	GuardDuplicateSelector(String),

	/// The render produced one or more aggregated soft errors
	#[error("Render failed with {} error(s): {}", .errors.len(), ErrorList(.errors))]
	Poisoned {
		errors: Vec<Error>,
	},

	/// Breaks out of the nearest loop. Not an error, but used to
	/// short-circuit execution through the statement drivers.
	#[error("Break statement has been reached")]
	Break,

	/// Skips to the next loop iteration. Not an error, but used to
	/// short-circuit execution through the statement drivers.
	#[error("Continue statement has been reached")]
	Continue,

	// --------------------------------------------------
	// Fatal errors: compiler-runtime contract breaches
	// --------------------------------------------------
	/// A frame was popped whose depth does not pair with its parent
	#[error("Frame balance violation: popped depth {found}, expected {expected}")]
	FrameBalance {
		expected: u32,
		found: u32,
	},

	/// A frame without a parent was popped
	#[error("Frame balance violation: popped the root frame")]
	PoppedRoot,

	/// The frame stack grew beyond the configured limit
	#[error("Frame depth limit reached")]
	DepthExceeded,

	/// A variable was declared on a frame which does not create a scope
	#[error("Cannot declare variable '{0}' on a non-scoping frame")]
	DeclarationScope(String),

	/// An async block read a non-local variable it never registered
	#[error("Variable '{0}' is read inside an async block but missing from its read set")]
	ReadSetMissing(String),

	/// A resolver registration has no matching write counter, or the reverse
	#[error("Variable '{0}' has mismatched resolver and write-counter registrations")]
	WriteSetMismatch(String),

	/// A write decremented a counter which was already at zero
	#[error("Write counter for variable '{0}' dropped below zero")]
	NegativeWriteCounter(String),

	/// An async block completed while write counters were still positive
	#[error("Async block finished with pending writes")]
	PendingWrites {
		names: Vec<String>,
	},

	/// An invariant the runtime relies upon was broken
	#[error("Internal runtime error: {0}")]
	Unreachable(&'static str),
}

impl Error {
	/// Check whether this error aborts the render rather than poisoning it
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::FrameBalance {
				..
			} | Error::PoppedRoot
				| Error::DepthExceeded
				| Error::DeclarationScope(_)
				| Error::ReadSetMissing(_)
				| Error::WriteSetMismatch(_)
				| Error::NegativeWriteCounter(_)
				| Error::PendingWrites {
					..
				} | Error::Unreachable(_)
		)
	}

	/// Check whether this error is a loop control marker
	pub fn is_flow(&self) -> bool {
		matches!(self, Error::Break | Error::Continue)
	}

	/// Wrap a soft error with the source position and template path at
	/// which the failing expression was written. Fatal errors and
	/// already-positioned errors pass through unchanged.
	pub fn enrich(self, position: Position, context: &str, path: Option<&str>) -> Error {
		match self {
			Error::Template {
				..
			} => self,
			err if err.is_fatal() || err.is_flow() => err,
			err => Error::Template {
				message: err.to_string(),
				position,
				path: path.unwrap_or(UNKNOWN_PATH).to_owned(),
				context: context.to_owned(),
			},
		}
	}
}

/// Formats an aggregated error list for display.
struct ErrorList<'a>(&'a [Error]);

impl fmt::Display for ErrorList<'_> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, e) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			write!(f, "{e}")?;
		}
		Ok(())
	}
}
