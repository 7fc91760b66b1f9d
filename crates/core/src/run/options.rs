use crate::run::validate::Validation;

/// How undefined names behave during lookups. Templates render missing
/// values as empty output; scripts treat them as errors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Mode {
	#[default]
	Template,
	Script,
}

/// Per-render options threaded through the runtime.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct Options {
	/// The lookup mode
	pub mode: Mode,
	/// Which compile-time validator checks are enabled
	pub validation: Validation,
}

impl Options {
	/// Create options with default settings
	pub fn new() -> Self {
		Self::default()
	}

	/// Specify the lookup mode for this render
	pub fn with_mode(mut self, mode: Mode) -> Self {
		self.mode = mode;
		self
	}

	/// Specify the validator configuration for this render
	pub fn with_validation(mut self, validation: Validation) -> Self {
		self.validation = validation;
		self
	}
}
