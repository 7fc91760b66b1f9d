use crate::err::Error;
use crate::exp::value::Value;
use std::collections::HashMap;

/// A named output sink. Handlers receive settled values, expose revert
/// points so guards can roll a failed region back, and surrender their
/// artefact when the render completes.
pub trait Handler {
	/// Deliver a settled value to this handler
	fn emit(&mut self, value: Value) -> Result<(), Error>;
	/// A revert point capturing the handler's current state
	fn mark(&mut self) -> usize;
	/// Roll back to a previously captured revert point
	fn revert(&mut self, mark: usize);
	/// Surrender the handler's final artefact
	fn take(&mut self) -> Value;
}

/// The registry of named output handlers for one render. The `@text`
/// stream is the output buffer itself and is not registered here.
#[derive(Default)]
pub struct Handlers {
	map: HashMap<String, Box<dyn Handler>>,
}

impl Handlers {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a handler under its selector name
	pub fn register(&mut self, name: &str, handler: Box<dyn Handler>) {
		self.map.insert(name.to_owned(), handler);
	}

	/// Check whether a handler is registered
	pub fn contains(&self, name: &str) -> bool {
		self.map.contains_key(name)
	}

	/// Deliver a value to a named handler
	pub fn emit(&mut self, name: &str, value: Value) -> Result<(), Error> {
		match self.map.get_mut(name) {
			Some(handler) => handler.emit(value),
			None => Err(Error::Thrown(format!("Unknown output handler '{name}'"))),
		}
	}

	/// Capture revert points across every registered handler
	pub fn mark_all(&mut self) -> Vec<(String, usize)> {
		self.map.iter_mut().map(|(name, handler)| (name.clone(), handler.mark())).collect()
	}

	/// Capture a revert point for one handler
	pub fn mark(&mut self, name: &str) -> Result<usize, Error> {
		match self.map.get_mut(name) {
			Some(handler) => Ok(handler.mark()),
			None => Err(Error::Thrown(format!("Unknown output handler '{name}'"))),
		}
	}

	/// Roll a handler back to a revert point
	pub fn revert(&mut self, name: &str, mark: usize) {
		if let Some(handler) = self.map.get_mut(name) {
			handler.revert(mark);
		}
	}

	/// Surrender a handler's final artefact
	pub fn take(&mut self, name: &str) -> Option<Value> {
		self.map.get_mut(name).map(|handler| handler.take())
	}
}
