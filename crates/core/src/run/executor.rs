use crate::ctx::Frame;
use crate::err::Error;
use crate::exp::object::Object;
use crate::exp::part::Part;
use crate::exp::pending::Pending;
use crate::exp::value::Value;
use crate::out::buffer::{Buffer, Transform};
use crate::out::data::DataHandler;
use crate::out::handler::{Handler, Handlers};
use crate::run::guard::{begin_guard, end_guard, GuardOutcome, GuardScope, Selector};
use crate::run::options::{Mode, Options};
use crate::run::sequence::Sequences;
use crate::run::state::AsyncState;
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// The per-render runtime a compiled template executes against: the
/// async state, the sequence-lock registry, the output buffer, the
/// handler registry, and the host-provided context values. Cloning is
/// cheap; every clone shares the same render.
#[derive(Clone)]
pub struct Runtime {
	state: AsyncState,
	sequences: Sequences,
	buffer: Rc<RefCell<Buffer>>,
	handlers: Rc<RefCell<Handlers>>,
	data: Rc<RefCell<DataHandler>>,
	context: Rc<Object>,
	options: Options,
}

/// A completed render: the joined text output and the assembled
/// `@data` tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Rendered {
	pub text: String,
	pub data: Value,
}

/// Routes the shared `@data` handler through the registry so guards
/// can mark and revert it by selector name.
struct SharedData(Rc<RefCell<DataHandler>>);

impl Handler for SharedData {
	fn emit(&mut self, value: Value) -> Result<(), Error> {
		self.0.borrow_mut().emit(value)
	}
	fn mark(&mut self) -> usize {
		self.0.borrow_mut().mark()
	}
	fn revert(&mut self, mark: usize) {
		self.0.borrow_mut().revert(mark)
	}
	fn take(&mut self) -> Value {
		self.0.borrow_mut().take()
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new(Options::default())
	}
}

impl Runtime {
	pub fn new(options: Options) -> Self {
		let data = Rc::new(RefCell::new(DataHandler::new()));
		let mut handlers = Handlers::new();
		handlers.register("@data", Box::new(SharedData(data.clone())));
		Runtime {
			state: AsyncState::new(),
			sequences: Sequences::new(),
			buffer: Rc::new(RefCell::new(Buffer::new())),
			handlers: Rc::new(RefCell::new(handlers)),
			data,
			context: Rc::new(Object::default()),
			options,
		}
	}

	/// Provide the host context values templates read as globals
	pub fn with_context(mut self, context: Object) -> Self {
		self.context = Rc::new(context);
		self
	}

	/// Register a custom output handler
	pub fn register_handler(&self, name: &str, handler: Box<dyn Handler>) {
		self.handlers.borrow_mut().register(name, handler);
	}

	pub fn options(&self) -> &Options {
		&self.options
	}

	pub fn state(&self) -> &AsyncState {
		&self.state
	}

	pub fn sequences(&self) -> &Sequences {
		&self.sequences
	}

	// -----------------------------------
	// Variable lookups
	// -----------------------------------

	/// Look up a name in the frame chain, falling back to the host
	/// context. In template mode a miss reads as none; in script mode
	/// it is an error.
	pub fn lookup_var(&self, frame: &Frame, name: &str) -> Result<Value, Error> {
		if let Some(value) = frame.lookup(name) {
			return Ok(value);
		}
		if let Some(value) = self.context.get(name) {
			return Ok(value.clone());
		}
		match self.options.mode {
			Mode::Template => Ok(Value::None),
			Mode::Script => Err(Error::UnknownVariable(name.to_owned())),
		}
	}

	/// The async-flavoured lookup: a script-mode miss yields poison
	/// instead of raising, so the surrounding expression keeps flowing.
	pub fn lookup_var_soft(&self, frame: &Frame, name: &str) -> Value {
		match self.lookup_var(frame, name) {
			Ok(value) => value,
			Err(error) => Value::poison(error),
		}
	}

	/// Assign a variable. Template mode declares on first write at the
	/// nearest scope; script mode requires an explicit declaration.
	pub fn assign_var(&self, frame: &Frame, name: &str, value: Value) -> Result<(), Error> {
		match frame.set(name, value.clone()) {
			Err(Error::UndeclaredAssign(name)) => match self.options.mode {
				Mode::Template => {
					frame.declare(&name, value);
					Ok(())
				}
				Mode::Script => Err(Error::UndeclaredAssign(name)),
			},
			other => other,
		}
	}

	// -----------------------------------
	// Output
	// -----------------------------------

	pub fn append(&self, text: &str) {
		self.buffer.borrow_mut().append(text);
	}

	pub fn append_value(&self, value: Value) {
		self.buffer.borrow_mut().append_value(value);
	}

	pub fn append_pending(&self, pending: Pending) {
		self.buffer.borrow_mut().append_pending(pending);
	}

	pub fn open_sub(&self, transform: Option<Transform>, route: Option<String>) {
		self.buffer.borrow_mut().open_sub(transform, route);
	}

	pub fn close_sub(&self) -> Result<(), Error> {
		self.buffer.borrow_mut().close_sub()
	}

	pub fn mark(&self) -> usize {
		self.buffer.borrow_mut().mark()
	}

	pub fn revert_to(&self, mark: usize) {
		self.buffer.borrow_mut().revert_to(mark)
	}

	/// Deliver a settled value to a named handler
	pub fn emit(&self, handler: &str, value: Value) -> Result<(), Error> {
		self.handlers.borrow_mut().emit(handler, value)
	}

	/// Apply a data method at a path of the `@data` tree
	pub fn data_apply(&self, path: &[Part], method: &str, args: Vec<Value>) -> Result<(), Error> {
		self.data.borrow_mut().apply(path, method, args)
	}

	// -----------------------------------
	// Guards
	// -----------------------------------

	pub fn begin_guard(
		&self,
		selectors: &[Selector],
		frame: &Frame,
		body_writes: &[&str],
		body_locks: &[&str],
	) -> Result<GuardScope, Error> {
		begin_guard(selectors, frame, &self.buffer, &self.handlers, body_writes, body_locks)
	}

	pub async fn end_guard(
		&self,
		scope: GuardScope,
		frame: &Frame,
		body_result: Result<Value, Error>,
	) -> Result<GuardOutcome, Error> {
		end_guard(scope, frame, &self.buffer, &self.handlers, &self.sequences, body_result).await
	}

	// -----------------------------------
	// Render
	// -----------------------------------

	/// Execute a compiled template against this runtime. The closure is
	/// the template's root async closure; rendering completes when
	/// every closure it spawned has quiesced and the buffer has been
	/// linearised. Soft failures aggregate into a single `Poisoned`
	/// error carrying every failure in order; fatal failures abort
	/// immediately.
	pub async fn render<F>(&self, template: F) -> Result<Rendered, Error>
	where
		F: FnOnce(Runtime, Frame) -> LocalBoxFuture<'static, Result<Value, Error>> + 'static,
	{
		trace!("render starting");
		let root = Frame::new();
		let runtime = self.clone();
		self.state.async_block(&root, &[], &[], false, false, move |_, frame| {
			template(runtime, frame)
		})?;
		self.state.run_to_completion().await?;
		// Linearise the buffer and deliver routed values
		let buffer = std::mem::take(&mut *self.buffer.borrow_mut());
		let flat = buffer.flatten().await?;
		let mut errors = Vec::new();
		for (name, value) in flat.routed {
			if let Err(e) = self.handlers.borrow_mut().emit(&name, value) {
				errors.push(e);
			}
		}
		// Lock failures no guard repaired surface here
		errors.extend(self.sequences.unrepaired());
		let text = match flat.output {
			Value::Poison(p) => {
				let mut all = p.errors().to_vec();
				all.extend(errors);
				return Err(Error::Poisoned {
					errors: all,
				});
			}
			value => value.to_raw_string(),
		};
		if !errors.is_empty() {
			return Err(Error::Poisoned {
				errors,
			});
		}
		let data = self.data.borrow_mut().take();
		trace!("render finished with {} byte(s) of output", text.len());
		Ok(Rendered {
			text,
			data,
		})
	}
}
