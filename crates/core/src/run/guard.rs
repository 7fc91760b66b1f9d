use crate::cnf::GLOBAL_LOCK_KEY;
use crate::ctx::Frame;
use crate::err::Error;
use crate::exp::value::Value;
use crate::out::buffer::{region_errors, Buffer};
use crate::out::handler::Handlers;
use crate::run::sequence::Sequences;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::trace;

/// What a guard protects. No selectors means "guard all outputs"; the
/// bare `*` wildcard guards everything: outputs, locks, and every
/// declared variable.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Selector {
	/// A named output handler; `@text` is the output buffer itself
	Output(String),
	/// The bare `@`: every output handler
	AllOutputs,
	/// A guarded variable
	Var(String),
	/// A sequence lock key (`name!`)
	Lock(String),
	/// The bare `!`: every sequence lock
	AllLocks,
	/// The `*` wildcard
	Everything,
}

/// The snapshots a guard takes at entry, used to revert its guarded
/// artefacts if the body fails.
pub struct GuardScope {
	buffer_mark: Option<usize>,
	handler_marks: Vec<(String, usize)>,
	var_snapshots: Vec<(String, Value)>,
	lock_keys: Vec<String>,
}

/// How a guard body ended.
pub enum GuardOutcome {
	/// Nothing guarded failed; the body's value passes through
	Passed(Value),
	/// A guarded artefact failed; the aggregated errors, in discovery
	/// order, are bound to the recover arm or propagated as poison
	Failed {
		errors: Vec<Error>,
	},
}

impl GuardOutcome {
	/// The value a `recover` arm binds to its error name
	pub fn error_value(errors: &[Error]) -> Value {
		Value::from(errors.iter().map(|e| Value::from(e.to_string())).collect::<Vec<Value>>())
	}
}

/// Validate the selector list and snapshot everything it guards.
/// Selector misuse is a compile-time error: the compiler's metadata
/// names what the body modifies (`body_writes`) and which lock keys it
/// invokes (`body_locks`), and every selector must be backed by it.
pub fn begin_guard(
	selectors: &[Selector],
	frame: &Frame,
	buffer: &Rc<RefCell<Buffer>>,
	handlers: &Rc<RefCell<Handlers>>,
	body_writes: &[&str],
	body_locks: &[&str],
) -> Result<GuardScope, Error> {
	// No selectors guards all outputs
	let all_outputs = [Selector::AllOutputs];
	let selectors = match selectors.is_empty() {
		true => &all_outputs[..],
		false => selectors,
	};
	// Duplicate selectors are errors
	let mut seen = HashSet::new();
	for selector in selectors {
		if !seen.insert(selector) {
			return Err(Error::GuardDuplicateSelector(selector_name(selector)));
		}
	}
	// The wildcard stands alone
	if selectors.contains(&Selector::Everything) && selectors.len() > 1 {
		return Err(Error::GuardSelectorConflict("*".to_owned()));
	}
	// The bare @ cannot be combined with specific handlers
	if selectors.contains(&Selector::AllOutputs)
		&& selectors.iter().any(|s| matches!(s, Selector::Output(_)))
	{
		return Err(Error::GuardSelectorConflict("@".to_owned()));
	}
	let mut scope = GuardScope {
		buffer_mark: None,
		handler_marks: Vec::new(),
		var_snapshots: Vec::new(),
		lock_keys: Vec::new(),
	};
	for selector in selectors {
		match selector {
			Selector::Output(name) if name == "@text" => {
				scope.buffer_mark = Some(buffer.borrow_mut().mark());
			}
			Selector::Output(name) => {
				let mark = handlers.borrow_mut().mark(name)?;
				scope.handler_marks.push((name.clone(), mark));
			}
			Selector::AllOutputs => {
				scope.buffer_mark = Some(buffer.borrow_mut().mark());
				scope.handler_marks = handlers.borrow_mut().mark_all();
			}
			Selector::Var(name) => {
				let value = frame
					.lookup(name)
					.filter(|_| frame.is_declared(name))
					.ok_or_else(|| Error::GuardUnknownVariable(name.clone()))?;
				if !body_writes.contains(&name.as_str()) {
					return Err(Error::GuardUnmodifiedVariable(name.clone()));
				}
				scope.var_snapshots.push((name.clone(), value));
			}
			Selector::Lock(key) => {
				if !body_locks.iter().any(|l| *l == key) {
					return Err(Error::GuardUnusedLock(key.clone()));
				}
				scope.lock_keys.push(key.clone());
			}
			Selector::AllLocks => {
				scope.lock_keys.push(GLOBAL_LOCK_KEY.to_owned());
			}
			Selector::Everything => {
				scope.buffer_mark = Some(buffer.borrow_mut().mark());
				scope.handler_marks = handlers.borrow_mut().mark_all();
				scope.lock_keys.push(GLOBAL_LOCK_KEY.to_owned());
				for name in frame.visible_names() {
					if let Some(value) = frame.lookup(&name) {
						scope.var_snapshots.push((name, value));
					}
				}
			}
		}
	}
	trace!(
		"guard opened: {} handler mark(s), {} variable snapshot(s), {} lock key(s)",
		scope.handler_marks.len(),
		scope.var_snapshots.len(),
		scope.lock_keys.len()
	);
	Ok(scope)
}

/// Close a guard at the end of its body: detect whether any guarded
/// artefact was poisoned, and if so revert outputs, restore variables,
/// and repair locks, aggregating every error discovered inside the
/// body. Errors on artefacts no selector covers are left in place and
/// propagate outward as usual.
pub async fn end_guard(
	scope: GuardScope,
	frame: &Frame,
	buffer: &Rc<RefCell<Buffer>>,
	handlers: &Rc<RefCell<Handlers>>,
	sequences: &Sequences,
	body_result: Result<Value, Error>,
) -> Result<GuardOutcome, Error> {
	let mut errors = Vec::new();
	let mut body_value = Value::None;
	match body_result {
		Ok(Value::Poison(p)) => errors.extend_from_slice(p.errors()),
		Ok(value) => body_value = value,
		// A break inside a guard is ignored by the loop driver
		Err(Error::Break) => (),
		Err(e) if e.is_fatal() => return Err(e),
		Err(Error::Continue) => return Err(Error::Continue),
		Err(e) => errors.push(e),
	}
	// Await the guarded output region and gather what it settled with
	if let Some(mark) = scope.buffer_mark {
		errors.extend(region_errors(buffer, mark).await);
	}
	// Guarded variables which ended poisoned
	for (name, _) in &scope.var_snapshots {
		if let Some(Value::Poison(p)) = frame.lookup(name) {
			errors.extend_from_slice(p.errors());
		}
	}
	// Guarded locks with recorded failures
	for key in &scope.lock_keys {
		if sequences.has_failure(key) {
			errors.extend(sequences.repair(key));
		}
	}
	if errors.is_empty() {
		return Ok(GuardOutcome::Passed(body_value));
	}
	trace!("guard reverting after {} error(s)", errors.len());
	// Revert the guarded outputs to their entry revert points
	if let Some(mark) = scope.buffer_mark {
		buffer.borrow_mut().revert_to(mark);
	}
	for (name, mark) in &scope.handler_marks {
		handlers.borrow_mut().revert(name, *mark);
	}
	// Restore the guarded variables to their snapshots
	for (name, value) in scope.var_snapshots {
		frame.force_set(&name, value);
	}
	Ok(GuardOutcome::Failed {
		errors,
	})
}

fn selector_name(selector: &Selector) -> String {
	match selector {
		Selector::Output(name) => name.clone(),
		Selector::AllOutputs => "@".to_owned(),
		Selector::Var(name) => name.clone(),
		Selector::Lock(key) => format!("{key}!"),
		Selector::AllLocks => "!".to_owned(),
		Selector::Everything => "*".to_owned(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::pending::Pending;

	fn fixture() -> (Frame, Rc<RefCell<Buffer>>, Rc<RefCell<Handlers>>, Sequences) {
		(
			Frame::new(),
			Rc::new(RefCell::new(Buffer::new())),
			Rc::new(RefCell::new(Handlers::new())),
			Sequences::new(),
		)
	}

	#[tokio::test]
	async fn passing_guard_keeps_its_output() {
		let (frame, buffer, handlers, seq) = fixture();
		buffer.borrow_mut().append("before ");
		let scope = begin_guard(&[], &frame, &buffer, &handlers, &[], &[]).unwrap();
		buffer.borrow_mut().append("inside");
		let outcome =
			end_guard(scope, &frame, &buffer, &handlers, &seq, Ok(Value::None)).await.unwrap();
		assert!(matches!(outcome, GuardOutcome::Passed(_)));
	}

	#[tokio::test]
	async fn failing_guard_reverts_output() {
		let (frame, buffer, handlers, seq) = fixture();
		buffer.borrow_mut().append("before ");
		let scope = begin_guard(&[], &frame, &buffer, &handlers, &[], &[]).unwrap();
		buffer.borrow_mut().append("inside ");
		let (p, r) = Pending::new();
		buffer.borrow_mut().append_pending(p);
		r.resolve(Value::poison(Error::Thrown("fail".to_owned())));
		let outcome =
			end_guard(scope, &frame, &buffer, &handlers, &seq, Ok(Value::None)).await.unwrap();
		match outcome {
			GuardOutcome::Failed {
				errors,
			} => assert_eq!(errors.len(), 1),
			_ => panic!("expected failure"),
		}
		buffer.borrow_mut().append("after");
		let flat =
			Rc::try_unwrap(buffer).ok().unwrap().into_inner().flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("before after"));
	}

	#[tokio::test]
	async fn guarded_variables_are_restored() {
		let (frame, buffer, handlers, seq) = fixture();
		frame.declare("x", Value::from(1));
		let scope = begin_guard(
			&[Selector::Var("x".to_owned())],
			&frame,
			&buffer,
			&handlers,
			&["x"],
			&[],
		)
		.unwrap();
		frame.force_set("x", Value::poison(Error::Thrown("bad".to_owned())));
		let outcome =
			end_guard(scope, &frame, &buffer, &handlers, &seq, Ok(Value::None)).await.unwrap();
		assert!(matches!(outcome, GuardOutcome::Failed { .. }));
		assert_eq!(frame.lookup("x"), Some(Value::from(1)));
	}

	#[tokio::test]
	async fn guarded_locks_are_repaired() {
		let (frame, buffer, handlers, seq) = fixture();
		let scope = begin_guard(
			&[Selector::Lock("db".to_owned())],
			&frame,
			&buffer,
			&handlers,
			&[],
			&["db"],
		)
		.unwrap();
		let lock = seq.acquire_write("db");
		lock.fail(Error::Thrown("down".to_owned()));
		let outcome =
			end_guard(scope, &frame, &buffer, &handlers, &seq, Ok(Value::None)).await.unwrap();
		assert!(matches!(outcome, GuardOutcome::Failed { .. }));
		assert!(!seq.has_failure("db"));
	}

	#[tokio::test]
	async fn break_inside_a_guard_is_ignored() {
		let (frame, buffer, handlers, seq) = fixture();
		let scope = begin_guard(&[], &frame, &buffer, &handlers, &[], &[]).unwrap();
		let outcome =
			end_guard(scope, &frame, &buffer, &handlers, &seq, Err(Error::Break)).await.unwrap();
		assert!(matches!(outcome, GuardOutcome::Passed(_)));
	}

	#[test]
	fn selector_validation() {
		let (frame, buffer, handlers, _seq) = fixture();
		frame.declare("x", Value::from(1));
		// Unknown variable
		let res = begin_guard(
			&[Selector::Var("missing".to_owned())],
			&frame,
			&buffer,
			&handlers,
			&[],
			&[],
		);
		assert!(matches!(res, Err(Error::GuardUnknownVariable(_))));
		// Variable the body never modifies
		let res =
			begin_guard(&[Selector::Var("x".to_owned())], &frame, &buffer, &handlers, &[], &[]);
		assert!(matches!(res, Err(Error::GuardUnmodifiedVariable(_))));
		// Lock the body never invokes
		let res = begin_guard(
			&[Selector::Lock("db".to_owned())],
			&frame,
			&buffer,
			&handlers,
			&[],
			&[],
		);
		assert!(matches!(res, Err(Error::GuardUnusedLock(_))));
		// Wildcard combined with anything
		let res = begin_guard(
			&[Selector::Everything, Selector::AllLocks],
			&frame,
			&buffer,
			&handlers,
			&[],
			&[],
		);
		assert!(matches!(res, Err(Error::GuardSelectorConflict(_))));
		// Bare @ combined with a specific handler
		let res = begin_guard(
			&[Selector::AllOutputs, Selector::Output("@data".to_owned())],
			&frame,
			&buffer,
			&handlers,
			&[],
			&[],
		);
		assert!(matches!(res, Err(Error::GuardSelectorConflict(_))));
		// Duplicates
		let res = begin_guard(
			&[Selector::AllLocks, Selector::AllLocks],
			&frame,
			&buffer,
			&handlers,
			&[],
			&[],
		);
		assert!(matches!(res, Err(Error::GuardDuplicateSelector(_))));
	}
}
