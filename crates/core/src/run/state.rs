use crate::ctx::Frame;
use crate::err::Error;
use crate::exp::pending::Pending;
use crate::exp::poison::Poison;
use crate::exp::value::Value;
use async_executor::{LocalExecutor, Task};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::future::poll_fn;
use std::rc::Rc;
use std::task::{Poll, Waker};
use tracing::trace;

/// The per-render async state: one single-threaded executor driving
/// every closure of the render, the active-closure count the top level
/// awaits, and the first fatal error, which aborts everything eagerly.
///
/// "Parallel" execution is many closures in flight interleaving at
/// their await points; there are no threads and no locks.
#[derive(Clone)]
pub struct AsyncState(Rc<Inner>);

struct Inner {
	exec: LocalExecutor<'static>,
	/// Task handles are kept so an abort cancels everything still
	/// queued; cleared once the render settles
	tasks: RefCell<Vec<Task<()>>>,
	active: Cell<usize>,
	watchers: RefCell<Vec<Waker>>,
	fatal: RefCell<Option<Error>>,
}

impl Default for AsyncState {
	fn default() -> Self {
		Self::new()
	}
}

impl AsyncState {
	pub fn new() -> Self {
		AsyncState(Rc::new(Inner {
			exec: LocalExecutor::new(),
			tasks: RefCell::new(Vec::new()),
			active: Cell::new(0),
			watchers: RefCell::new(Vec::new()),
			fatal: RefCell::new(None),
		}))
	}

	/// The number of closures currently in flight
	pub fn active_closures(&self) -> usize {
		self.0.active.get()
	}

	/// Record the first fatal error and wake the render so it aborts
	pub fn abort(&self, error: Error) {
		trace!("aborting render: {error}");
		let mut fatal = self.0.fatal.borrow_mut();
		if fatal.is_none() {
			*fatal = Some(error);
		}
		drop(fatal);
		self.wake();
	}

	/// Spawn an async closure. The frame push, the read snapshots, and
	/// the write-counter registration happen before this call returns,
	/// so later statements in the caller observe the pending bindings.
	/// The returned pending settles with the closure's value: poison if
	/// the body failed softly, in which case the registered writes are
	/// drained with the same poison so no parent waits forever.
	pub fn async_block<F>(
		&self,
		frame: &Frame,
		reads: &[&str],
		writes: &[(&str, usize)],
		sequential: bool,
		expr: bool,
		func: F,
	) -> Result<Pending, Error>
	where
		F: FnOnce(AsyncState, Frame) -> LocalBoxFuture<'static, Result<Value, Error>>,
	{
		let child = frame.push_async_block(reads, writes, sequential)?;
		self.enter();
		let (pending, resolver) = Pending::new();
		let state = self.clone();
		let fut = func(state.clone(), child.clone());
		trace!(sequential, expr, "entering async block at depth {}", child.depth());
		let task = self.0.exec.spawn(async move {
			let out = match fut.await {
				Ok(v) => v,
				Err(e) if e.is_fatal() => {
					state.abort(e);
					Value::None
				}
				// Control flow never escapes a closure boundary
				Err(e) if e.is_flow() => Value::None,
				Err(e) => {
					let poison = Poison::new(e);
					child.poison_branch_writes(&poison);
					Value::Poison(poison)
				}
			};
			// Sequential writes were committed when the body released
			// its locks; leaving the block checks the counters drained
			if let Err(e) = child.pop() {
				state.abort(e);
			}
			resolver.resolve(out);
			state.leave();
		});
		self.0.tasks.borrow_mut().push(task);
		Ok(pending)
	}

	/// Drive the executor until every closure has completed or a fatal
	/// error aborted the render. Whatever is still queued after an
	/// abort is cancelled.
	pub async fn run_to_completion(&self) -> Result<(), Error> {
		let inner = self.0.clone();
		self.0
			.exec
			.run(poll_fn(move |cx| {
				if inner.fatal.borrow().is_some() || inner.active.get() == 0 {
					return Poll::Ready(());
				}
				let mut watchers = inner.watchers.borrow_mut();
				if !watchers.iter().any(|w| w.will_wake(cx.waker())) {
					watchers.push(cx.waker().clone());
				}
				Poll::Pending
			}))
			.await;
		self.0.tasks.borrow_mut().clear();
		match self.0.fatal.borrow_mut().take() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	/// Wait until at most `target` closures remain in flight
	pub async fn wait_all_closures(&self, target: usize) {
		let inner = self.0.clone();
		poll_fn(move |cx| {
			if inner.fatal.borrow().is_some() || inner.active.get() <= target {
				return Poll::Ready(());
			}
			let mut watchers = inner.watchers.borrow_mut();
			if !watchers.iter().any(|w| w.will_wake(cx.waker())) {
				watchers.push(cx.waker().clone());
			}
			Poll::Pending
		})
		.await
	}

	fn enter(&self) {
		self.0.active.set(self.0.active.get() + 1);
		self.wake();
	}

	fn leave(&self) {
		let active = self.0.active.get().saturating_sub(1);
		self.0.active.set(active);
		if active == 0 {
			trace!("all closures quiescent");
		}
		self.wake();
	}

	fn wake(&self) {
		let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
		for waker in watchers {
			waker.wake();
		}
	}
}
