use crate::cnf::GLOBAL_LOCK_KEY;
use crate::err::Error;
use crate::exp::pending::{Pending, Resolver};
use crate::exp::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// The render-scoped registry of sequence locks, keyed by the base
/// expression path of each sequentially-tagged call site (dot-joined,
/// `!` for the global key which covers every path).
///
/// A write owns its key and every descendant key exclusively: it waits
/// for the previous writer and all live readers on related keys, and
/// everything arriving later waits on it. A read waits only for the
/// current writer on its key and ancestors, and runs in parallel with
/// other reads. Registration is synchronous at acquisition, so program
/// textual order decides who waits on whom.
#[derive(Clone, Default)]
pub struct Sequences(Rc<RefCell<Registry>>);

#[derive(Default)]
struct Registry {
	keys: HashMap<String, KeyState>,
	failed: HashMap<String, Vec<Error>>,
}

#[derive(Default)]
struct KeyState {
	writer: Option<Pending>,
	readers: Vec<Pending>,
}

/// Check whether lock key `a` covers lock key `b`: the same key, an
/// ancestor path, or the global key.
fn covers(a: &str, b: &str) -> bool {
	a == GLOBAL_LOCK_KEY || a == b || b.starts_with(a) && b[a.len()..].starts_with('.')
}

fn related(a: &str, b: &str) -> bool {
	covers(a, b) || covers(b, a)
}

impl Sequences {
	pub fn new() -> Self {
		Self::default()
	}

	/// Acquire exclusive ownership of a key and its descendants. The
	/// returned guard must be waited before the operation runs and
	/// released when it completes.
	pub fn acquire_write(&self, key: &str) -> WriteLock {
		let mut registry = self.0.borrow_mut();
		let mut waits = Vec::new();
		for (entry_key, state) in registry.keys.iter_mut() {
			if related(entry_key, key) {
				if let Some(writer) = &state.writer {
					if !writer.is_settled() {
						waits.push(writer.clone());
					}
				}
				state.readers.retain(|r| !r.is_settled());
				waits.extend(state.readers.iter().cloned());
			}
		}
		let (pending, resolver) = Pending::new();
		let entry = registry.keys.entry(key.to_owned()).or_default();
		entry.writer = Some(pending.clone());
		trace!("write lock on '{key}' waiting on {} holder(s)", waits.len());
		WriteLock {
			sequences: self.clone(),
			key: key.to_owned(),
			waits,
			resolver: Some(resolver),
		}
	}

	/// Acquire shared ownership of a key: waits for the current writer
	/// on the key and its ancestors, then overlaps with other readers.
	pub fn acquire_read(&self, key: &str) -> ReadLock {
		let mut registry = self.0.borrow_mut();
		let mut waits = Vec::new();
		for (entry_key, state) in registry.keys.iter() {
			if covers(entry_key, key) {
				if let Some(writer) = &state.writer {
					if !writer.is_settled() {
						waits.push(writer.clone());
					}
				}
			}
		}
		let (pending, resolver) = Pending::new();
		let entry = registry.keys.entry(key.to_owned()).or_default();
		entry.readers.push(pending.clone());
		trace!("read lock on '{key}' waiting on {} writer(s)", waits.len());
		ReadLock {
			key: key.to_owned(),
			waits,
			resolver: Some(resolver),
		}
	}

	/// Record a failed sequential operation so an enclosing guard can
	/// repair the key.
	fn record_failure(&self, key: &str, error: Error) {
		let error = match error {
			error @ Error::SequenceFailed {
				..
			} => error,
			error => Error::SequenceFailed {
				key: key.to_owned(),
				message: error.to_string(),
			},
		};
		self.0.borrow_mut().failed.entry(key.to_owned()).or_default().push(error);
	}

	/// Check whether any key covered by the given guard key has a
	/// recorded failure.
	pub fn has_failure(&self, guard_key: &str) -> bool {
		self.0.borrow().failed.keys().any(|k| covers(guard_key, k))
	}

	/// Take and clear the failures recorded under a guard key,
	/// repairing the covered locks for downstream users.
	pub fn repair(&self, guard_key: &str) -> Vec<Error> {
		let mut registry = self.0.borrow_mut();
		let keys: Vec<String> =
			registry.failed.keys().filter(|k| covers(guard_key, k)).cloned().collect();
		let mut errors = Vec::new();
		for key in keys {
			if let Some(mut recorded) = registry.failed.remove(&key) {
				errors.append(&mut recorded);
			}
		}
		errors
	}

	/// The failures recorded across every key, in no particular order,
	/// surfaced at render end when no guard repaired them.
	pub fn unrepaired(&self) -> Vec<Error> {
		self.0.borrow().failed.values().flatten().cloned().collect()
	}

	fn release(&self, key: &str, handle: &Pending, write: bool) {
		let mut registry = self.0.borrow_mut();
		if let Some(state) = registry.keys.get_mut(key) {
			if write {
				if state.writer.as_ref().is_some_and(|w| w.same(handle)) {
					state.writer = None;
				}
			} else {
				state.readers.retain(|r| !r.same(handle));
			}
			if state.writer.is_none() && state.readers.is_empty() {
				registry.keys.remove(key);
			}
		}
	}
}

/// Exclusive ownership of a lock key while held.
pub struct WriteLock {
	sequences: Sequences,
	key: String,
	waits: Vec<Pending>,
	resolver: Option<Resolver>,
}

impl WriteLock {
	/// Wait for every holder this lock is queued behind
	pub async fn wait(&mut self) {
		for pending in std::mem::take(&mut self.waits) {
			pending.value().await;
		}
	}

	/// Release the lock, unblocking the next queued writer
	pub fn release(mut self) {
		self.unlock();
	}

	/// Record the operation's failure on the key, then release so
	/// downstream users are not blocked forever
	pub fn fail(mut self, error: Error) {
		self.sequences.record_failure(&self.key, error);
		self.unlock();
	}

	fn unlock(&mut self) {
		if let Some(resolver) = self.resolver.take() {
			let handle = resolver.pending();
			resolver.resolve(Value::None);
			self.sequences.release(&self.key, &handle, true);
		}
	}
}

impl Drop for WriteLock {
	fn drop(&mut self) {
		self.unlock();
	}
}

/// Shared ownership of a lock key while held.
pub struct ReadLock {
	key: String,
	waits: Vec<Pending>,
	resolver: Option<Resolver>,
}

impl ReadLock {
	/// Wait for the writers this read is queued behind
	pub async fn wait(&mut self) {
		for pending in std::mem::take(&mut self.waits) {
			pending.value().await;
		}
	}

	/// Release the read
	pub fn release(mut self) {
		self.unlock();
	}

	fn unlock(&mut self) {
		if let Some(resolver) = self.resolver.take() {
			resolver.resolve(Value::None);
		}
	}
}

impl Drop for ReadLock {
	fn drop(&mut self) {
		self.unlock();
	}
}

impl std::fmt::Debug for WriteLock {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "WriteLock({})", self.key)
	}
}

impl std::fmt::Debug for ReadLock {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "ReadLock({})", self.key)
	}
}
