use crate::cnf::MAX_FRAME_DEPTH;
use crate::err::Error;
use crate::exp::pending::{Pending, Resolver};
use crate::exp::poison::Poison;
use crate::exp::value::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;
use tracing::trace;

/// A lexical scope in the runtime stack. Frames point upward only, so
/// the chain is a tree of cheap shared handles with no ownership
/// cycles. All mutation happens under the single-threaded cooperative
/// scheduler, so interior mutability needs no locking.
///
/// An async frame carries the write counters and snapshot resolvers
/// which let a parent read variables a child closure has not finished
/// writing yet: the parent-side binding is a pending which the child's
/// final write settles.
#[derive(Clone)]
pub struct Frame(Rc<RefCell<Inner>>);

struct Inner {
	parent: Option<Frame>,
	/// Whether declarations bind here or at the nearest scoping ancestor
	scope: bool,
	/// Whether lookups stop here instead of reading parent scopes
	isolated: bool,
	/// Whether this frame was pushed for an async closure
	is_async: bool,
	/// Whether the closure under this frame runs sequentially
	sequential: bool,
	depth: u32,
	/// Values for declarations bound at this scope
	variables: HashMap<String, Value>,
	/// Names declared at this scope
	declared: HashSet<String>,
	/// Snapshot and shadow bindings: reads here win over `variables`
	async_vars: HashMap<String, Value>,
	/// The resolver fired when a name's write counter reaches zero
	resolvers: HashMap<String, Resolver>,
	/// Outstanding writes registered for this closure, per name
	write_counts: HashMap<String, usize>,
	/// Names this closure reads, directly or on behalf of a child
	read_vars: HashSet<String>,
}

impl Debug for Frame {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let inner = self.0.borrow();
		f.debug_struct("Frame")
			.field("depth", &inner.depth)
			.field("scope", &inner.scope)
			.field("is_async", &inner.is_async)
			.field("declared", &inner.declared)
			.finish()
	}
}

impl Default for Frame {
	fn default() -> Self {
		Self::new()
	}
}

impl Frame {
	/// Create the root frame of a render
	pub fn new() -> Frame {
		Frame(Rc::new(RefCell::new(Inner {
			parent: None,
			scope: true,
			isolated: false,
			is_async: false,
			sequential: false,
			depth: 0,
			variables: HashMap::new(),
			declared: HashSet::new(),
			async_vars: HashMap::new(),
			resolvers: HashMap::new(),
			write_counts: HashMap::new(),
			read_vars: HashSet::new(),
		})))
	}

	/// Check whether two handles are the same frame
	pub fn same(&self, other: &Frame) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	pub fn depth(&self) -> u32 {
		self.0.borrow().depth
	}

	pub fn is_async(&self) -> bool {
		self.0.borrow().is_async
	}

	pub fn is_sequential(&self) -> bool {
		self.0.borrow().sequential
	}

	pub fn parent(&self) -> Option<Frame> {
		self.0.borrow().parent.clone()
	}

	/// Push a plain child frame
	pub fn push(&self, scope: bool, isolated: bool) -> Result<Frame, Error> {
		let depth = self.depth() + 1;
		if depth > *MAX_FRAME_DEPTH {
			return Err(Error::DepthExceeded);
		}
		Ok(Frame(Rc::new(RefCell::new(Inner {
			parent: Some(self.clone()),
			scope,
			isolated,
			is_async: false,
			sequential: false,
			depth,
			variables: HashMap::new(),
			declared: HashSet::new(),
			async_vars: HashMap::new(),
			resolvers: HashMap::new(),
			write_counts: HashMap::new(),
			read_vars: HashSet::new(),
		}))))
	}

	/// Push a frame for an async closure. The child snapshots each read
	/// variable's current value first, so it observes the state at push
	/// time regardless of later parent writes. Then, for each
	/// registered write, a fresh pending is installed as the
	/// parent-side binding: reads in the parent, and snapshots taken by
	/// later siblings, wait for the post-child value. An enclosing
	/// block which is still counting the same name keeps gating its own
	/// ancestors, so only settled or absent bindings above the pushing
	/// frame are replaced.
	pub fn push_async_block(
		&self,
		reads: &[&str],
		writes: &[(&str, usize)],
		sequential: bool,
	) -> Result<Frame, Error> {
		let depth = self.depth() + 1;
		if depth > *MAX_FRAME_DEPTH {
			return Err(Error::DepthExceeded);
		}
		let child = Frame(Rc::new(RefCell::new(Inner {
			parent: Some(self.clone()),
			scope: false,
			isolated: false,
			is_async: true,
			sequential,
			depth,
			variables: HashMap::new(),
			declared: HashSet::new(),
			async_vars: HashMap::new(),
			resolvers: HashMap::new(),
			write_counts: HashMap::new(),
			read_vars: reads.iter().map(|s| (*s).to_owned()).collect(),
		})));
		// Snapshot the read set before any write shadows are installed
		for name in reads {
			if let Some(value) = self.lookup(name) {
				child.0.borrow_mut().async_vars.insert((*name).to_owned(), value);
			}
		}
		// Register the write counters and install the parent bindings
		for (name, count) in writes {
			if *count == 0 {
				continue;
			}
			let (pending, resolver) = Pending::new();
			{
				let mut inner = child.0.borrow_mut();
				inner.write_counts.insert((*name).to_owned(), *count);
				inner.resolvers.insert((*name).to_owned(), resolver);
			}
			trace!("registering {count} write(s) for '{name}' at depth {depth}");
			let target = match self.declaring_frame(name) {
				Some(frame) => frame,
				// An undeclared write target binds at the nearest scope
				None => {
					let scope = self.nearest_scope();
					let mut inner = scope.0.borrow_mut();
					inner.declared.insert((*name).to_owned());
					inner.variables.insert((*name).to_owned(), Value::None);
					drop(inner);
					scope
				}
			};
			// Install the pending as the binding every observer between
			// here and the declaring scope reads. An enclosing block
			// which itself counts this name keeps gating everything
			// above it, so installation stops at that boundary.
			let mut install = self.clone();
			loop {
				let counting = {
					let mut inner = install.0.borrow_mut();
					inner.async_vars.insert((*name).to_owned(), Value::Pending(pending.clone()));
					inner.write_counts.get(*name).is_some_and(|c| *c > 0)
				};
				if counting || install.same(&target) {
					break;
				}
				match install.parent() {
					Some(parent) => install = parent,
					None => break,
				}
			}
		}
		Ok(child)
	}

	/// Pop this frame, returning its parent. Popping a frame whose
	/// write counters are still positive, or popping the root, is a
	/// breach of the compiler contract and fatal.
	pub fn pop(&self) -> Result<Frame, Error> {
		{
			let inner = self.0.borrow();
			let mut names: Vec<String> = inner
				.write_counts
				.iter()
				.filter(|(_, count)| **count > 0)
				.map(|(name, _)| name.clone())
				.collect();
			if !names.is_empty() {
				names.sort();
				return Err(Error::PendingWrites {
					names,
				});
			}
		}
		let parent = self.parent().ok_or(Error::PoppedRoot)?;
		let expected = self.depth().saturating_sub(1);
		let found = parent.depth();
		if found != expected {
			return Err(Error::FrameBalance {
				expected,
				found,
			});
		}
		Ok(parent)
	}

	/// The frame at which a name is declared, walking the scope chain
	pub fn declaring_frame(&self, name: &str) -> Option<Frame> {
		let mut frame = self.clone();
		loop {
			let (declared, isolated, parent) = {
				let inner = frame.0.borrow();
				(inner.declared.contains(name), inner.isolated, inner.parent.clone())
			};
			if declared {
				return Some(frame);
			}
			if isolated {
				return None;
			}
			frame = parent?;
		}
	}

	/// The nearest frame at which declarations may bind
	pub fn nearest_scope(&self) -> Frame {
		let mut frame = self.clone();
		loop {
			let (scope, parent) = {
				let inner = frame.0.borrow();
				(inner.scope, inner.parent.clone())
			};
			if scope || parent.is_none() {
				return frame;
			}
			frame = parent.unwrap();
		}
	}

	/// Declare a variable, binding at this frame if it creates a scope
	/// or at the nearest scoping ancestor otherwise
	pub fn declare(&self, name: &str, value: Value) {
		let scope = self.nearest_scope();
		let mut inner = scope.0.borrow_mut();
		inner.declared.insert(name.to_owned());
		inner.variables.insert(name.to_owned(), value);
		inner.async_vars.remove(name);
	}

	/// Check whether a name is declared in any reachable scope
	pub fn is_declared(&self, name: &str) -> bool {
		self.declaring_frame(name).is_some()
	}

	/// Every declared name visible from this frame
	pub fn visible_names(&self) -> Vec<String> {
		let mut names: HashSet<String> = HashSet::new();
		let mut frame = self.clone();
		loop {
			let (declared, isolated, parent) = {
				let inner = frame.0.borrow();
				(inner.declared.clone(), inner.isolated, inner.parent.clone())
			};
			names.extend(declared);
			if isolated {
				break;
			}
			match parent {
				Some(p) => frame = p,
				None => break,
			}
		}
		let mut names: Vec<String> = names.into_iter().collect();
		names.sort();
		names
	}

	/// Look up a variable, walking the scope chain. Shadow bindings
	/// win over declared values, so a name with outstanding writes
	/// reads as the pending which those writes will settle.
	pub fn lookup(&self, name: &str) -> Option<Value> {
		self.lookup_and_locate(name).map(|(value, _)| value)
	}

	/// Look up a variable together with the frame it was found in
	pub fn lookup_and_locate(&self, name: &str) -> Option<(Value, Frame)> {
		let mut frame = self.clone();
		loop {
			let (found, isolated, parent) = {
				let inner = frame.0.borrow();
				let found = inner
					.async_vars
					.get(name)
					.or_else(|| inner.variables.get(name))
					.cloned();
				(found, inner.isolated, inner.parent.clone())
			};
			if let Some(value) = found {
				return Some((value, frame));
			}
			if isolated {
				return None;
			}
			frame = parent?;
		}
	}

	/// Write a variable into its declaring scope. Under an async block
	/// which registered writes for the name, the counter decrements at
	/// every registered frame along the chain; a counter reaching zero
	/// fires its snapshot resolver with the latest value.
	pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
		let target = self.declaring_frame(name).ok_or_else(|| {
			Error::UndeclaredAssign(name.to_owned())
		})?;
		self.write_event(name, value, &target);
		Ok(())
	}

	/// One write event: decrement counters along the chain, refresh the
	/// bindings below the outermost still-counting block, commit to the
	/// declaring scope when no counter on the chain remains
	/// outstanding, and fire whichever resolvers reached zero.
	fn write_event(&self, name: &str, value: Value, target: &Frame) {
		let chain = self.chain_to(target);
		// The writer's own view updates immediately
		self.0.borrow_mut().async_vars.insert(name.to_owned(), value.clone());
		// Decrement every registered counter along the chain
		let mut fired: Vec<Resolver> = Vec::new();
		let mut fired_cells: Vec<Pending> = Vec::new();
		let mut outstanding = false;
		for frame in &chain {
			let mut inner = frame.0.borrow_mut();
			if let Some(count) = inner.write_counts.get_mut(name) {
				if *count == 0 {
					// Contract breach surfaced at block completion
					continue;
				}
				*count -= 1;
				if *count == 0 {
					trace!("write counter for '{name}' reached zero at depth {}", inner.depth);
					if let Some(resolver) = inner.resolvers.remove(name) {
						fired_cells.push(resolver.pending());
						fired.push(resolver);
					}
				} else {
					outstanding = true;
				}
			}
		}
		// A counted write commits to the declaring scope only while its
		// own pending is still the installed binding there: a later
		// sibling which re-bound the name owns the final value, so a
		// late completion must not clobber it. Uncounted writes always
		// commit.
		let current = {
			let inner = target.0.borrow();
			match inner.async_vars.get(name) {
				Some(Value::Pending(p)) => fired_cells.iter().any(|c| c.same(p)),
				_ => fired_cells.is_empty(),
			}
		};
		// Refresh bindings from the writer upward. Below the outermost
		// still-counting block, stale bindings become the new value so
		// reads inside that block observe it; a binding still gating
		// for an unrelated block is preserved. Once every counter on
		// the chain has drained, the value commits to the declaring
		// scope and the shadows clear.
		let mut gated = false;
		for frame in &chain {
			let mut inner = frame.0.borrow_mut();
			if !gated {
				let stale = match inner.async_vars.get(name) {
					Some(Value::Pending(p)) => {
						p.is_settled() || fired_cells.iter().any(|c| c.same(p))
					}
					Some(_) => true,
					None => !outstanding,
				};
				if stale {
					if outstanding {
						inner.async_vars.insert(name.to_owned(), value.clone());
					} else {
						inner.async_vars.remove(name);
					}
				}
			}
			if inner.write_counts.get(name).is_some_and(|c| *c > 0) {
				gated = true;
			}
		}
		if !outstanding && current {
			target.0.borrow_mut().variables.insert(name.to_owned(), value.clone());
		}
		// Settle the snapshots outside any borrow
		for resolver in fired {
			resolver.resolve(value.clone());
		}
	}

	/// Overwrite a variable directly, bypassing counters. Used by guard
	/// recovery to restore a snapshot.
	pub fn force_set(&self, name: &str, value: Value) {
		let target = match self.declaring_frame(name) {
			Some(frame) => frame,
			None => self.nearest_scope(),
		};
		for frame in self.chain_to(&target) {
			frame.0.borrow_mut().async_vars.remove(name);
		}
		let mut inner = target.0.borrow_mut();
		inner.declared.insert(name.to_owned());
		inner.variables.insert(name.to_owned(), value);
	}

	/// Abort this closure's registered writes: each remaining count is
	/// drained with poison so parents do not wait forever. A slot which
	/// already holds poison aggregates rather than being replaced.
	pub fn poison_branch_writes(&self, poison: &Poison) {
		let counts: Vec<(String, usize)> = {
			let inner = self.0.borrow();
			inner.write_counts.iter().filter(|(_, c)| **c > 0).map(|(n, c)| (n.clone(), *c)).collect()
		};
		for (name, count) in counts {
			let target = match self.declaring_frame(&name) {
				Some(frame) => frame,
				None => self.nearest_scope(),
			};
			// Aggregate with the committed slot value, not the pending
			// binding these writes are about to settle
			let value = match target.0.borrow().variables.get(&name) {
				Some(Value::Poison(prev)) => Value::Poison(prev.merge(poison)),
				_ => Value::Poison(poison.clone()),
			};
			for _ in 0..count {
				self.write_event(&name, value.clone(), &target);
			}
		}
	}

	/// The names of this closure's registered writes which are still
	/// outstanding
	pub fn pending_writes(&self) -> Vec<String> {
		let inner = self.0.borrow();
		let mut names: Vec<String> =
			inner.write_counts.iter().filter(|(_, c)| **c > 0).map(|(n, _)| n.clone()).collect();
		names.sort();
		names
	}

	/// The handles from this frame up to and including the target
	fn chain_to(&self, target: &Frame) -> Vec<Frame> {
		let mut chain = Vec::new();
		let mut frame = self.clone();
		loop {
			chain.push(frame.clone());
			if frame.same(target) {
				break;
			}
			match frame.parent() {
				Some(parent) => frame = parent,
				None => break,
			}
		}
		chain
	}
}
