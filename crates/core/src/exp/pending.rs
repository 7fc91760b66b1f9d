use crate::exp::value::Value;
use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A single-shot promise for a [`Value`] which has not been produced
/// yet. Cloned handles share the same cell; equality is identity. The
/// cell is settled exactly once, by its [`Resolver`], after which every
/// waiter observes the same value.
///
/// A pending may settle with poison, but poison itself is never
/// pending.
#[derive(Clone)]
pub struct Pending {
	cell: Rc<RefCell<Cell>>,
}

struct Cell {
	value: Option<Value>,
	wakers: Vec<Waker>,
}

/// The write side of a [`Pending`]. Firing consumes the resolver, so a
/// cell can not be settled twice.
pub struct Resolver {
	cell: Rc<RefCell<Cell>>,
}

impl Pending {
	/// Create an unsettled cell and the resolver which will settle it
	pub fn new() -> (Pending, Resolver) {
		let cell = Rc::new(RefCell::new(Cell {
			value: None,
			wakers: Vec::new(),
		}));
		(
			Pending {
				cell: cell.clone(),
			},
			Resolver {
				cell,
			},
		)
	}

	/// Create a cell which is already settled with the given value
	pub fn settled(value: Value) -> Pending {
		Pending {
			cell: Rc::new(RefCell::new(Cell {
				value: Some(value),
				wakers: Vec::new(),
			})),
		}
	}

	/// Observe the settled value without suspending, if there is one
	pub fn try_value(&self) -> Option<Value> {
		self.cell.borrow().value.clone()
	}

	/// Check whether the cell has been settled
	pub fn is_settled(&self) -> bool {
		self.cell.borrow().value.is_some()
	}

	/// Await the settled value
	pub fn value(&self) -> PendingValue {
		PendingValue {
			pending: self.clone(),
		}
	}

	/// Check whether two handles share the same cell
	pub fn same(&self, other: &Pending) -> bool {
		Rc::ptr_eq(&self.cell, &other.cell)
	}
}

impl Resolver {
	/// A handle on the cell this resolver will settle
	pub fn pending(&self) -> Pending {
		Pending {
			cell: self.cell.clone(),
		}
	}

	/// Settle the cell and wake every waiter
	pub fn resolve(self, value: Value) {
		let wakers = {
			let mut cell = self.cell.borrow_mut();
			debug_assert!(cell.value.is_none(), "pending settled twice");
			cell.value = Some(value);
			std::mem::take(&mut cell.wakers)
		};
		for waker in wakers {
			waker.wake();
		}
	}
}

/// The future returned by [`Pending::value`].
pub struct PendingValue {
	pending: Pending,
}

impl Future for PendingValue {
	type Output = Value;
	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Value> {
		let mut cell = self.pending.cell.borrow_mut();
		match &cell.value {
			Some(v) => Poll::Ready(v.clone()),
			None => {
				if !cell.wakers.iter().any(|w| w.will_wake(cx.waker())) {
					cell.wakers.push(cx.waker().clone());
				}
				Poll::Pending
			}
		}
	}
}

impl PartialEq for Pending {
	fn eq(&self, other: &Self) -> bool {
		self.same(other)
	}
}

impl Debug for Pending {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self.cell.borrow().value.as_ref() {
			Some(v) => write!(f, "Pending(settled {v:?})"),
			None => f.write_str("Pending(unsettled)"),
		}
	}
}
