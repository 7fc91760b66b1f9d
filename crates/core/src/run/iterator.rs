use crate::ctx::Frame;
use crate::err::Error;
use crate::exp::poison::Poison;
use crate::exp::value::Value;
use crate::run::state::AsyncState;
use futures::stream::LocalBoxStream;
use futures::StreamExt;
use std::rc::Rc;
use tracing::trace;

/// What a loop iterates over: a settled value (arrays element-wise,
/// objects as key/value pairs) or an async stream, which covers async
/// iterators, generators, and async generators alike.
pub enum Iterable {
	Value(Value),
	Stream(LocalBoxStream<'static, Value>),
}

impl From<Value> for Iterable {
	fn from(v: Value) -> Self {
		Iterable::Value(v)
	}
}

/// One loop iteration: receives the item and its index.
pub type IterBody =
	Rc<dyn Fn(AsyncState, Frame, Value, usize) -> futures::future::LocalBoxFuture<'static, Result<Value, Error>>>;

/// The `else` arm: receives the iterable's poison when the loop was
/// skipped because evaluation failed.
pub type ElseArm =
	Rc<dyn Fn(AsyncState, Frame, Option<Poison>) -> futures::future::LocalBoxFuture<'static, Result<Value, Error>>>;

/// A `while` condition.
pub type CondFn =
	Rc<dyn Fn(AsyncState, Frame) -> futures::future::LocalBoxFuture<'static, Result<Value, Error>>>;

enum Items {
	/// The loop body is skipped; the poison reaches the else arm
	Poisoned(Poison),
	/// Settled items, iterated in order
	Settled(Vec<Value>),
	/// Items arriving from a stream
	Streamed(LocalBoxStream<'static, Value>),
}

/// Evaluate the iterable expression once. Objects iterate as
/// `[key, value]` pairs; a non-iterable is a soft error.
async fn into_items(iterable: Iterable) -> Items {
	match iterable {
		Iterable::Stream(stream) => Items::Streamed(stream),
		Iterable::Value(value) => {
			let value = value.resolve().await;
			match value {
				Value::Poison(p) => Items::Poisoned(p),
				Value::Array(arr) => Items::Settled(arr.items),
				Value::Object(obj) => Items::Settled(
					obj.entries
						.into_iter()
						.map(|(k, v)| Value::from(vec![Value::from(k), v]))
						.collect(),
				),
				Value::None | Value::Null => Items::Settled(Vec::new()),
				value => Items::Poisoned(Poison::new(Error::InvalidLoopTarget(
					value.kindof().to_owned(),
				))),
			}
		}
	}
}

/// The poison path shared by the drivers: the body is skipped, the
/// variables the body would have written are poisoned at their declared
/// write counts, and the else arm runs in the poisoned context. The
/// poison is returned so the render surfaces it at the end.
async fn poison_loop(
	state: &AsyncState,
	frame: &Frame,
	reads: &[&str],
	writes: &[(&str, usize)],
	poison: Poison,
	else_arm: Option<&ElseArm>,
) -> Result<Value, Error> {
	if !writes.is_empty() {
		let child = frame.push_async_block(reads, writes, false)?;
		child.poison_branch_writes(&poison);
		child.pop()?;
	}
	if let Some(arm) = else_arm {
		arm(state.clone(), frame.clone(), Some(poison.clone())).await?;
	}
	Ok(Value::Poison(poison))
}

/// The parallel `for` driver: every iteration is an independent async
/// closure; iterations interleave freely and the enclosing block's
/// counters see all of their writes.
pub async fn for_parallel(
	state: &AsyncState,
	frame: &Frame,
	iterable: Iterable,
	reads: &[&str],
	writes: &[(&str, usize)],
	body: IterBody,
	else_arm: Option<ElseArm>,
) -> Result<Value, Error> {
	match into_items(iterable).await {
		Items::Poisoned(poison) => {
			poison_loop(state, frame, reads, writes, poison, else_arm.as_ref()).await
		}
		Items::Settled(items) => {
			if items.is_empty() {
				if let Some(arm) = else_arm {
					arm(state.clone(), frame.clone(), None).await?;
				}
				return Ok(Value::None);
			}
			trace!("spawning {} parallel iteration(s)", items.len());
			for (index, item) in items.into_iter().enumerate() {
				let body = body.clone();
				state.async_block(frame, reads, writes, false, false, move |state, child| {
					body(state, child, item, index)
				})?;
			}
			Ok(Value::None)
		}
		Items::Streamed(mut stream) => {
			let mut index = 0;
			while let Some(item) = stream.next().await {
				let body = body.clone();
				state.async_block(frame, reads, writes, false, false, move |state, child| {
					body(state, child, item, index)
				})?;
				index += 1;
			}
			if index == 0 {
				if let Some(arm) = else_arm {
					arm(state.clone(), frame.clone(), None).await?;
				}
			}
			Ok(Value::None)
		}
	}
}

/// The sequential `each` driver: iterations run in order, each awaited
/// before the next begins. `break` and `continue` steer it; a poison
/// item enters the body's poison path for that iteration and the
/// iteration still completes.
pub async fn for_each(
	state: &AsyncState,
	frame: &Frame,
	iterable: Iterable,
	reads: &[&str],
	writes: &[(&str, usize)],
	body: IterBody,
	else_arm: Option<ElseArm>,
) -> Result<Value, Error> {
	match into_items(iterable).await {
		Items::Poisoned(poison) => {
			poison_loop(state, frame, reads, writes, poison, else_arm.as_ref()).await
		}
		Items::Settled(items) => {
			if items.is_empty() {
				if let Some(arm) = else_arm {
					arm(state.clone(), frame.clone(), None).await?;
				}
				return Ok(Value::None);
			}
			for (index, item) in items.into_iter().enumerate() {
				match run_iteration(state, frame, &body, item, index).await {
					Err(Error::Break) => break,
					Err(Error::Continue) => continue,
					Err(e) => return Err(e),
					Ok(_) => (),
				}
			}
			Ok(Value::None)
		}
		Items::Streamed(mut stream) => {
			let mut index = 0;
			while let Some(item) = stream.next().await {
				match run_iteration(state, frame, &body, item, index).await {
					Err(Error::Break) => break,
					Err(Error::Continue) => {
						index += 1;
						continue;
					}
					Err(e) => return Err(e),
					Ok(_) => (),
				}
				index += 1;
			}
			if index == 0 {
				if let Some(arm) = else_arm {
					arm(state.clone(), frame.clone(), None).await?;
				}
			}
			Ok(Value::None)
		}
	}
}

/// One sequential iteration under its own scoped frame
async fn run_iteration(
	state: &AsyncState,
	frame: &Frame,
	body: &IterBody,
	item: Value,
	index: usize,
) -> Result<Value, Error> {
	let child = frame.push(true, false)?;
	let result = body(state.clone(), child.clone(), item, index).await;
	child.pop()?;
	result
}

/// The `while` driver: the condition may suspend; a poisoned condition
/// stops the loop and propagates.
pub async fn while_loop(
	state: &AsyncState,
	frame: &Frame,
	cond: CondFn,
	body: IterBody,
) -> Result<Value, Error> {
	let mut index = 0;
	loop {
		let decision = cond(state.clone(), frame.clone()).await?.resolve().await;
		if let Value::Poison(_) = decision {
			return Ok(decision);
		}
		if !decision.is_truthy() {
			return Ok(Value::None);
		}
		match run_iteration(state, frame, &body, Value::from(index), index).await {
			Err(Error::Break) => return Ok(Value::None),
			Err(Error::Continue) | Ok(_) => (),
			Err(e) => return Err(e),
		}
		index += 1;
	}
}
