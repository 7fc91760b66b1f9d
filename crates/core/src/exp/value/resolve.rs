use crate::cnf::MAX_CONCURRENT_RESOLVES;
use crate::exp::array::Array;
use crate::exp::object::Object;
use crate::exp::poison::Poison;
use crate::exp::value::Value;
use async_recursion::async_recursion;
use futures::stream::{self, StreamExt};

/// Attach the resolve marker to an object literal if any of its
/// depth-one entries may still be pending. Poison entries are not
/// dependencies: they are carried as-is so a later write may overwrite
/// them. The container is returned unchanged otherwise.
pub fn create_object(mut obj: Object) -> Object {
	obj.deferred = obj.entries.values().any(Value::needs_resolve);
	obj
}

/// Attach the resolve marker to an array literal if any of its
/// depth-one elements may still be pending.
pub fn create_array(mut arr: Array) -> Array {
	arr.deferred = arr.items.iter().any(Value::needs_resolve);
	arr
}

/// Re-attach the marker on any container value; other values pass
/// through. Re-attachment on an already-resolved container is a no-op.
pub fn mark(value: Value) -> Value {
	match value {
		Value::Object(v) => Value::Object(create_object(v)),
		Value::Array(v) => Value::Array(create_array(v)),
		value => value,
	}
}

impl Value {
	/// Resolve this value for observation. The synchronous shortcut:
	/// a value which is neither pending nor marked is returned as-is
	/// without suspending. Otherwise the pending is awaited first, then
	/// the marker, in that order; poison propagates.
	///
	/// Resolution is idempotent: resolving a resolved value returns it
	/// unchanged.
	pub async fn resolve(self) -> Value {
		if !self.needs_resolve() {
			return self;
		}
		resolve_value(self).await
	}

	/// Resolve this value in place, preserving the binding. The
	/// container reference observed by the caller is the same one that
	/// ends up fully concrete.
	pub async fn resolve_in_place(&mut self) {
		if self.needs_resolve() {
			let value = std::mem::take(self);
			*self = resolve_value(value).await;
		}
	}

	/// Attach the marker and await it, yielding a value whose own
	/// properties are all concrete.
	pub async fn resolve_object_properties(self) -> Value {
		mark(self).resolve().await
	}
}

/// Resolve every value in the list. If any entry carries errors, the
/// result is a single poison aggregating them in input order; otherwise
/// the unwrapped concrete list.
pub async fn resolve_all(values: Vec<Value>) -> Result<Vec<Value>, Poison> {
	let resolved: Vec<Value> =
		stream::iter(values.into_iter().map(resolve_value)).buffered(*MAX_CONCURRENT_RESOLVES).collect().await;
	let mut poison: Option<Poison> = None;
	for value in &resolved {
		if let Value::Poison(p) = value {
			poison = Some(match poison {
				Some(prev) => prev.merge(p),
				None => p.clone(),
			});
		}
	}
	match poison {
		Some(p) => Err(p),
		None => Ok(resolved),
	}
}

/// The marker completion: await the value-pending first, then each
/// marked dependency, writing resolved children back at their original
/// key or index. A child's own marker is awaited through recursion; the
/// parent never re-copies a child that resolves itself. A dependency
/// which settles with poison turns the whole container into one poison
/// carrying the aggregated error list.
#[async_recursion(?Send)]
pub(crate) async fn resolve_value(value: Value) -> Value {
	match value {
		Value::Pending(p) => {
			let mut value = p.value().await;
			while let Value::Pending(p) = value {
				value = p.value().await;
			}
			resolve_value(value).await
		}
		Value::Array(arr) if arr.deferred => {
			let items: Vec<Value> =
				stream::iter(arr.items.into_iter().map(resolve_entry)).buffered(*MAX_CONCURRENT_RESOLVES).collect().await;
			match harvest(&items) {
				Some(poison) => Value::Poison(poison),
				None => Value::Array(Array {
					items,
					deferred: false,
				}),
			}
		}
		Value::Object(obj) if obj.deferred => {
			let keys: Vec<String> = obj.entries.keys().cloned().collect();
			let values: Vec<Value> =
				stream::iter(obj.entries.into_values().map(resolve_entry)).buffered(*MAX_CONCURRENT_RESOLVES).collect().await;
			match harvest(&values) {
				Some(poison) => Value::Poison(poison),
				None => Value::Object(Object {
					entries: keys.into_iter().zip(values).collect(),
					deferred: false,
				}),
			}
		}
		value => value,
	}
}

/// Resolve one dependency of a marked container. A directly-poisoned
/// entry is not a dependency and passes through untouched.
async fn resolve_entry(value: Value) -> Value {
	match value {
		Value::Poison(_) => value,
		value if value.needs_resolve() => resolve_value(value).await,
		value => value,
	}
}

/// Aggregate the poison discovered across a container's resolved
/// dependencies, in entry order.
fn harvest(values: &[Value]) -> Option<Poison> {
	let mut poison: Option<Poison> = None;
	for value in values {
		if let Value::Poison(p) = value {
			poison = Some(match poison {
				Some(prev) => prev.merge(p),
				None => p.clone(),
			});
		}
	}
	poison
}

impl Value {
	/// Deep-scan a concrete container for poison carried by any nested
	/// entry, aggregating in traversal order. Used when a container is
	/// coerced to output, where poison must surface rather than print.
	pub fn find_poison(&self) -> Option<Poison> {
		match self {
			Value::Poison(p) => Some(p.clone()),
			Value::Array(arr) => harvest_deep(arr.items.iter()),
			Value::Object(obj) => harvest_deep(obj.entries.values()),
			_ => None,
		}
	}
}

fn harvest_deep<'a, I: Iterator<Item = &'a Value>>(values: I) -> Option<Poison> {
	let mut poison: Option<Poison> = None;
	for value in values {
		if let Some(p) = value.find_poison() {
			poison = Some(match poison {
				Some(prev) => prev.merge(&p),
				None => p,
			});
		}
	}
	poison
}
