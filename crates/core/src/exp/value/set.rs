use crate::err::Error;
use crate::exp::array::Array;
use crate::exp::number::Number;
use crate::exp::object::Object;
use crate::exp::part::{Next, Part};
use crate::exp::value::resolve::mark;
use crate::exp::value::Value;

impl Value {
	/// Copy-on-write deep path assignment. Returns a new root whose
	/// structure equals this one everywhere except that `path` now
	/// yields `val`; this value is unmodified at every level along the
	/// path.
	///
	/// A pending *value* does not force the surrounding structure
	/// async: the result is produced without suspending and the
	/// containing level carries the resolve marker. A pending *root*
	/// or pending computed *segment* does suspend, because the write
	/// location is not known until it settles. Poison discovered on the
	/// root or any segment aggregates in declaration order; a poison
	/// `val` is not inspected and is assigned as-is so a later write
	/// may overwrite it.
	pub async fn set_path(&self, path: &[Part], val: Value) -> Value {
		// Settle the write location inputs
		let mut errors = Vec::new();
		let mut root = self.clone();
		if let Value::Pending(p) = &root {
			root = p.value().await;
		}
		if let Value::Poison(p) = &root {
			errors.extend_from_slice(p.errors());
		}
		// Settle each computed segment in declaration order
		let mut parts = Vec::with_capacity(path.len());
		for part in path {
			match part {
				Part::Value(v) => {
					let mut key = v.clone();
					if let Value::Pending(p) = &key {
						key = p.value().await;
					}
					match key {
						Value::Poison(p) => errors.extend_from_slice(p.errors()),
						key => match key_part(&key) {
							Ok(part) => parts.push(part),
							Err(e) => errors.push(e),
						},
					}
				}
				part => parts.push(part.clone()),
			}
		}
		// Any poisoned input poisons the whole assignment
		if !errors.is_empty() {
			return Value::poison_all(errors);
		}
		// The write location is concrete, so the assignment is too
		match root.set_path_inner(&parts, val) {
			Ok(v) => v,
			Err(e) => Value::poison(e),
		}
	}

	/// Recursive structural update over concrete path segments. No
	/// suspension happens below this point: pending values ride along
	/// inside marked containers.
	fn set_path_inner(&self, path: &[Part], val: Value) -> Result<Value, Error> {
		match path.first() {
			// No more parts so the value replaces this position
			None => Ok(val),
			// The `[]` sentinel addresses the last element here
			Some(Part::Append) if path.len() > 1 => match self {
				Value::Array(arr) => match arr.items.len() {
					0 => Err(Error::LastOfEmptyArray),
					n => {
						let last = Part::Index(Number::from(n - 1));
						let child = arr.items[n - 1].set_path_inner(path.next(), val)?;
						self.set_single_path(&last, child)
					}
				},
				v => Err(Error::InvalidPath(format!(
					"cannot address the last element of {}",
					v.kindof()
				))),
			},
			Some(part) => {
				let child = self.child_for(part)?;
				let child = child.set_path_inner(path.next(), val)?;
				self.set_single_path(part, child)
			}
		}
	}

	/// The existing value at a path segment, for recursion to continue
	/// below it. Missing entries continue as none so a terminal write
	/// can still land; deeper writes into none fail in
	/// `set_single_path`.
	fn child_for(&self, part: &Part) -> Result<Value, Error> {
		match (self, part) {
			(Value::Object(v), Part::Field(f)) => {
				Ok(v.get(f.as_str()).cloned().unwrap_or(Value::None))
			}
			(Value::Object(v), Part::Index(i)) => {
				Ok(v.get(&i.to_string()).cloned().unwrap_or(Value::None))
			}
			(Value::Array(v), Part::Index(i)) => {
				Ok(v.get(i.to_usize()).cloned().unwrap_or(Value::None))
			}
			(Value::Array(_), Part::Append) => Ok(Value::None),
			(v, part) => Err(Error::InvalidPath(format!(
				"cannot set '{part}' on {}",
				v.kindof()
			))),
		}
	}

	/// Assign one level: shallow-copy the container and place the new
	/// child. If the child may still be pending, the copy carries the
	/// resolve marker so a later observation finalises it in place.
	fn set_single_path(&self, part: &Part, child: Value) -> Result<Value, Error> {
		match (self, part) {
			(Value::Object(v), Part::Field(f)) => {
				let mut entries = v.entries.clone();
				entries.insert(f.clone(), child);
				Ok(mark(Value::Object(Object {
					entries,
					deferred: v.deferred,
				})))
			}
			(Value::Object(v), Part::Index(i)) => {
				let mut entries = v.entries.clone();
				entries.insert(i.to_string(), child);
				Ok(mark(Value::Object(Object {
					entries,
					deferred: v.deferred,
				})))
			}
			(Value::Array(v), Part::Index(i)) => {
				let mut items = v.items.clone();
				let i = i.to_usize();
				if i >= items.len() {
					items.resize(i + 1, Value::Null);
				}
				items[i] = child;
				Ok(mark(Value::Array(Array {
					items,
					deferred: v.deferred,
				})))
			}
			(Value::Array(v), Part::Append) => {
				let mut items = v.items.clone();
				items.push(child);
				Ok(mark(Value::Array(Array {
					items,
					deferred: v.deferred,
				})))
			}
			(v, part) => Err(Error::InvalidPath(format!(
				"cannot set '{part}' on {}",
				v.kindof()
			))),
		}
	}
}

/// Convert a settled computed segment into a concrete path part.
fn key_part(key: &Value) -> Result<Part, Error> {
	match key {
		Value::Strand(s) if s.as_str() == "[]" => Ok(Part::Append),
		Value::Strand(s) => Ok(Part::Field(s.to_string())),
		Value::Number(n) if n.is_index() => Ok(Part::Index(*n)),
		v => Err(Error::InvalidPath(format!("invalid path segment of type {}", v.kindof()))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::pending::Pending;

	fn person(age: i64) -> Value {
		Value::from(map! {
			"age".to_owned() => Value::from(age)
		})
	}

	#[tokio::test]
	async fn set_none() {
		let val = person(34);
		let res = val.set_path(&[], Value::from(999)).await;
		assert_eq!(res, Value::from(999));
		assert_eq!(val, person(34));
	}

	#[tokio::test]
	async fn set_basic() {
		let val = Value::from(map! {
			"test".to_owned() => person(34)
		});
		let res = val.set_path(&[Part::from("test"), Part::from("age")], Value::from(21)).await;
		assert_eq!(res, Value::from(map! { "test".to_owned() => person(21) }));
		assert_eq!(val, Value::from(map! { "test".to_owned() => person(34) }));
	}

	#[tokio::test]
	async fn set_array() {
		let val = Value::from(map! {
			"items".to_owned() => Value::from(vec![Value::from(1), Value::from(2)])
		});
		let res = val.set_path(&[Part::from("items"), Part::from(1)], Value::from(9)).await;
		assert_eq!(
			res,
			Value::from(map! {
				"items".to_owned() => Value::from(vec![Value::from(1), Value::from(9)])
			})
		);
	}

	#[tokio::test]
	async fn set_array_append() {
		let val = Value::from(map! {
			"items".to_owned() => Value::from(vec![Value::from(1)])
		});
		let res = val.set_path(&[Part::from("items"), Part::Append], Value::from(2)).await;
		assert_eq!(
			res,
			Value::from(map! {
				"items".to_owned() => Value::from(vec![Value::from(1), Value::from(2)])
			})
		);
	}

	#[tokio::test]
	async fn append_addresses_last_in_non_terminal_position() {
		let val = Value::from(map! {
			"items".to_owned() => Value::from(vec![person(34), person(36)])
		});
		let res = val
			.set_path(&[Part::from("items"), Part::Append, Part::from("age")], Value::from(21))
			.await;
		assert_eq!(
			res,
			Value::from(map! {
				"items".to_owned() => Value::from(vec![person(34), person(21)])
			})
		);
	}

	#[tokio::test]
	async fn append_through_empty_array_is_an_error() {
		let val = Value::from(map! {
			"items".to_owned() => Value::from(Vec::<Value>::new())
		});
		let res = val
			.set_path(&[Part::from("items"), Part::Append, Part::from("age")], Value::from(1))
			.await;
		match res {
			Value::Poison(p) => {
				assert!(matches!(p.errors()[0], Error::LastOfEmptyArray));
			}
			v => panic!("expected poison, got {v:?}"),
		}
	}

	#[tokio::test]
	async fn copy_on_write_leaves_the_original_untouched() {
		let o = person(34);
		let o = o.set_path(&[Part::from("y")], Value::from(2)).await;
		let p = o.set_path(&[Part::from("z")], Value::from(3)).await;
		assert_eq!(o.pick(&[Part::from("z")]), Value::None);
		assert_eq!(p.pick(&[Part::from("z")]), Value::from(3));
		assert_eq!(p.pick(&[Part::from("y")]), Value::from(2));
	}

	#[tokio::test]
	async fn pending_value_keeps_the_structure_synchronous() {
		let (pending, resolver) = Pending::new();
		let val = Value::base();
		let res = val.set_path(&[Part::from("a")], Value::Pending(pending)).await;
		// The structure is observable before the value settles
		assert!(res.needs_resolve());
		resolver.resolve(Value::from(10));
		let res = res.resolve().await;
		assert_eq!(res.pick(&[Part::from("a")]), Value::from(10));
	}

	#[tokio::test]
	async fn pending_key_forces_the_result_to_wait() {
		let (pending, resolver) = Pending::new();
		resolver.resolve(Value::from("name"));
		let val = Value::base();
		let res = val
			.set_path(&[Part::Value(Value::Pending(pending))], Value::from("cascada"))
			.await;
		assert_eq!(res.pick(&[Part::from("name")]), Value::from("cascada"));
	}

	#[tokio::test]
	async fn poisoned_inputs_aggregate_in_declaration_order() {
		let root = Value::poison(Error::Thrown("root".to_owned()));
		let seg = Part::Value(Value::poison(Error::Thrown("segment".to_owned())));
		let res = root.set_path(&[seg], Value::from(1)).await;
		match res {
			Value::Poison(p) => {
				let messages: Vec<String> = p.errors().iter().map(|e| e.to_string()).collect();
				assert_eq!(messages, vec!["root", "segment"]);
			}
			v => panic!("expected poison, got {v:?}"),
		}
	}

	#[tokio::test]
	async fn poison_value_is_assigned_without_inspection() {
		let poison = Value::poison(Error::Thrown("later".to_owned()));
		let val = Value::base();
		let res = val.set_path(&[Part::from("a")], poison.clone()).await;
		assert_eq!(res.pick(&[Part::from("a")]), poison);
		// A later write overwrites it, preserving the lazy contract
		let res = res.set_path(&[Part::from("a")], Value::from(1)).await;
		assert_eq!(res.pick(&[Part::from("a")]), Value::from(1));
	}

	#[tokio::test]
	async fn deep_write_into_none_fails() {
		let val = person(34);
		let res = val.set_path(&[Part::from("missing"), Part::from("x")], Value::from(1)).await;
		assert!(res.is_poison());
	}
}
