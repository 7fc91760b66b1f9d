use crate::err::{Error, Position};
use crate::exp::part::{Next, Part};
use crate::exp::value::Value;
use crate::run::options::Mode;
use async_recursion::async_recursion;

impl Value {
	/// Synchronous member access on a settled object and key. In
	/// template mode a nil target reads as none; in script mode it is
	/// an error. A property holding a function is returned with this
	/// value bound as its receiver, so a later invocation dispatches on
	/// the object the function was read from.
	pub fn member(&self, key: &Value, mode: Mode) -> Result<Value, Error> {
		if self.is_nullish() {
			return match mode {
				Mode::Template => Ok(Value::None),
				Mode::Script => Err(Error::MemberOnNone {
					field: key.to_raw_string(),
					target: self.kindof().to_owned(),
				}),
			};
		}
		let found = match (self, key) {
			(Value::Object(v), Value::Strand(f)) => v.get(f.as_str()).cloned(),
			(Value::Object(v), Value::Number(i)) => v.get(&i.to_string()).cloned(),
			(Value::Array(v), Value::Number(i)) if i.is_index() => v.get(i.to_usize()).cloned(),
			_ => None,
		};
		Ok(match found {
			Some(Value::Func(f)) => Value::Func(f.bind(self.clone())),
			Some(v) => v,
			None => Value::None,
		})
	}

	/// Asynchronous member access. If neither input is pending this
	/// runs the synchronous path without suspending. If either is
	/// pending, both are settled first and the poison check repeats on
	/// the settled values. No error is ever missed: two synchronously
	/// poisoned inputs return their concatenated error lists, a single
	/// poisoned input is returned unchanged, preserving its identity.
	pub async fn member_async(&self, key: &Value, mode: Mode) -> Value {
		// Combine whatever poison is visible without suspending
		match (self, key) {
			(Value::Poison(a), Value::Poison(b)) => return Value::Poison(a.merge(b)),
			(Value::Poison(a), _) => return Value::Poison(a.clone()),
			(_, Value::Poison(b)) => return Value::Poison(b.clone()),
			_ => (),
		}
		if !self.is_pending() && !key.is_pending() {
			return match self.member(key, mode) {
				Ok(v) => v,
				Err(e) => Value::poison(e),
			};
		}
		// Settle both inputs, then repeat the poison check
		let obj = match self {
			Value::Pending(p) => p.value().await,
			v => v.clone(),
		};
		let key = match key {
			Value::Pending(p) => p.value().await,
			v => v.clone(),
		};
		match (&obj, &key) {
			(Value::Poison(a), Value::Poison(b)) => Value::Poison(a.merge(b)),
			(Value::Poison(a), _) => Value::Poison(a.clone()),
			(_, Value::Poison(b)) => Value::Poison(b.clone()),
			_ => match obj.member(&key, mode) {
				Ok(v) => v,
				Err(e) => Value::poison(e),
			},
		}
	}

	/// Walk a whole member path, settling whatever each step needs. A
	/// computed segment may itself be pending or poisoned; its errors
	/// combine with the base value's by the same never-miss rule as
	/// single member access.
	#[async_recursion(?Send)]
	pub async fn get_path(&self, path: &[Part], mode: Mode) -> Value {
		match path.first() {
			None => match self {
				Value::Pending(p) => p.value().await,
				v => v.clone(),
			},
			Some(part) => {
				let base = match self {
					Value::Pending(p) => p.value().await,
					v => v.clone(),
				};
				let found = match (&base, part) {
					// The last-element sentinel reads the settled array
					(Value::Array(arr), Part::Append) => {
						arr.last().cloned().unwrap_or(Value::None)
					}
					(_, Part::Field(f)) => {
						base.member_async(&Value::from(f.as_str()), mode).await
					}
					(_, Part::Index(i)) => base.member_async(&Value::Number(*i), mode).await,
					(_, Part::Append) => base.member_async(&Value::from("[]"), mode).await,
					(_, Part::Value(key)) => base.member_async(key, mode).await,
				};
				found.get_path(path.next(), mode).await
			}
		}
	}

	/// Member access enriched with the source position of the failing
	/// expression, for soft errors surfaced to the user.
	pub async fn member_at(
		&self,
		key: &Value,
		mode: Mode,
		position: Position,
		context: &str,
		path: Option<&str>,
	) -> Value {
		match self.member_async(key, mode).await {
			Value::Poison(p) => {
				let errors = p
					.errors()
					.iter()
					.map(|e| e.clone().enrich(position, context, path))
					.collect();
				Value::poison_all(errors)
			}
			v => v,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::pending::Pending;
	use crate::exp::value::Func;
	use futures::FutureExt;

	fn subject() -> Value {
		Value::from(map! {
			"name".to_owned() => Value::from("cascada"),
			"items".to_owned() => Value::from(vec![Value::from(1), Value::from(2)])
		})
	}

	#[test]
	fn member_on_nil_is_silent_in_template_mode() {
		let val = Value::None;
		let res = val.member(&Value::from("x"), Mode::Template).unwrap();
		assert_eq!(res, Value::None);
	}

	#[test]
	fn member_on_nil_errors_in_script_mode() {
		let val = Value::None;
		let res = val.member(&Value::from("x"), Mode::Script);
		assert!(matches!(res, Err(Error::MemberOnNone { .. })));
	}

	#[test]
	fn member_reads_fields_and_indices() {
		let val = subject();
		assert_eq!(val.member(&Value::from("name"), Mode::Script).unwrap(), Value::from("cascada"));
		let items = val.member(&Value::from("items"), Mode::Script).unwrap();
		assert_eq!(items.member(&Value::from(1), Mode::Script).unwrap(), Value::from(2));
	}

	#[test]
	fn member_binds_function_receivers() {
		let func = Func::new(|recv, _args| {
			async move { Ok(recv.unwrap_or(Value::None)) }.boxed_local()
		});
		let val = Value::from(map! {
			"this_fn".to_owned() => Value::Func(func)
		});
		match val.member(&Value::from("this_fn"), Mode::Script).unwrap() {
			Value::Func(f) => assert!(f.receiver.is_some()),
			v => panic!("expected a bound function, got {v:?}"),
		}
	}

	#[tokio::test]
	async fn async_member_settles_both_sides() {
		let (obj_pending, obj_resolver) = Pending::new();
		let (key_pending, key_resolver) = Pending::new();
		obj_resolver.resolve(subject());
		key_resolver.resolve(Value::from("name"));
		let obj = Value::Pending(obj_pending);
		let res = obj.member_async(&Value::Pending(key_pending), Mode::Script).await;
		assert_eq!(res, Value::from("cascada"));
	}

	#[tokio::test]
	async fn two_poisoned_inputs_concatenate() {
		let obj = Value::poison(Error::Thrown("obj".to_owned()));
		let key = Value::poison(Error::Thrown("key".to_owned()));
		match obj.member_async(&key, Mode::Script).await {
			Value::Poison(p) => {
				let messages: Vec<String> = p.errors().iter().map(|e| e.to_string()).collect();
				assert_eq!(messages, vec!["obj", "key"]);
			}
			v => panic!("expected poison, got {v:?}"),
		}
	}

	#[tokio::test]
	async fn one_poisoned_input_passes_through_unchanged() {
		let poison = Value::poison(Error::Thrown("only".to_owned()));
		let key = Value::from("x");
		let res = poison.member_async(&key, Mode::Script).await;
		assert_eq!(res, poison);
	}

	#[tokio::test]
	async fn poison_discovered_after_awaiting_behaves_identically() {
		let (pending, resolver) = Pending::new();
		resolver.resolve(Value::poison(Error::Thrown("late".to_owned())));
		let obj = Value::Pending(pending);
		let res = obj.member_async(&Value::from("x"), Mode::Script).await;
		assert!(res.is_poison());
	}

	#[tokio::test]
	async fn get_path_walks_through_pendings() {
		let (pending, resolver) = Pending::new();
		resolver.resolve(subject());
		let base = Value::from(map! {
			"outer".to_owned() => Value::Pending(pending)
		});
		let res = base
			.get_path(&[Part::from("outer"), Part::from("items"), Part::from(0)], Mode::Script)
			.await;
		assert_eq!(res, Value::from(1));
	}

	#[tokio::test]
	async fn get_path_resolves_computed_segments() {
		let (key, key_resolver) = Pending::new();
		key_resolver.resolve(Value::from("name"));
		let res = subject()
			.get_path(&[Part::Value(Value::Pending(key))], Mode::Script)
			.await;
		assert_eq!(res, Value::from("cascada"));
	}

	#[tokio::test]
	async fn get_path_reads_the_last_element() {
		let res = subject()
			.get_path(&[Part::from("items"), Part::Append], Mode::Script)
			.await;
		assert_eq!(res, Value::from(2));
	}

	#[tokio::test]
	async fn member_at_attaches_position() {
		let val = Value::None;
		let res = val
			.member_at(&Value::from("x"), Mode::Script, Position::new(4, 2), "user.x", None)
			.await;
		match res {
			Value::Poison(p) => match &p.errors()[0] {
				Error::Template {
					position,
					path,
					..
				} => {
					assert_eq!(position.line, 4);
					assert_eq!(path, "(unknown path)");
				}
				e => panic!("expected a positioned error, got {e:?}"),
			},
			v => panic!("expected poison, got {v:?}"),
		}
	}
}
