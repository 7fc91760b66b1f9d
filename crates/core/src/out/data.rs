use crate::err::Error;
use crate::exp::object::Object;
use crate::exp::part::Part;
use crate::exp::value::Value;
use crate::out::handler::Handler;
use std::collections::HashMap;
use std::rc::Rc;

/// A data method: receives the current value at the path and the call
/// arguments; returns the replacement value, or none to delete the key.
pub type DataFn = Rc<dyn Fn(Value, Vec<Value>) -> Result<Option<Value>, Error>>;

/// The `@data` output handler: assembles a value tree from path-based
/// method invocations. Intermediate containers are created on demand,
/// an array when the next segment is numeric or `[]`, an object
/// otherwise.
pub struct DataHandler {
	data: Value,
	methods: HashMap<String, DataFn>,
	snapshots: Vec<Value>,
}

impl Default for DataHandler {
	fn default() -> Self {
		Self::new()
	}
}

impl DataHandler {
	pub fn new() -> Self {
		Self {
			data: Value::base(),
			methods: HashMap::new(),
			snapshots: Vec::new(),
		}
	}

	/// Register a user-defined data method
	pub fn register(&mut self, name: &str, method: DataFn) {
		self.methods.insert(name.to_owned(), method);
	}

	/// The assembled tree
	pub fn data(&self) -> &Value {
		&self.data
	}

	/// Apply a method to the value at a path. An empty path addresses
	/// the root. A method returning none deletes the key; any other
	/// value replaces it.
	pub fn apply(&mut self, path: &[Part], method: &str, args: Vec<Value>) -> Result<(), Error> {
		for part in path {
			if let Part::Value(v) = part {
				return Err(Error::InvalidPath(format!(
					"invalid path segment of type {} at {}",
					v.kindof(),
					display_path(path),
				)));
			}
		}
		let methods = &self.methods;
		match path.split_last() {
			None => {
				let current = std::mem::take(&mut self.data);
				self.data = match run_method(methods, method, current, args)? {
					Some(value) => value,
					None => Value::base(),
				};
				Ok(())
			}
			Some((last, parents)) => {
				let parent = cursor(&mut self.data, parents, Some(last))
					.map_err(|e| position_error(e, path))?;
				let current = read_child(parent, last);
				match run_method(methods, method, current, args)? {
					Some(value) => write_child(parent, last, value).map_err(|e| position_error(e, path)),
					None => {
						remove_child(parent, last);
						Ok(())
					}
				}
			}
		}
	}
}

/// Dispatch a built-in or registered method
fn run_method(
	methods: &HashMap<String, DataFn>,
	method: &str,
	current: Value,
	mut args: Vec<Value>,
) -> Result<Option<Value>, Error> {
	if let Some(custom) = methods.get(method) {
		return custom(current, args);
	}
	match method {
		"set" | "put" => Ok(Some(args.drain(..).next().unwrap_or(Value::None))),
		"delete" => Ok(None),
		"push" => {
			let mut items = as_items(current);
			items.extend(args);
			Ok(Some(Value::from(items)))
		}
		"concat" => {
			let mut items = as_items(current);
			for arg in args {
				match arg {
					Value::Array(more) => items.extend(more.items),
					arg => items.push(arg),
				}
			}
			Ok(Some(Value::from(items)))
		}
		"pop" => {
			let mut items = as_items(current);
			items.pop();
			Ok(Some(Value::from(items)))
		}
		"merge" => {
			let mut target = match current {
				Value::Object(obj) => obj,
				_ => Object::default(),
			};
			for arg in args {
				match arg {
					Value::Object(obj) => {
						for (key, value) in obj {
							merge_entry(&mut target, key, value);
						}
					}
					arg => {
						return Err(Error::InvalidPath(format!(
							"cannot merge {} into an object",
							arg.kindof()
						)))
					}
				}
			}
			Ok(Some(Value::Object(target)))
		}
		method => Err(Error::Thrown(format!("Unknown data method '{method}'"))),
	}
}

/// Objects merge recursively; everything else replaces.
fn merge_entry(target: &mut Object, key: String, value: Value) {
	if let Value::Object(incoming) = value {
		if let Some(Value::Object(existing)) = target.entries.get_mut(&key) {
			for (k, v) in incoming {
				merge_entry(existing, k, v);
			}
			return;
		}
		target.entries.insert(key, Value::Object(incoming));
		return;
	}
	target.entries.insert(key, value);
}

fn as_items(current: Value) -> Vec<Value> {
	match current {
		Value::Array(arr) => arr.items,
		Value::None | Value::Null => Vec::new(),
		value => vec![value],
	}
}

/// Walk to the parent of the final segment, creating intermediate
/// containers sized to what the next segment needs.
fn cursor<'a>(
	value: &'a mut Value,
	path: &[Part],
	terminal: Option<&Part>,
) -> Result<&'a mut Value, Error> {
	let part = match path.first() {
		Some(part) => part,
		None => {
			// Make sure the parent can hold the terminal segment
			if value.is_nullish() {
				if let Some(last) = terminal {
					*value = container_for(last);
				}
			}
			return Ok(value);
		}
	};
	if value.is_nullish() {
		*value = container_for(part);
	}
	match (value, part) {
		(Value::Object(map), Part::Field(key)) => {
			let slot = map.entries.entry(key.clone()).or_insert(Value::None);
			cursor(slot, &path[1..], terminal)
		}
		(Value::Object(map), Part::Index(i)) => {
			let slot = map.entries.entry(i.to_string()).or_insert(Value::None);
			cursor(slot, &path[1..], terminal)
		}
		(Value::Array(arr), Part::Index(i)) => {
			let i = i.to_usize();
			if i >= arr.items.len() {
				arr.items.resize(i + 1, Value::Null);
			}
			cursor(&mut arr.items[i], &path[1..], terminal)
		}
		(Value::Array(arr), Part::Append) => {
			if arr.items.is_empty() {
				arr.items.push(Value::None);
			}
			let last = arr.items.len() - 1;
			cursor(&mut arr.items[last], &path[1..], terminal)
		}
		(value, part) => Err(Error::InvalidPath(format!(
			"cannot descend into {} with '{part}'",
			value.kindof()
		))),
	}
}

/// The container an intermediate segment needs: an array for numeric
/// and `[]` segments, an object otherwise.
fn container_for(part: &Part) -> Value {
	match part {
		Part::Index(_) | Part::Append => Value::Array(Default::default()),
		_ => Value::base(),
	}
}

fn read_child(parent: &Value, part: &Part) -> Value {
	match (parent, part) {
		(Value::Object(map), Part::Field(key)) => {
			map.get(key.as_str()).cloned().unwrap_or(Value::None)
		}
		(Value::Object(map), Part::Index(i)) => {
			map.get(&i.to_string()).cloned().unwrap_or(Value::None)
		}
		(Value::Array(arr), Part::Index(i)) => {
			arr.get(i.to_usize()).cloned().unwrap_or(Value::None)
		}
		(Value::Array(arr), Part::Append) => arr.last().cloned().unwrap_or(Value::None),
		_ => Value::None,
	}
}

fn write_child(parent: &mut Value, part: &Part, value: Value) -> Result<(), Error> {
	match (parent, part) {
		(Value::Object(map), Part::Field(key)) => {
			map.entries.insert(key.clone(), value);
			Ok(())
		}
		(Value::Object(map), Part::Index(i)) => {
			map.entries.insert(i.to_string(), value);
			Ok(())
		}
		(Value::Array(arr), Part::Index(i)) => {
			let i = i.to_usize();
			if i >= arr.items.len() {
				arr.items.resize(i + 1, Value::Null);
			}
			arr.items[i] = value;
			Ok(())
		}
		(Value::Array(arr), Part::Append) => {
			arr.items.push(value);
			Ok(())
		}
		(parent, part) => Err(Error::InvalidPath(format!(
			"cannot write '{part}' into {}",
			parent.kindof()
		))),
	}
}

fn remove_child(parent: &mut Value, part: &Part) {
	match (parent, part) {
		(Value::Object(map), Part::Field(key)) => {
			map.entries.remove(key.as_str());
		}
		(Value::Object(map), Part::Index(i)) => {
			map.entries.remove(&i.to_string());
		}
		(Value::Array(arr), Part::Index(i)) => {
			let i = i.to_usize();
			if i < arr.items.len() {
				arr.items.remove(i);
			}
		}
		(Value::Array(arr), Part::Append) => {
			arr.items.pop();
		}
		_ => (),
	}
}

fn display_path(path: &[Part]) -> String {
	use std::fmt::Write;
	let mut out = String::from("@data");
	for part in path {
		let _ = write!(out, "{part}");
	}
	out
}

fn position_error(error: Error, path: &[Part]) -> Error {
	match error {
		Error::InvalidPath(message) => {
			Error::InvalidPath(format!("{message} at {}", display_path(path)))
		}
		error => error,
	}
}

impl Handler for DataHandler {
	/// A bare emission merges an object into the root
	fn emit(&mut self, value: Value) -> Result<(), Error> {
		self.apply(&[], "merge", vec![value])
	}

	fn mark(&mut self) -> usize {
		self.snapshots.push(self.data.clone());
		self.snapshots.len() - 1
	}

	fn revert(&mut self, mark: usize) {
		if mark < self.snapshots.len() {
			self.data = self.snapshots[mark].clone();
			self.snapshots.truncate(mark);
		}
	}

	fn take(&mut self) -> Value {
		std::mem::replace(&mut self.data, Value::base())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::number::Number;

	#[test]
	fn set_creates_intermediate_objects() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("user"), Part::from("name")], "set", vec![Value::from("ada")])
			.unwrap();
		assert_eq!(
			data.data().pick(&[Part::from("user"), Part::from("name")]),
			Value::from("ada")
		);
	}

	#[test]
	fn numeric_segments_create_arrays() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("items"), Part::from(1)], "set", vec![Value::from("b")]).unwrap();
		match data.data().pick(&[Part::from("items")]) {
			Value::Array(arr) => {
				assert_eq!(arr.len(), 2);
				assert_eq!(arr[0], Value::Null);
				assert_eq!(arr[1], Value::from("b"));
			}
			v => panic!("expected an array, got {v:?}"),
		}
	}

	#[test]
	fn push_auto_creates_the_array() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("tags")], "push", vec![Value::from("a")]).unwrap();
		data.apply(&[Part::from("tags")], "push", vec![Value::from("b")]).unwrap();
		assert_eq!(
			data.data().pick(&[Part::from("tags")]),
			Value::from(vec![Value::from("a"), Value::from("b")])
		);
	}

	#[test]
	fn merge_is_deep_for_objects() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("cfg")], "set", vec![Value::from(map! {
			"a".to_owned() => Value::from(1),
			"nested".to_owned() => Value::from(map! { "x".to_owned() => Value::from(1) })
		})])
		.unwrap();
		data.apply(&[Part::from("cfg")], "merge", vec![Value::from(map! {
			"nested".to_owned() => Value::from(map! { "y".to_owned() => Value::from(2) })
		})])
		.unwrap();
		assert_eq!(
			data.data().pick(&[Part::from("cfg"), Part::from("nested"), Part::from("y")]),
			Value::from(2)
		);
		assert_eq!(
			data.data().pick(&[Part::from("cfg"), Part::from("nested"), Part::from("x")]),
			Value::from(1)
		);
	}

	#[test]
	fn returning_none_deletes_the_key() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("tmp")], "set", vec![Value::from(1)]).unwrap();
		data.apply(&[Part::from("tmp")], "delete", vec![]).unwrap();
		assert_eq!(data.data().pick(&[Part::from("tmp")]), Value::None);
	}

	#[test]
	fn custom_methods_dispatch() {
		let mut data = DataHandler::new();
		data.register(
			"increment",
			Rc::new(|current, _args| {
				let n = match current {
					Value::Number(n) => n,
					_ => Number::Int(0),
				};
				Ok(Some(Value::Number(n + Number::Int(1))))
			}),
		);
		data.apply(&[Part::from("count")], "increment", vec![]).unwrap();
		data.apply(&[Part::from("count")], "increment", vec![]).unwrap();
		assert_eq!(data.data().pick(&[Part::from("count")]), Value::from(2));
	}

	#[test]
	fn invalid_segments_are_descriptive() {
		let mut data = DataHandler::new();
		let res = data.apply(
			&[Part::Value(Value::from(true))],
			"set",
			vec![Value::from(1)],
		);
		match res {
			Err(Error::InvalidPath(message)) => assert!(message.contains("@data")),
			other => panic!("expected an invalid path error, got {other:?}"),
		}
	}

	#[test]
	fn marks_snapshot_and_revert_the_tree() {
		let mut data = DataHandler::new();
		data.apply(&[Part::from("keep")], "set", vec![Value::from(1)]).unwrap();
		let mark = data.mark();
		data.apply(&[Part::from("drop")], "set", vec![Value::from(2)]).unwrap();
		data.revert(mark);
		assert_eq!(data.data().pick(&[Part::from("keep")]), Value::from(1));
		assert_eq!(data.data().pick(&[Part::from("drop")]), Value::None);
	}
}
