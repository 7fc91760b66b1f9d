use crate::err::Error;
use crate::exp::pending::Pending;
use crate::exp::poison::Poison;
use crate::exp::value::resolve::resolve_value;
use crate::exp::value::Value;
use async_recursion::async_recursion;
use std::rc::Rc;

/// A transformer applied to a sub-buffer's joined content at flatten
/// time, in position. Autoescape and safe-string wrapping are supplied
/// by the enclosing engine through this hook.
pub type Transform = Rc<dyn Fn(Value) -> Value>;

/// The ordered, nestable output buffer. Segments append in source
/// textual order; pending segments occupy slots which linearisation
/// awaits in tree order, so output order never depends on resolution
/// order. Sub-buffers nest for loops, macros, and guard bodies, and may
/// carry a transformer or route their content to a named handler.
pub struct Buffer {
	stack: Vec<Sub>,
}

impl Default for Buffer {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Default)]
pub(crate) struct Sub {
	nodes: Vec<Node>,
	transform: Option<Transform>,
	route: Option<String>,
}

pub(crate) enum Node {
	Text(String),
	Value(Value),
	Slot(Pending),
	Sub(Sub),
}

/// The result of linearising a buffer: the joined output (or poison
/// carrying every error the slots settled with), plus the values to
/// deliver to routed handlers, in order.
pub struct Flattened {
	pub output: Value,
	pub routed: Vec<(String, Value)>,
}

impl Buffer {
	pub fn new() -> Self {
		Buffer {
			stack: vec![Sub::default()],
		}
	}

	fn top(&mut self) -> &mut Sub {
		self.stack.last_mut().expect("the root sub-buffer is never popped")
	}

	/// Append a literal text segment
	pub fn append(&mut self, text: &str) {
		if text.is_empty() {
			return;
		}
		if let Some(Node::Text(prev)) = self.top().nodes.last_mut() {
			prev.push_str(text);
			return;
		}
		self.top().nodes.push(Node::Text(text.to_owned()));
	}

	/// Append an already-settled value
	pub fn append_value(&mut self, value: Value) {
		self.top().nodes.push(Node::Value(value));
	}

	/// Append a slot for a value still being produced
	pub fn append_pending(&mut self, pending: Pending) {
		self.top().nodes.push(Node::Slot(pending));
	}

	/// Open a nested sub-buffer, optionally transformed or routed
	pub fn open_sub(&mut self, transform: Option<Transform>, route: Option<String>) {
		self.stack.push(Sub {
			nodes: Vec::new(),
			transform,
			route,
		});
	}

	/// Close the innermost sub-buffer, attaching it in position
	pub fn close_sub(&mut self) -> Result<(), Error> {
		if self.stack.len() < 2 {
			return Err(Error::Unreachable("closed the root output buffer"));
		}
		let sub = self.stack.pop().expect("checked length above");
		self.top().nodes.push(Node::Sub(sub));
		Ok(())
	}

	/// A revert point in the innermost open sub-buffer
	pub fn mark(&mut self) -> usize {
		self.top().nodes.len()
	}

	/// Discard everything appended since the revert point
	pub fn revert_to(&mut self, mark: usize) {
		self.top().nodes.truncate(mark);
	}

	/// Detach the region appended since a revert point
	pub(crate) fn take_since(&mut self, mark: usize) -> Vec<Node> {
		self.top().nodes.split_off(mark)
	}

	/// Re-attach a detached region in position
	pub(crate) fn put_back(&mut self, nodes: Vec<Node>) {
		self.top().nodes.extend(nodes)
	}

	/// Linearise the buffer: await slots in tree order, apply
	/// transformers in position, join text, and gather routed values.
	/// Poison in any slot poisons the enclosing sub-buffer, aggregating
	/// across slots so no error is lost.
	pub async fn flatten(mut self) -> Result<Flattened, Error> {
		debug_assert!(self.stack.len() == 1, "flattened with open sub-buffers");
		let root = self.stack.pop().unwrap_or_default();
		let mut routed = Vec::new();
		let output = flatten_sub(root, &mut routed).await;
		Ok(Flattened {
			output,
			routed,
		})
	}
}

/// Await the pending slots a guard's body appended and collect the
/// errors they settled with, leaving the region in place. The nodes are
/// detached while awaiting so no borrow of the shared buffer is held
/// across a suspension point.
pub(crate) async fn region_errors(
	buffer: &std::rc::Rc<std::cell::RefCell<Buffer>>,
	mark: usize,
) -> Vec<Error> {
	let nodes = buffer.borrow_mut().take_since(mark);
	let mut checked = Vec::with_capacity(nodes.len());
	let mut errors = Vec::new();
	for node in nodes {
		let node = match node {
			Node::Slot(pending) => {
				let value = resolve_value(Value::Pending(pending)).await;
				if let Value::Poison(p) = &value {
					errors.extend_from_slice(p.errors());
				}
				Node::Value(value)
			}
			Node::Value(value) => {
				if let Some(p) = value.find_poison() {
					errors.extend_from_slice(p.errors());
				}
				Node::Value(value)
			}
			node => node,
		};
		checked.push(node);
	}
	buffer.borrow_mut().put_back(checked);
	errors
}

#[async_recursion(?Send)]
async fn flatten_sub(sub: Sub, routed: &mut Vec<(String, Value)>) -> Value {
	let mut text = String::new();
	let mut poison: Option<Poison> = None;
	let mut fold = |value: &Value, text: &mut String, poison: &mut Option<Poison>| {
		match value.find_poison() {
			Some(p) => {
				*poison = Some(match poison.take() {
					Some(prev) => prev.merge(&p),
					None => p,
				});
			}
			None => text.push_str(&value.to_raw_string()),
		}
	};
	for node in sub.nodes {
		match node {
			Node::Text(t) => text.push_str(&t),
			Node::Value(v) => {
				let v = resolve_value(v).await;
				fold(&v, &mut text, &mut poison);
			}
			Node::Slot(p) => {
				let v = resolve_value(Value::Pending(p)).await;
				fold(&v, &mut text, &mut poison);
			}
			Node::Sub(inner) => {
				let route = inner.route.clone();
				let v = flatten_sub(inner, routed).await;
				match route {
					Some(name) => match v.find_poison() {
						Some(p) => {
							poison = Some(match poison.take() {
								Some(prev) => prev.merge(&p),
								None => p,
							});
						}
						None => routed.push((name, v)),
					},
					None => fold(&v, &mut text, &mut poison),
				}
			}
		}
	}
	match poison {
		Some(p) => Value::Poison(p),
		None => {
			let value = Value::from(text);
			match sub.transform {
				Some(transform) => transform(value),
				None => value,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exp::strand::Strand;

	#[tokio::test]
	async fn output_order_is_source_order() {
		let mut buffer = Buffer::new();
		buffer.append("a");
		let (pending, resolver) = Pending::new();
		buffer.append_pending(pending);
		buffer.append("c");
		// The slot settles after later text was appended
		resolver.resolve(Value::from("b"));
		let flat = buffer.flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("abc"));
	}

	#[tokio::test]
	async fn sub_buffers_nest_in_position() {
		let mut buffer = Buffer::new();
		buffer.append("a[");
		buffer.open_sub(None, None);
		buffer.append("b");
		buffer.close_sub().unwrap();
		buffer.append("]c");
		let flat = buffer.flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("a[b]c"));
	}

	#[tokio::test]
	async fn transformers_apply_to_joined_content() {
		let mut buffer = Buffer::new();
		buffer.open_sub(
			Some(Rc::new(|v: Value| {
				Value::Strand(Strand(v.to_raw_string().to_uppercase()))
			})),
			None,
		);
		buffer.append("shout");
		buffer.close_sub().unwrap();
		let flat = buffer.flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("SHOUT"));
	}

	#[tokio::test]
	async fn poison_slots_aggregate() {
		let mut buffer = Buffer::new();
		let (p1, r1) = Pending::new();
		let (p2, r2) = Pending::new();
		buffer.append_pending(p1);
		buffer.append("kept");
		buffer.append_pending(p2);
		r1.resolve(Value::poison(Error::Thrown("first".to_owned())));
		r2.resolve(Value::poison(Error::Thrown("second".to_owned())));
		let flat = buffer.flatten().await.unwrap();
		match flat.output {
			Value::Poison(p) => {
				let messages: Vec<String> = p.errors().iter().map(|e| e.to_string()).collect();
				assert_eq!(messages, vec!["first", "second"]);
			}
			v => panic!("expected poison, got {v:?}"),
		}
	}

	#[tokio::test]
	async fn revert_discards_appended_segments() {
		let mut buffer = Buffer::new();
		buffer.append("before ");
		let mark = buffer.mark();
		buffer.append("inside ");
		buffer.revert_to(mark);
		buffer.append("after");
		let flat = buffer.flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("before after"));
	}

	#[tokio::test]
	async fn routed_subs_deliver_their_content() {
		let mut buffer = Buffer::new();
		buffer.append("text");
		buffer.open_sub(None, Some("@custom".to_owned()));
		buffer.append("routed");
		buffer.close_sub().unwrap();
		let flat = buffer.flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("text"));
		assert_eq!(flat.routed, vec![("@custom".to_owned(), Value::from("routed"))]);
	}

	#[tokio::test]
	async fn region_errors_surface_slot_poison_without_consuming() {
		use std::cell::RefCell;
		use std::rc::Rc;
		let buffer = Rc::new(RefCell::new(Buffer::new()));
		buffer.borrow_mut().append("ok");
		let mark = buffer.borrow_mut().mark();
		let (p, r) = Pending::new();
		buffer.borrow_mut().append_pending(p);
		r.resolve(Value::poison(Error::Thrown("inside".to_owned())));
		let errors = region_errors(&buffer, mark).await;
		assert_eq!(errors.len(), 1);
		// The region is still present until somebody reverts it
		buffer.borrow_mut().revert_to(mark);
		let flat = Rc::try_unwrap(buffer).ok().unwrap().into_inner().flatten().await.unwrap();
		assert_eq!(flat.output, Value::from("ok"));
	}
}
