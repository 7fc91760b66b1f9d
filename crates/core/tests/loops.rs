use cascada_core::err::Error;
use cascada_core::exp::Value;
use cascada_core::run::{for_each, for_parallel, while_loop, CondFn, ElseArm, GuardOutcome, IterBody, Iterable};
use cascada_core::{Options, Runtime};
use futures::FutureExt;
use futures::StreamExt;
use std::rc::Rc;

#[tokio::test]
async fn sequential_loops_append_in_order() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, _, item, _| {
						let rt = rt.clone();
						async move {
							rt.append_value(item);
							rt.append(";");
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				let items = Value::from(vec![Value::from(1), Value::from(2), Value::from(3)]);
				for_each(rt.state(), &frame, items.into(), &[], &[], body, None).await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "1;2;3;");
}

#[tokio::test]
async fn parallel_iterations_write_into_ordered_slots() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				// Each iteration occupies its slot before any body runs,
				// so output order is iteration order
				let body: IterBody = Rc::new(move |_, _, item, _| {
					async move { Ok(item) }.boxed_local()
				});
				let items = Value::from(vec![Value::from("a"), Value::from("b")]);
				match Iterable::from(items) {
					Iterable::Value(value) => {
						let arr = value.resolve().await;
						if let Value::Array(arr) = arr {
							for (index, item) in arr.iter().cloned().enumerate() {
								let body = body.clone();
								let slot = rt.state().async_block(
									&frame,
									&[],
									&[],
									false,
									true,
									move |state, child| body(state, child, item, index),
								)?;
								rt.append_pending(slot);
							}
						}
					}
					Iterable::Stream(_) => unreachable!(),
				}
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "ab");
}

#[tokio::test]
async fn parallel_loop_iterations_all_decrement_their_counters() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				frame.declare("last", Value::from(""));
				let body: IterBody = Rc::new(move |_, child, item, _| {
					async move {
						child.set("last", item)?;
						Ok(Value::None)
					}
					.boxed_local()
				});
				let items = Value::from(vec![Value::from("a"), Value::from("b")]);
				for_parallel(rt.state(), &frame, items.into(), &[], &[("last", 1)], body, None)
					.await?;
				// The loop spawned; wait for the final value
				let last = match frame.lookup("last") {
					Some(value) => value.resolve().await,
					None => Value::None,
				};
				rt.append_value(last);
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	// Iterations re-shadow in spawn order, so the last iteration wins
	assert_eq!(out.text, "b");
}

#[tokio::test]
async fn async_generators_drive_loops() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				let stream = futures::stream::iter(0..3)
					.then(|i| async move { Value::from(i * 10) })
					.boxed_local();
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, _, item, _| {
						let rt = rt.clone();
						async move {
							rt.append_value(item);
							rt.append(" ");
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				for_each(rt.state(), &frame, Iterable::Stream(stream), &[], &[], body, None)
					.await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "0 10 20 ");
}

#[tokio::test]
async fn a_poison_yield_completes_its_iteration() {
	let rt = Runtime::new(Options::default());
	let res = rt
		.render(|rt, frame| {
			async move {
				let stream = futures::stream::iter(vec![
					Value::from(1),
					Value::poison(Error::Thrown("bad yield".to_owned())),
					Value::from(3),
				])
				.boxed_local();
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, _, item, _| {
						let rt = rt.clone();
						async move {
							rt.append_value(item);
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				for_each(rt.state(), &frame, Iterable::Stream(stream), &[], &[], body, None)
					.await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await;
	// All three iterations ran; the poisoned one surfaces at the end
	match res {
		Err(Error::Poisoned {
			errors,
		}) => assert!(errors[0].to_string().contains("bad yield")),
		other => panic!("expected the poisoned yield to surface, got {other:?}"),
	}
}

#[tokio::test]
async fn the_else_arm_runs_for_empty_iterables_only() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, _, item, _| {
						let rt = rt.clone();
						async move {
							rt.append_value(item);
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				let arm: ElseArm = {
					let rt = rt.clone();
					Rc::new(move |_, _, _| {
						let rt = rt.clone();
						async move {
							rt.append("(empty)");
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				let empty = Value::from(Vec::<Value>::new());
				for_each(rt.state(), &frame, empty.into(), &[], &[], body.clone(), Some(arm.clone()))
					.await?;
				let items = Value::from(vec![Value::from("x")]);
				for_each(rt.state(), &frame, items.into(), &[], &[], body, Some(arm)).await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "(empty)x");
}

#[tokio::test]
async fn while_conditions_may_suspend() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				frame.declare("n", Value::from(0));
				let cond: CondFn = Rc::new(move |_, frame| {
					async move {
						// A condition which resolves asynchronously
						tokio::task::yield_now().await;
						let n = match frame.lookup("n") {
							Some(Value::Number(n)) => n.as_int(),
							_ => 0,
						};
						Ok(Value::from(n < 2))
					}
					.boxed_local()
				});
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, frame, _, index| {
						let rt = rt.clone();
						async move {
							rt.append(&format!("tick{index} "));
							frame.set("n", Value::from(index as i64 + 1))?;
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				while_loop(rt.state(), &frame, cond, body).await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "tick0 tick1 ");
}

#[tokio::test]
async fn break_inside_a_guard_is_ignored_by_the_loop() {
	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				let body: IterBody = {
					let rt = rt.clone();
					Rc::new(move |_, frame, item, _| {
						let rt = rt.clone();
						async move {
							rt.append_value(item);
							// A guard swallows the break, so the loop
							// runs every iteration
							let scope = rt.begin_guard(&[], &frame, &[], &[])?;
							let outcome =
								rt.end_guard(scope, &frame, Err(Error::Break)).await?;
							assert!(matches!(outcome, GuardOutcome::Passed(_)));
							Ok(Value::None)
						}
						.boxed_local()
					})
				};
				let items = Value::from(vec![Value::from(1), Value::from(2)]);
				for_each(rt.state(), &frame, items.into(), &[], &[], body, None).await?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await
		.unwrap();
	assert_eq!(out.text, "12");
}
