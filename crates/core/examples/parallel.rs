//! A hand-compiled template: two slow data sources render in parallel,
//! a sequential write is serialised against them, and a guard recovers
//! a failing section without losing the rest of the page.

use cascada_core::err::Error;
use cascada_core::exp::{Part, Value};
use cascada_core::run::GuardOutcome;
use cascada_core::{Options, Runtime};
use futures::FutureExt;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
	tracing_subscriber::fmt::init();

	let rt = Runtime::new(Options::default());
	let out = rt
		.render(|rt, frame| {
			async move {
				rt.append("# Dashboard\n");
				// {{ fetch_users() }} and {{ fetch_posts() }} run
				// concurrently; output order stays source order
				let users = rt.state().async_block(&frame, &[], &[], false, true, |_, _| {
					async move {
						tokio::time::sleep(Duration::from_millis(20)).await;
						Ok(Value::from("alice, bob"))
					}
					.boxed_local()
				})?;
				let posts = rt.state().async_block(&frame, &[], &[], false, true, |_, _| {
					async move {
						tokio::time::sleep(Duration::from_millis(10)).await;
						Ok(Value::from("17 posts"))
					}
					.boxed_local()
				})?;
				rt.append("users: ");
				rt.append_pending(users);
				rt.append("\nposts: ");
				rt.append_pending(posts);
				rt.append("\n");
				// A guarded section which fails and recovers
				let scope = rt.begin_guard(&[], &frame, &[], &[])?;
				rt.append("latest comment: ");
				rt.append_value(Value::poison(Error::Thrown("comments are down".to_owned())));
				match rt.end_guard(scope, &frame, Ok(Value::None)).await? {
					GuardOutcome::Failed {
						errors,
					} => {
						rt.append(&format!("(section unavailable: {} error(s))\n", errors.len()));
					}
					GuardOutcome::Passed(_) => rt.append("\n"),
				}
				// The @data tree is assembled alongside the text
				rt.data_apply(&[Part::from("stats"), Part::from("rendered")], "set", vec![
					Value::from(true),
				])?;
				Ok(Value::None)
			}
			.boxed_local()
		})
		.await?;

	println!("{}", out.text);
	println!("data: {}", out.data);
	Ok(())
}
