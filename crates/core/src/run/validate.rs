//! Compile-time validation of the static closure metadata the compiler
//! registers with the runtime. The checks keep the runtime contract
//! sound: every non-local read registered, every resolver matched by a
//! write counter, declarations only on scoping frames. Frame balance,
//! the fourth check, is enforced where it can be observed, inside
//! [`crate::ctx::Frame`] push and pop.

use crate::err::{Error, Position};
use std::collections::HashSet;
use std::fmt;

/// Which validator checks run. All checks are enabled in debug builds
/// and disabled in release builds by default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Validation {
	pub frame_balance: bool,
	pub declaration_scope: bool,
	pub read_set: bool,
	pub write_set: bool,
}

impl Default for Validation {
	fn default() -> Self {
		match cfg!(debug_assertions) {
			true => Self::all(),
			false => Self::none(),
		}
	}
}

impl Validation {
	pub fn all() -> Self {
		Self {
			frame_balance: true,
			declaration_scope: true,
			read_set: true,
			write_set: true,
		}
	}

	pub fn none() -> Self {
		Self {
			frame_balance: false,
			declaration_scope: false,
			read_set: false,
			write_set: false,
		}
	}
}

/// The static metadata the compiler carries for one closure: which
/// names it declares, reads, and writes, and the closures nested
/// inside it.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ClosureSpec {
	/// Whether this closure runs as an async block
	pub is_async: bool,
	/// Whether declarations may bind at this closure's frame
	pub scoped: bool,
	/// The source position of the closure, for error reporting
	pub position: Option<Position>,
	/// Names declared locally
	pub declares: Vec<String>,
	/// Names the body references
	pub uses: Vec<String>,
	/// The registered read set
	pub read_vars: Vec<String>,
	/// The registered write counters
	pub write_counts: Vec<(String, usize)>,
	/// Names claiming a parent-frame resolver
	pub resolves: Vec<String>,
	/// Whether the closure runs sequentially
	pub sequential: bool,
	/// Closures nested inside this one
	pub children: Vec<ClosureSpec>,
}

/// A non-fatal finding from validation.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Warning {
	/// A registered read is neither used locally nor needed by a child
	UnusedSnapshot {
		name: String,
	},
}

impl fmt::Display for Warning {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Warning::UnusedSnapshot {
				name,
			} => write!(f, "unused snapshot: variable '{name}' is registered but never read"),
		}
	}
}

/// Validate a closure tree against the enabled checks. Fatal findings
/// return the error; survivable findings are collected as warnings.
pub fn check(spec: &ClosureSpec, validation: &Validation) -> Result<Vec<Warning>, Error> {
	let mut warnings = Vec::new();
	check_closure(spec, validation, &mut warnings)?;
	Ok(warnings)
}

fn check_closure(
	spec: &ClosureSpec,
	validation: &Validation,
	warnings: &mut Vec<Warning>,
) -> Result<(), Error> {
	// Declarations bind only on scoping frames
	if validation.declaration_scope && !spec.scoped {
		if let Some(name) = spec.declares.first() {
			return Err(Error::DeclarationScope(name.clone()));
		}
	}
	if validation.read_set && spec.is_async {
		let locals: HashSet<&str> = spec.declares.iter().map(String::as_str).collect();
		let reads: HashSet<&str> = spec.read_vars.iter().map(String::as_str).collect();
		// Every non-local read must be registered
		for name in &spec.uses {
			if !locals.contains(name.as_str()) && !reads.contains(name.as_str()) {
				return Err(Error::ReadSetMissing(name.clone()));
			}
		}
		// A registered read nobody needs is a warning, not an error
		let uses: HashSet<&str> = spec.uses.iter().map(String::as_str).collect();
		for name in &spec.read_vars {
			let used = uses.contains(name.as_str());
			let passed_through = spec
				.children
				.iter()
				.any(|child| child.read_vars.iter().any(|r| r == name));
			if !used && !passed_through {
				warnings.push(Warning::UnusedSnapshot {
					name: name.clone(),
				});
			}
		}
	}
	if validation.write_set {
		let counted: HashSet<&str> =
			spec.write_counts.iter().map(|(name, _)| name.as_str()).collect();
		let resolved: HashSet<&str> = spec.resolves.iter().map(String::as_str).collect();
		for name in &spec.resolves {
			if !counted.contains(name.as_str()) {
				return Err(Error::WriteSetMismatch(name.clone()));
			}
		}
		for (name, _) in &spec.write_counts {
			if !resolved.contains(name.as_str()) {
				return Err(Error::WriteSetMismatch(name.clone()));
			}
		}
	}
	for child in &spec.children {
		check_closure(child, validation, warnings)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec() -> ClosureSpec {
		ClosureSpec {
			is_async: true,
			scoped: true,
			..Default::default()
		}
	}

	#[test]
	fn missing_read_registration_is_fatal() {
		let spec = ClosureSpec {
			uses: vec!["user".to_owned()],
			..spec()
		};
		let res = check(&spec, &Validation::all());
		assert!(matches!(res, Err(Error::ReadSetMissing(name)) if name == "user"));
	}

	#[test]
	fn locals_need_no_registration() {
		let spec = ClosureSpec {
			declares: vec!["user".to_owned()],
			uses: vec!["user".to_owned()],
			..spec()
		};
		assert!(check(&spec, &Validation::all()).unwrap().is_empty());
	}

	#[test]
	fn unused_snapshot_is_a_warning() {
		let spec = ClosureSpec {
			read_vars: vec!["user".to_owned()],
			..spec()
		};
		let warnings = check(&spec, &Validation::all()).unwrap();
		assert_eq!(
			warnings,
			vec![Warning::UnusedSnapshot {
				name: "user".to_owned()
			}]
		);
	}

	#[test]
	fn pass_through_snapshots_are_not_warned() {
		let spec = ClosureSpec {
			read_vars: vec!["user".to_owned()],
			children: vec![ClosureSpec {
				uses: vec!["user".to_owned()],
				read_vars: vec!["user".to_owned()],
				..spec()
			}],
			..spec()
		};
		assert!(check(&spec, &Validation::all()).unwrap().is_empty());
	}

	#[test]
	fn write_set_must_be_bidirectional() {
		let spec = ClosureSpec {
			write_counts: vec![("x".to_owned(), 2)],
			..spec()
		};
		let res = check(&spec, &Validation::all());
		assert!(matches!(res, Err(Error::WriteSetMismatch(name)) if name == "x"));
		let spec = ClosureSpec {
			resolves: vec!["x".to_owned()],
			..self::spec()
		};
		let res = check(&spec, &Validation::all());
		assert!(matches!(res, Err(Error::WriteSetMismatch(name)) if name == "x"));
	}

	#[test]
	fn declarations_on_non_scoping_frames_are_fatal() {
		let spec = ClosureSpec {
			is_async: true,
			scoped: false,
			declares: vec!["x".to_owned()],
			..Default::default()
		};
		let res = check(&spec, &Validation::all());
		assert!(matches!(res, Err(Error::DeclarationScope(name)) if name == "x"));
	}

	#[test]
	fn disabled_checks_pass_everything() {
		let spec = ClosureSpec {
			uses: vec!["user".to_owned()],
			write_counts: vec![("x".to_owned(), 1)],
			..spec()
		};
		assert!(check(&spec, &Validation::none()).unwrap().is_empty());
	}
}
