//! The Cascada asynchronous execution core.
//!
//! Templates and scripts compiled by the surrounding engine execute
//! against this crate: a runtime which lets authors write code as if
//! it were synchronous while the engine parallelises independent work,
//! preserves data-dependency ordering through per-variable write
//! counters and promise-based snapshots, carries partial failures
//! forward as poison values without aborting the render, and
//! serialises side-effecting operations tagged sequential behind
//! path-keyed read/write locks.
//!
//! The scheduler is single-threaded and cooperative: one executor
//! advances every closure of a render, and "parallel" means many
//! pending values interleaving at await points. Nothing here is
//! `Send`, by design.

#[macro_use]
mod mac;

pub mod cnf;
pub mod ctx;
pub mod err;
pub mod exp;
pub mod out;
pub mod run;

pub use self::ctx::Frame;
pub use self::err::Error;
pub use self::exp::{Array, Number, Object, Part, Path, Pending, Poison, Strand, Value};
pub use self::run::{Mode, Options, Rendered, Runtime};
