//! The runtime side of a render: closure scheduling, sequence locks,
//! guard blocks, the loop drivers, the compile-time validator, and the
//! render entry point.

pub(crate) mod executor;
pub(crate) mod guard;
pub(crate) mod iterator;
pub(crate) mod options;
pub(crate) mod sequence;
pub(crate) mod state;
pub(crate) mod validate;

pub use self::executor::{Rendered, Runtime};
pub use self::guard::{GuardOutcome, GuardScope, Selector};
pub use self::iterator::{for_each, for_parallel, while_loop, CondFn, ElseArm, IterBody, Iterable};
pub use self::options::{Mode, Options};
pub use self::sequence::{ReadLock, Sequences, WriteLock};
pub use self::state::AsyncState;
pub use self::validate::{check, ClosureSpec, Validation, Warning};
