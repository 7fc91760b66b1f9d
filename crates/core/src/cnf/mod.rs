use once_cell::sync::Lazy;

/// Specifies how deep the frame stack may grow before a render fails
/// with [`crate::err::Error::DepthExceeded`].
///
/// Every scope push, async block, loop iteration, and macro call counts
/// against this limit.
pub static MAX_FRAME_DEPTH: Lazy<u32> = lazy_env_parse!("CASCADA_MAX_FRAME_DEPTH", u32, 256);

/// Specifies how many values are awaited concurrently when a deferred
/// container is resolved in place.
pub static MAX_CONCURRENT_RESOLVES: Lazy<usize> =
	lazy_env_parse!("CASCADA_MAX_CONCURRENT_RESOLVES", usize, 64);

/// The path reported for renders of string input which have no file path.
pub const UNKNOWN_PATH: &str = "(unknown path)";

/// The key under which a sequence lock covers every other path.
pub const GLOBAL_LOCK_KEY: &str = "!";
