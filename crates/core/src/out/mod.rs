//! The output side of a render: the ordered buffer which text and
//! pending segments flow into, the named handler registry, and the
//! `@data` tree handler.

pub(crate) mod buffer;
pub(crate) mod data;
pub(crate) mod handler;

pub use self::buffer::{Buffer, Flattened, Transform};
pub use self::data::DataHandler;
pub use self::handler::{Handler, Handlers};
