pub(crate) mod frame;

pub use self::frame::Frame;
