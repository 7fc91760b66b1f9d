//! The value and expression layer: the runtime's data model and the
//! operations the compiler emits against it.

pub(crate) mod array;
pub(crate) mod escape;
pub(crate) mod number;
pub(crate) mod object;
pub mod operate;
pub(crate) mod part;
pub(crate) mod path;
pub(crate) mod pending;
pub(crate) mod poison;
pub(crate) mod strand;
pub(crate) mod value;

pub use self::array::Array;
pub use self::number::Number;
pub use self::object::Object;
pub use self::part::{Next, Part};
pub use self::path::Path;
pub use self::pending::{Pending, Resolver};
pub use self::poison::{collect_errors, Poison};
pub use self::strand::Strand;
pub use self::value::resolve::{create_array, create_object, mark, resolve_all};
pub use self::value::{Func, NativeFn, Value};
