//! Guest runtime model
//!
//! The slice of the refcounted guest interpreter the bridge talks to:
//! values, types, and a heap of refcounted objects addressed by
//! generational handles.

pub mod heap;
pub mod types;
pub mod value;

pub use heap::{AttrTable, FreedObject, GuestHandle, GuestHeap};
pub use types::{
    BuiltinTypes, GuestType, GuestTypeRef, TypeFlags, BASE_EXCEPTION_TYPE, MODULE_TYPE,
};
pub use value::{CallArgs, GuestValue};
