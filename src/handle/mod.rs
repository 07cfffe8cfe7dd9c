//! Host values addressable from guest-owned memory.
//!
//! A [`Handle`] owns one host value between [`Handle::set`] and
//! [`Handle::close`]. Guest objects embed a handle, so the handle's address is
//! all the guest ever stores; the value behind it is kept alive and at a
//! stable address until the handle is closed or dropped.
//!
//! Two implementations with identical behavior are provided:
//!
//! - [`pinned::Handle`] keeps the value in its own reference-counted
//!   allocation, which never moves.
//! - [`table::Handle`] keeps the value in a process-wide, append-only table and
//!   stores only the slot index.
//!
//! [`Handle`] is the pinned variant unless the `handle-table` feature is on.
//!
//! # Preconditions
//!
//! Calling `get` or `set` after `close` is a usage error. Debug builds assert
//! on it; release builds return `None` from `get` and ignore `set`.

pub mod pinned;
pub mod table;

use std::any::Any;
use std::sync::Arc;

/// A type-erased host value shared with the guest.
pub type HostAny = Arc<dyn Any + Send + Sync>;

#[cfg(not(feature = "handle-table"))]
pub use pinned::Handle;
#[cfg(feature = "handle-table")]
pub use table::Handle;

/// Downcast a stored value to its concrete type.
pub fn downcast<T: Any + Send + Sync>(value: HostAny) -> Option<Arc<T>> {
    value.downcast::<T>().ok()
}
