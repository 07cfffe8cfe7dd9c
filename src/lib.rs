//! Embed a reference-counted, single-writer guest interpreter.
//!
//! The crate is the bridging layer between host code and the guest:
//!
//! - [`Object`] and [`TypeObject`] wrap guest references with explicit
//!   reference counting; [`Owned`] releases a new reference on drop.
//! - [`convert`] holds the conversion registry: host values go to the guest
//!   with [`Ctx::to_guest`] and come back with [`Ctx::from_guest`] or
//!   [`Ctx::extract`].
//! - [`Ctx`] is one thread's access window into the interpreter. The root
//!   context comes from [`Ctx::embed`], others from a [`Spawner`], and
//!   [`ClosureBuddy`] hands references to flows that have not started yet.
//! - [`HostFunction`] and [`HostValue`] expose host code and data as guest
//!   objects.
//! - [`module::extend`] goes the other way round: the guest imports a module
//!   that host code builds on first import.
//!
//! # Example
//!
//! ```no_run
//! use guestlink::{Ctx, Dynamic, HostFunction};
//!
//! # fn main() -> guestlink::Result<()> {
//! let ctx = Ctx::embed()?;
//!
//! let list = ctx.to_guest(&vec![1i64, 2, 3])?;
//! let back: Vec<i64> = ctx.extract(list)?;
//! assert_eq!(back, vec![1, 2, 3]);
//! ctx.decref(list);
//!
//! let add = ctx.expose(HostFunction::new(|a: i64, b: i64| a + b).named("add"))?;
//! let args = [ctx.to_guest(&2i64)?, ctx.to_guest(&3i64)?];
//! let sum = ctx.call(add, &args)?;
//! assert_eq!(ctx.extract::<Dynamic>(sum)?, Dynamic::Int(5));
//! ctx.decref_all(&args);
//! ctx.decref_all(&[sum, add]);
//!
//! ctx.close()
//! # }
//! ```

pub mod closure;
pub mod context;
pub mod convert;
pub mod error;
pub mod expose;
pub mod file;
pub mod guest;
pub mod handle;
pub mod module;
pub mod object;
pub mod prelude;

pub use closure::{Closure, ClosureBuddy};
pub use context::{Access, Ctx, Released, Spawner};
pub use convert::{Conversion, Dynamic, Kind, Record, Reflect};
pub use error::{Error, GuestError, Result};
pub use expose::{Attrs, AttrsMap, HostFunction, HostValue, Rest};
pub use file::HostFile;
pub use object::{Object, Owned, TypeObject};
