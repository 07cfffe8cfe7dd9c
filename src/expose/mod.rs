//! Host callables and values as guest objects.
//!
//! Each embedding creates two host-backed guest types when the root context
//! starts: `HostFunction`, whose instances are callable, and `HostValue`,
//! whose instances carry an arbitrary host value and an attribute store.
//! Instances keep their host payload in a [`Handle`](crate::handle::Handle)
//! and find their way back to the embedding through the type's state slot.

mod attrs;
mod function;
mod value;

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

pub use attrs::{Attrs, AttrsMap};
pub use function::{FromArgs, HostFunction, HostReturn, IntoHostFunction, NoCtx, Rest, WithCtx};
pub use value::HostValue;

use crate::context::Ctx;
use crate::convert::{self, Conversion, Kind, Reflect};
use crate::error::{Error, Result};
use crate::guest::{self, HostSlots, ObjPtr};
use crate::handle::Handle;
use crate::object::{Object, TypeObject};

const MODULE: &str = "guestlink";

/// Guest types backing host functions and values in one embedding.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostTypes {
    pub(crate) function: TypeObject,
    pub(crate) value: TypeObject,
}

impl HostTypes {
    fn all(self) -> [TypeObject; 2] {
        [self.function, self.value]
    }

    fn conversions(self) -> Vec<Conversion> {
        vec![
            Conversion::for_guest_type(self.function).from_guest(function::from_guest),
            Conversion::for_guest_type(self.value).from_guest(value::from_guest),
        ]
    }
}

/// Kind and type conversions that do not depend on an embedding.
pub(crate) fn conversions() -> Vec<Conversion> {
    vec![
        Conversion::for_kind(Kind::Func)
            .to_guest(function::to_guest)
            .from_guest(function::from_guest),
        Conversion::for_type::<HostValue>()
            .to_guest(value::to_guest)
            .from_guest(value::from_guest),
    ]
}

fn new_type(ctx: &Ctx, name: &str, slots: HostSlots) -> Result<TypeObject> {
    let ty = TypeObject::from_object(ctx.wrap(guest::new_host_type(name, MODULE, slots))?);
    let state = Arc::into_raw(Arc::clone(ctx.state_handle()));
    if guest::set_type_state(ty.as_ptr(), state.cast_mut().cast()) < 0 {
        // SAFETY: the slot refused the pointer, so this is its only owner.
        drop(unsafe { Arc::from_raw(state) });
        ctx.decref(ty.as_object());
        return Err(Error::runtime(format!("type state of {name} already set")));
    }
    Ok(ty)
}

fn release_type(ctx: &Ctx, ty: TypeObject) {
    let state = guest::take_type_state(ty.as_ptr()).cast::<Handle>().cast_const();
    if !state.is_null() {
        // SAFETY: set from `Arc::into_raw` in `new_type`, taken back once.
        drop(unsafe { Arc::from_raw(state) });
    }
    ctx.decref(ty.as_object());
}

pub(crate) fn init_types(ctx: &Ctx) -> Result<HostTypes> {
    let function = new_type(ctx, "HostFunction", function::slots())?;
    let value = match new_type(ctx, "HostValue", value::slots()) {
        Ok(ty) => ty,
        Err(err) => {
            release_type(ctx, function);
            return Err(err);
        }
    };
    let types = HostTypes { function, value };
    if let Err(err) = convert::register(types.conversions()) {
        types.all().into_iter().for_each(|ty| release_type(ctx, ty));
        return Err(err);
    }
    debug!("host function and value types created");
    Ok(types)
}

pub(crate) fn deinit_types(ctx: &Ctx, types: HostTypes) {
    convert::deregister(&types.conversions());
    types.all().into_iter().for_each(|ty| release_type(ctx, ty));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Slot plumbing
// ═══════════════════════════════════════════════════════════════════════════════

/// Context for a dealloc slot. Once the embedding is gone it is detached,
/// good for reference counting only.
fn release_context(o: ObjPtr) -> Ctx {
    Ctx::extend_object(o).unwrap_or_else(|_| Ctx::detached())
}

/// Raise `err` when no context could be built.
fn raise_detached(err: &Error) {
    guest::err_set_string(guest::exception_type("RuntimeError"), &err.to_string());
}

/// Host payload of an instance of a host-backed type.
fn payload<T: Any + Send + Sync>(o: ObjPtr) -> Option<Arc<T>> {
    let handle = guest::host_handle(o)?;
    if handle.is_closed() {
        return None;
    }
    handle.get_as::<T>()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into an error of guest type `exception`.
pub(crate) fn catch_panic<R>(exception: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::guest(
            exception,
            format!("panic: {}", panic_message(&*payload)),
        )),
    }
}

/// Shared `__getattr__` for host-backed objects: `__class__` is the type,
/// every other name goes to `attrs`.
fn get_attr(ctx: &Ctx, o: Object, attrs: &dyn Attrs, name: &str) -> Result<Object> {
    if name == "__class__" {
        return Ok(ctx.new_ref(o.type_object().as_object()));
    }
    catch_panic("AttributeError", || attrs.get_attr(ctx, name))
}

fn set_attr(ctx: &Ctx, o: Object, attrs: &dyn Attrs, name: &str, value: Object) -> Result<()> {
    if name == "__class__" {
        return Err(Error::attribute_error(format!(
            "attribute '__class__' of '{}' objects is not writable",
            o.type_object().name()
        )));
    }
    catch_panic("AttributeError", || attrs.set_attr(ctx, name, value))
}

fn finish_slot(ctx: &Ctx, result: Result<Object>) -> ObjPtr {
    match result {
        Ok(o) => o.as_ptr(),
        Err(err) => {
            ctx.set_error(&err);
            std::ptr::null_mut()
        }
    }
}

fn finish_status(ctx: &Ctx, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            ctx.set_error(&err);
            -1
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════════════════════════

impl Ctx {
    /// Wrap a host function in a new guest function object. Returns a new
    /// reference.
    pub fn expose(&self, f: HostFunction) -> Result<Object> {
        function::new_object(self, f)
    }

    /// Wrap a host value in a new guest object. Returns a new reference.
    pub fn expose_value(&self, v: HostValue) -> Result<Object> {
        value::new_object(self, v)
    }

    /// Set attribute `name` of `o` to the conversion of `value`. Host
    /// functions and values also get `__name__` set to `name`.
    pub fn set_attr_value(&self, o: Object, name: &str, value: &dyn Reflect) -> Result<()> {
        let value = self.owned(self.to_guest(value)?);
        if self.is_host_object(*value)? {
            let name_obj = self.owned(self.to_guest(&name.to_string())?);
            self.setattr(*value, "__name__", *name_obj)?;
        }
        self.setattr(o, name, *value)
    }

    /// Whether `o` is a host function or value of this embedding.
    pub fn is_host_object(&self, o: Object) -> Result<bool> {
        let types = self.host_types()?;
        let ty = o.type_object();
        Ok(ty == types.function || ty == types.value)
    }
}
