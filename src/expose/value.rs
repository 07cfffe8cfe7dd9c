//! Host values exposed as guest objects with an attribute store.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{
    Attrs, AttrsMap, catch_panic, finish_slot, finish_status, get_attr, payload, raise_detached,
    release_context, set_attr,
};
use crate::context::Ctx;
use crate::convert::{Dynamic, Reflect, ReflectMut, from_guest_error};
use crate::error::{Error, Result};
use crate::guest::{self, HostSlots, ObjPtr};
use crate::handle::{self, HostAny};
use crate::object::Object;

/// A shared host value plus the attributes the guest sees on it.
///
/// Clones share both the value and the attribute store.
#[derive(Clone)]
pub struct HostValue {
    value: HostAny,
    attrs: Arc<dyn Attrs>,
}

impl HostValue {
    /// Wrap `value` with an empty [`AttrsMap`].
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::with_attrs(value, AttrsMap::new())
    }

    pub fn with_attrs<T: Any + Send + Sync>(value: T, attrs: impl Attrs + 'static) -> Self {
        Self {
            value: Arc::new(value),
            attrs: Arc::new(attrs),
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        handle::downcast(Arc::clone(&self.value))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn attrs(&self) -> &dyn Attrs {
        &*self.attrs
    }
}

/// Holds `()`; a placeholder for a destination about to be filled.
impl Default for HostValue {
    fn default() -> Self {
        Self::new(())
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostValue")
            .field("value", &Arc::as_ptr(&self.value))
            .finish_non_exhaustive()
    }
}

crate::reflect_opaque!(HostValue);

struct ValueObject {
    value: HostValue,
}

pub(super) fn slots() -> HostSlots {
    HostSlots {
        call: None,
        get_attr: Some(getattr_slot),
        set_attr: Some(setattr_slot),
        dealloc: Some(dealloc_slot),
    }
}

pub(super) fn new_object(ctx: &Ctx, value: HostValue) -> Result<Object> {
    let types = ctx.host_types()?;
    let o = ctx.owned(ctx.wrap(guest::host_object_new(types.value.as_ptr()))?);
    let handle = guest::host_handle(o.as_ptr())
        .ok_or_else(|| Error::runtime("value object without a handle"))?;
    handle.set(Arc::new(ValueObject { value }) as HostAny);
    Ok(o.into_inner())
}

pub(super) fn to_guest(ctx: &Ctx, value: &dyn Reflect) -> Result<Object> {
    match value.as_any().downcast_ref::<HostValue>() {
        Some(value) => new_object(ctx, value.clone()),
        None => Err(Error::ToGuest {
            host: value.type_name(),
        }),
    }
}

pub(super) fn from_guest(_ctx: &Ctx, o: Object, dest: &mut dyn Reflect) -> Result<()> {
    let Some(stored) = payload::<ValueObject>(o.as_ptr()) else {
        return Err(from_guest_error(o, dest));
    };
    if let Some(slot) = dest.as_any_mut().downcast_mut::<HostValue>() {
        *slot = stored.value.clone();
        return Ok(());
    }
    match dest.reflect_mut() {
        ReflectMut::Any(d) => {
            *d = Dynamic::Value(stored.value.clone());
            Ok(())
        }
        _ => Err(from_guest_error(o, dest)),
    }
}

fn stored(o: ObjPtr) -> Result<Arc<ValueObject>> {
    payload::<ValueObject>(o).ok_or_else(|| Error::runtime("value object is empty"))
}

fn getattr_slot(o: ObjPtr, name: &str) -> ObjPtr {
    let ctx = match Ctx::extend_object(o) {
        Ok(ctx) => ctx,
        Err(err) => {
            raise_detached(&err);
            return std::ptr::null_mut();
        }
    };
    let o = Object::from_ptr(o);
    let result = stored(o.as_ptr())
        .and_then(|stored| get_attr(&ctx, o, stored.value.attrs(), name));
    finish_slot(&ctx, result)
}

fn setattr_slot(o: ObjPtr, name: &str, value: ObjPtr) -> i32 {
    let ctx = match Ctx::extend_object(o) {
        Ok(ctx) => ctx,
        Err(err) => {
            raise_detached(&err);
            return -1;
        }
    };
    let o = Object::from_ptr(o);
    let result = stored(o.as_ptr()).and_then(|stored| {
        set_attr(&ctx, o, stored.value.attrs(), name, Object::from_ptr(value))
    });
    finish_status(&ctx, result)
}

/// The store is cleared only when no host clone of the value remains.
fn dealloc_slot(o: ObjPtr) {
    let Some(stored) = payload::<ValueObject>(o) else {
        return;
    };
    if Arc::strong_count(&stored.value.attrs) > 1 {
        return;
    }
    let ctx = release_context(o);
    let _ = catch_panic("RuntimeError", || {
        stored.value.attrs.clear(&ctx);
        Ok(())
    });
}
