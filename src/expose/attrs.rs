//! Attribute stores of host-backed objects.

use parking_lot::Mutex;

use crate::context::Ctx;
use crate::convert::Reflect;
use crate::error::Result;
use crate::guest;
use crate::object::Object;
use crate::prelude::FxHashMap;

/// Attribute protocol of a host-backed guest object.
///
/// Implementations run with guest access held and may be called from any
/// thread that holds it.
pub trait Attrs: Send + Sync {
    /// Attribute `name`. Returns a new reference.
    fn get_attr(&self, ctx: &Ctx, name: &str) -> Result<Object>;

    /// Set attribute `name` to the borrowed `value`; the null object
    /// deletes it.
    fn set_attr(&self, ctx: &Ctx, name: &str, value: Object) -> Result<()>;

    /// Release whatever the store holds. Called when the last guest object
    /// using the store is deallocated and no host clone remains; a store
    /// that outlives its guest objects releases its references on drop.
    fn clear(&self, _ctx: &Ctx) {}
}

/// Attributes kept as guest references in a map. Unset names read as
/// `None`.
///
/// Dropping a non-empty map releases the references it still holds, so the
/// last owner must be dropped with guest access held.
#[derive(Default)]
pub struct AttrsMap {
    map: Mutex<FxHashMap<String, Object>>,
}

impl AttrsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the conversion of a host value.
    pub fn set_value(&self, ctx: &Ctx, name: &str, value: &dyn Reflect) -> Result<()> {
        let o = ctx.owned(ctx.to_guest(value)?);
        self.set_attr(ctx, name, *o)
    }

    /// Text of a `str` attribute, if set to one.
    pub fn get_str(&self, name: &str) -> Option<String> {
        let map = self.map.lock();
        map.get(name).and_then(|o| guest::str_value(o.as_ptr()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl Attrs for AttrsMap {
    fn get_attr(&self, ctx: &Ctx, name: &str) -> Result<Object> {
        let found = self.map.lock().get(name).copied();
        Ok(ctx.new_ref(found.unwrap_or_else(|| ctx.none())))
    }

    fn set_attr(&self, ctx: &Ctx, name: &str, value: Object) -> Result<()> {
        let previous = if value.is_null() {
            self.map.lock().remove(name)
        } else {
            ctx.incref(value);
            self.map.lock().insert(name.to_string(), value)
        };
        // Released outside the lock: a dealloc may come back here.
        if let Some(previous) = previous {
            ctx.decref(previous);
        }
        Ok(())
    }

    fn clear(&self, ctx: &Ctx) {
        let drained: Vec<Object> = self.map.lock().drain().map(|(_, o)| o).collect();
        ctx.decref_all(&drained);
    }
}

impl Drop for AttrsMap {
    fn drop(&mut self) {
        self.map
            .get_mut()
            .drain()
            .for_each(|(_, o)| guest::decref(o.as_ptr()));
    }
}

impl std::fmt::Debug for AttrsMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.map.lock();
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        f.debug_struct("AttrsMap").field("names", &names).finish()
    }
}
