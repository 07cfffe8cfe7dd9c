//! Guest object references and the object protocol.
//!
//! [`Object`] is a plain copyable wrapper around a guest object pointer. It
//! carries no ownership by itself: every function returning an `Object`
//! documents whether the reference is *new* (the caller releases it exactly
//! once with [`Ctx::decref`]) or *borrowed*. [`Owned`] is the scoped form of
//! a new reference, released when the guard drops.
//!
//! The protocol methods live on [`Ctx`] because they need exclusive guest
//! access; each guest call site goes through [`Ctx::wrap`] so that a null
//! result always surfaces as the pending guest exception.

use std::fmt;

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::guest::{self, ObjPtr};

/// A reference to a guest object, or the null sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Object(ObjPtr);

// SAFETY: an `Object` is an address. Dereferencing it goes through the guest
// API, which requires the interpreter lock held by the calling context.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// The "no object" sentinel.
    pub const NULL: Object = Object(std::ptr::null_mut());

    pub(crate) fn from_ptr(ptr: ObjPtr) -> Self {
        Object(ptr)
    }

    pub fn as_ptr(self) -> ObjPtr {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Type of the object; the null type for the null object.
    pub fn type_object(self) -> TypeObject {
        TypeObject(guest::type_of(self.0))
    }

    /// Current reference count, 0 for the null object.
    pub fn refcnt(self) -> isize {
        guest::refcnt(self.0)
    }
}

impl Default for Object {
    fn default() -> Self {
        Object::NULL
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Object(NULL)");
        }
        write!(f, "Object({} at {:p})", self.type_object().name(), self.0)
    }
}

/// A reference to a guest type object, or the null sentinel. Identity is the
/// type pointer, which makes it usable as a dispatch key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeObject(ObjPtr);

// SAFETY: see `Object`.
unsafe impl Send for TypeObject {}
unsafe impl Sync for TypeObject {}

impl TypeObject {
    pub const NULL: TypeObject = TypeObject(std::ptr::null_mut());

    pub(crate) fn from_ptr(ptr: ObjPtr) -> Self {
        TypeObject(ptr)
    }

    /// View an object as a type, the null type if it is not one.
    pub fn from_object(o: Object) -> Self {
        if guest::is_type(o.0) {
            TypeObject(o.0)
        } else {
            TypeObject::NULL
        }
    }

    pub fn as_object(self) -> Object {
        Object(self.0)
    }

    pub fn as_ptr(self) -> ObjPtr {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub fn name(self) -> String {
        guest::type_name(self.0)
    }

    /// Whether `self` is `base` or derives from it.
    pub fn is_subtype(self, base: TypeObject) -> bool {
        guest::is_subtype(self.0, base.0)
    }
}

impl Default for TypeObject {
    fn default() -> Self {
        TypeObject::NULL
    }
}

impl fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeObject({})", self.name())
    }
}

impl fmt::Display for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A new reference released on drop.
pub struct Owned<'ctx> {
    ctx: &'ctx Ctx,
    object: Object,
}

impl<'ctx> Owned<'ctx> {
    pub fn get(&self) -> Object {
        self.object
    }

    /// Give up the guard, handing the new reference to the caller.
    pub fn into_inner(self) -> Object {
        let object = self.object;
        std::mem::forget(self);
        object
    }
}

impl Drop for Owned<'_> {
    fn drop(&mut self) {
        self.ctx.decref(self.object);
    }
}

impl std::ops::Deref for Owned<'_> {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.object
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reference counting
// ═══════════════════════════════════════════════════════════════════════════════

impl Ctx {
    /// Increment each reference. Null objects are ignored.
    pub fn incref(&self, o: Object) {
        guest::incref(o.0);
    }

    /// Decrement each reference. Null objects are ignored.
    pub fn decref(&self, o: Object) {
        guest::decref(o.0);
    }

    pub fn incref_all(&self, objects: &[Object]) {
        objects.iter().for_each(|o| self.incref(*o));
    }

    pub fn decref_all(&self, objects: &[Object]) {
        objects.iter().for_each(|o| self.decref(*o));
    }

    /// A new reference to `o`.
    pub fn new_ref(&self, o: Object) -> Object {
        self.incref(o);
        o
    }

    /// Guard a new reference so it is released at the end of the scope.
    pub fn owned(&self, o: Object) -> Owned<'_> {
        Owned {
            ctx: self,
            object: o,
        }
    }

    /// Wrap the result of a guest call: a null pointer becomes the pending
    /// guest exception.
    pub fn wrap(&self, ptr: ObjPtr) -> Result<Object> {
        if ptr.is_null() {
            return Err(self.catch_error());
        }
        Ok(Object(ptr))
    }

    /// Same as [`Ctx::wrap`] for status-returning guest calls.
    pub(crate) fn wrap_status(&self, status: i32) -> Result<()> {
        if status < 0 {
            return Err(self.catch_error());
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Object protocol
    // ═══════════════════════════════════════════════════════════════════════════

    /// Attribute `name` of `o`. Returns a new reference.
    pub fn getattr(&self, o: Object, name: &str) -> Result<Object> {
        self.wrap(guest::getattr(o.0, name))
    }

    pub fn setattr(&self, o: Object, name: &str, value: Object) -> Result<()> {
        if value.is_null() {
            return Err(Error::runtime("cannot set an attribute to the null object"));
        }
        self.wrap_status(guest::setattr(o.0, name, value.0))
    }

    pub fn delattr(&self, o: Object, name: &str) -> Result<()> {
        self.wrap_status(guest::setattr(o.0, name, std::ptr::null_mut()))
    }

    /// Call `callable` with positional arguments (borrowed). Returns a new
    /// reference.
    pub fn call(&self, callable: Object, args: &[Object]) -> Result<Object> {
        self.call_kw(callable, args, Object::NULL)
    }

    /// Call with a keyword-argument dict (borrowed, may be null).
    pub fn call_kw(&self, callable: Object, args: &[Object], kwargs: Object) -> Result<Object> {
        let args = self.tuple(args);
        let result = guest::call(callable.0, args.0, kwargs.0);
        self.decref(args);
        self.wrap(result)
    }

    /// Call method `name` of `o`. Returns a new reference.
    pub fn call_method(&self, o: Object, name: &str, args: &[Object]) -> Result<Object> {
        let method = self.owned(self.getattr(o, name)?);
        self.call(*method, args)
    }

    pub fn len(&self, o: Object) -> Result<usize> {
        let len = guest::length(o.0);
        if len < 0 {
            return Err(self.catch_error());
        }
        usize::try_from(len).map_err(|_| Error::runtime("negative length"))
    }

    /// Item `index` of a sequence. Returns a new reference.
    pub fn get_item(&self, o: Object, index: usize) -> Result<Object> {
        let index = isize::try_from(index)
            .map_err(|_| Error::guest("IndexError", "index out of range"))?;
        self.wrap(guest::sequence_get_item(o.0, index))
    }

    /// `(key, value)` pairs of a mapping, as a new reference to a list.
    pub fn items(&self, o: Object) -> Result<Object> {
        self.wrap(guest::mapping_items(o.0))
    }

    /// Text of the guest `str()` of `o`.
    pub fn str(&self, o: Object) -> Result<String> {
        let s = self.owned(self.wrap(guest::object_str(o.0))?);
        guest::str_value(s.get().as_ptr()).ok_or_else(|| Error::type_error("str() returned non-string"))
    }

    pub fn repr(&self, o: Object) -> String {
        guest::repr(o.0)
    }

    pub fn is_true(&self, o: Object) -> Result<bool> {
        match guest::is_true(o.0) {
            -1 => Err(self.catch_error()),
            truth => Ok(truth == 1),
        }
    }

    pub fn is_none(&self, o: Object) -> bool {
        o.0 == guest::none()
    }

    /// Borrowed `None`.
    pub fn none(&self) -> Object {
        Object(guest::none())
    }

    /// Build a tuple from borrowed items. Returns a new reference.
    pub fn tuple(&self, items: &[Object]) -> Object {
        self.incref_all(items);
        Object(guest::tuple_new(items.iter().map(|o| o.0).collect()))
    }

    /// Build a list from borrowed items. Returns a new reference.
    pub fn list(&self, items: &[Object]) -> Object {
        self.incref_all(items);
        Object(guest::list_new(items.iter().map(|o| o.0).collect()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Modules
    // ═══════════════════════════════════════════════════════════════════════════

    /// Import module `name`. Returns a new reference.
    pub fn import(&self, name: &str) -> Result<Object> {
        self.wrap(guest::import(name))
    }

    /// Create an empty module and make it importable. Returns a new reference.
    pub fn new_module(&self, name: &str) -> Result<Object> {
        let module = self.wrap(guest::module_new(name))?;
        if let Err(err) = self.wrap_status(guest::add_module(name, module.0)) {
            self.decref(module);
            return Err(err);
        }
        Ok(module)
    }

    /// Evaluate a dotted attribute path like `collections.namedtuple`,
    /// importing the leading module. Returns a new reference.
    pub fn lookup(&self, path: &str) -> Result<Object> {
        let mut parts = path.split('.');
        let module = parts.next().unwrap_or_default();
        let mut current = self.import(module)?;
        for part in parts {
            let next = self.getattr(current, part);
            self.decref(current);
            current = next?;
        }
        Ok(current)
    }
}
