//! Guest object layout, reference counting and deallocation.
//!
//! Every guest value is a heap-allocated [`RawObject`] addressed by an
//! [`ObjPtr`]. Objects start with a reference count of one, owned by whoever
//! allocated them, and are freed when the count drops to zero. Builtin types
//! and the `None`/`True`/`False` singletons are immortal: reference counting
//! is a no-op on them.

use std::ffi::{c_int, c_void};
use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use num_bigint::BigInt;
use parking_lot::Mutex;

use super::fatal;
use crate::handle::Handle;
use crate::prelude::IndexMap;

/// Raw pointer to a guest object. Null means "no object".
pub type ObjPtr = *mut RawObject;

/// Count reported for immortal objects.
pub const IMMORTAL_REFCNT: isize = isize::MAX / 2;

/// The guest object header plus its payload.
pub struct RawObject {
    refcnt: AtomicIsize,
    immortal: bool,
    ob_type: ObjPtr,
    pub(crate) payload: Payload,
}

// SAFETY: mutable payloads are behind mutexes, the refcount is atomic and the
// interpreter lock serializes every other access to the raw pointers inside.
unsafe impl Send for RawObject {}
unsafe impl Sync for RawObject {}

pub(crate) enum Payload {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(String),
    Tuple(Vec<ObjPtr>),
    List(Mutex<Vec<ObjPtr>>),
    Dict(Mutex<DictTable>),
    Type(TypeData),
    Module(ModuleData),
    Builtin(BuiltinData),
    Exception(ExceptionData),
    Record(Vec<ObjPtr>),
    Host(Handle),
    File(FileData),
}

/// Structural category of a guest type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeKind {
    Object,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Type,
    Module,
    Builtin,
    Exception,
    Record,
    Host,
    File,
}

/// Slot invoked when an instance of a host type is called.
/// Returns a new reference, or null with an exception set.
pub type CallSlot = fn(callee: ObjPtr, args: ObjPtr, kwargs: ObjPtr) -> ObjPtr;
/// Returns a new reference, or null with an exception set.
pub type GetAttrSlot = fn(obj: ObjPtr, name: &str) -> ObjPtr;
/// Returns 0 on success, -1 with an exception set. A null value deletes.
pub type SetAttrSlot = fn(obj: ObjPtr, name: &str, value: ObjPtr) -> c_int;
/// Runs before the object memory is released.
pub type DeallocSlot = fn(obj: ObjPtr);
/// Builtin function body. `receiver` is null for module-level functions.
pub type BuiltinFn = fn(receiver: ObjPtr, args: &[ObjPtr]) -> ObjPtr;

/// Runs when an extension module is first imported. Returns 0, or -1 with
/// an exception set; the module is then freed.
pub type ModuleInitSlot = fn(module: ObjPtr) -> c_int;
/// Runs before an extension module is freed, including after a failed init.
pub type ModuleFreeSlot = fn(module: ObjPtr);

/// A module built by host code the first time the guest imports `name`.
pub struct ModuleDef {
    pub name: String,
    pub init: ModuleInitSlot,
    pub free: Option<ModuleFreeSlot>,
    /// Host data for the slots.
    pub data: Handle,
}

/// Behavior hooks of a host-defined type.
#[derive(Clone, Copy, Default)]
pub struct HostSlots {
    pub call: Option<CallSlot>,
    pub get_attr: Option<GetAttrSlot>,
    pub set_attr: Option<SetAttrSlot>,
    pub dealloc: Option<DeallocSlot>,
}

pub(crate) struct TypeData {
    pub name: String,
    pub kind: TypeKind,
    /// Owned reference to the base type, or null.
    pub base: ObjPtr,
    pub slots: HostSlots,
    /// Auxiliary per-type state owned by whoever set it.
    pub state: AtomicPtr<c_void>,
    /// Field names of record types.
    pub fields: Vec<String>,
    pub dict: Mutex<IndexMap<String, ObjPtr>>,
}

pub(crate) struct ModuleData {
    pub name: String,
    pub dict: Mutex<IndexMap<String, ObjPtr>>,
    /// Set on extension modules.
    pub def: Option<Arc<ModuleDef>>,
    /// Auxiliary per-module state owned by whoever set it.
    pub state: AtomicPtr<c_void>,
}

pub(crate) struct BuiltinData {
    pub name: &'static str,
    pub func: BuiltinFn,
    /// Owned reference to the bound receiver, or null.
    pub receiver: ObjPtr,
}

/// One entry of a guest traceback, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub file: String,
    pub line: u32,
}

pub(crate) struct ExceptionData {
    pub message: String,
    pub traceback: Vec<Frame>,
}

pub(crate) struct FileData {
    pub file: Mutex<Option<File>>,
    pub name: String,
    pub mode: String,
    pub encoding: Option<String>,
}

/// Hashable identity of a dict key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Bool(bool),
    Int(BigInt),
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
    Identity(usize),
}

pub(crate) type DictTable = IndexMap<DictKey, (ObjPtr, ObjPtr)>;

// ═══════════════════════════════════════════════════════════════════════════════
// Access helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Borrow the object behind `op`.
pub(crate) fn deref<'a>(op: ObjPtr) -> Option<&'a RawObject> {
    // SAFETY: pointers passed into the guest API are null or point to live
    // objects the caller holds a reference to.
    unsafe { op.as_ref() }
}

pub(crate) fn payload<'a>(op: ObjPtr) -> Option<&'a Payload> {
    deref(op).map(|o| &o.payload)
}

pub(crate) fn type_data<'a>(ty: ObjPtr) -> Option<&'a TypeData> {
    match payload(ty) {
        Some(Payload::Type(data)) => Some(data),
        _ => None,
    }
}

/// Borrowed type of `op`, null for a null object.
pub fn type_of(op: ObjPtr) -> ObjPtr {
    deref(op).map_or(std::ptr::null_mut(), |o| o.ob_type)
}

/// Name of a type object, or of the type of a non-type object.
pub fn type_name(ty: ObjPtr) -> String {
    type_data(ty).map_or_else(|| "<nil>".to_string(), |t| t.name.clone())
}

pub fn is_type(op: ObjPtr) -> bool {
    type_data(op).is_some()
}

/// Whether `ty` is `base` or derives from it.
pub fn is_subtype(ty: ObjPtr, base: ObjPtr) -> bool {
    let mut cur = ty;
    while let Some(data) = type_data(cur) {
        if cur == base {
            return true;
        }
        cur = data.base;
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════════
// Allocation and reference counting
// ═══════════════════════════════════════════════════════════════════════════════

/// Allocate a mortal object. Takes a new reference to `ob_type`.
pub(crate) fn alloc(ob_type: ObjPtr, payload: Payload) -> ObjPtr {
    incref(ob_type);
    Box::into_raw(Box::new(RawObject {
        refcnt: AtomicIsize::new(1),
        immortal: false,
        ob_type,
        payload,
    }))
}

/// Allocate an object that is never freed.
pub(crate) fn alloc_immortal(ob_type: ObjPtr, payload: Payload) -> ObjPtr {
    Box::into_raw(Box::new(RawObject {
        refcnt: AtomicIsize::new(IMMORTAL_REFCNT),
        immortal: true,
        ob_type,
        payload,
    }))
}

/// Point an immortal object at its type after the fact (the `type` type is its own type).
pub(crate) fn set_immortal_type(op: ObjPtr, ob_type: ObjPtr) {
    // SAFETY: only called during builtin bootstrap, before `op` is shared.
    if let Some(obj) = unsafe { op.as_mut() } {
        if obj.immortal {
            obj.ob_type = ob_type;
        }
    }
}

pub fn incref(op: ObjPtr) {
    if let Some(obj) = deref(op) {
        if !obj.immortal {
            obj.refcnt.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn decref(op: ObjPtr) {
    let Some(obj) = deref(op) else {
        return;
    };
    if obj.immortal {
        return;
    }
    let prev = obj.refcnt.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        dealloc(op);
    } else if prev <= 0 {
        fatal("reference count dropped below zero");
    }
}

pub(crate) fn is_immortal(op: ObjPtr) -> bool {
    deref(op).is_some_and(|o| o.immortal)
}

pub fn refcnt(op: ObjPtr) -> isize {
    match deref(op) {
        Some(obj) if obj.immortal => IMMORTAL_REFCNT,
        Some(obj) => obj.refcnt.load(Ordering::Relaxed),
        None => 0,
    }
}

fn dealloc(op: ObjPtr) {
    if let Some(slot) = type_data(type_of(op)).and_then(|t| t.slots.dealloc) {
        slot(op);
    }
    if let Some(Payload::Module(ModuleData { def: Some(def), .. })) = payload(op) {
        if let Some(free) = def.free {
            free(op);
        }
    }
    // SAFETY: the count reached zero, nobody else references `op`, and it
    // was produced by `Box::into_raw` in `alloc`.
    let obj = unsafe { Box::from_raw(op) };
    let RawObject {
        ob_type, payload, ..
    } = *obj;
    release_payload(payload);
    decref(ob_type);
}

fn release_payload(payload: Payload) {
    match payload {
        Payload::Tuple(items) | Payload::Record(items) => items.into_iter().for_each(decref),
        Payload::List(items) => items.into_inner().into_iter().for_each(decref),
        Payload::Dict(table) => {
            for (_, (key, value)) in table.into_inner() {
                decref(key);
                decref(value);
            }
        }
        Payload::Type(data) => {
            data.dict.into_inner().into_values().for_each(decref);
            decref(data.base);
        }
        Payload::Module(module) => module.dict.into_inner().into_values().for_each(decref),
        Payload::Builtin(builtin) => decref(builtin.receiver),
        Payload::Host(handle) => handle.close(),
        Payload::None
        | Payload::Bool(_)
        | Payload::Int(_)
        | Payload::Float(_)
        | Payload::Str(_)
        | Payload::Exception(_)
        | Payload::File(_) => {}
    }
}
