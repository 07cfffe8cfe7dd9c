//! Constructors and accessors for the builtin value types.
//!
//! Constructors return new references. Accessors borrow and never raise;
//! they return `None` when the object is not of the exact expected type.

use std::ffi::{c_int, c_void};
use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use num_bigint::BigInt;
use parking_lot::Mutex;

use super::exc::err_set_string;
use super::object::{
    BuiltinData, BuiltinFn, DictKey, FileData, ModuleData, ModuleDef, ObjPtr, Payload, alloc,
    decref, deref, incref, payload, type_data, type_of,
};
use super::types::builtins;
use crate::handle::Handle;
use crate::prelude::index_map_new;

pub fn none() -> ObjPtr {
    builtins().none
}

pub fn bool_from(value: bool) -> ObjPtr {
    if value { builtins().true_ } else { builtins().false_ }
}

pub fn bool_value(op: ObjPtr) -> Option<bool> {
    match payload(op) {
        Some(Payload::Bool(b)) => Some(*b),
        _ => None,
    }
}

pub fn long_from(value: impl Into<BigInt>) -> ObjPtr {
    alloc(builtins().int, Payload::Int(value.into()))
}

/// Value of an exact `int` (booleans excluded).
pub fn long_value(op: ObjPtr) -> Option<BigInt> {
    match payload(op) {
        Some(Payload::Int(v)) => Some(v.clone()),
        _ => None,
    }
}

pub fn float_from(value: f64) -> ObjPtr {
    alloc(builtins().float, Payload::Float(value))
}

pub fn float_value(op: ObjPtr) -> Option<f64> {
    match payload(op) {
        Some(Payload::Float(v)) => Some(*v),
        _ => None,
    }
}

pub fn str_from(value: &str) -> ObjPtr {
    alloc(builtins().str, Payload::Str(value.to_string()))
}

pub fn str_value(op: ObjPtr) -> Option<String> {
    match payload(op) {
        Some(Payload::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Containers
// ═══════════════════════════════════════════════════════════════════════════════

/// Build a tuple, stealing the references in `items`.
pub fn tuple_new(items: Vec<ObjPtr>) -> ObjPtr {
    alloc(builtins().tuple, Payload::Tuple(items))
}

/// Borrowed items of a tuple or record.
pub fn tuple_items(op: ObjPtr) -> Option<Vec<ObjPtr>> {
    match payload(op) {
        Some(Payload::Tuple(items)) | Some(Payload::Record(items)) => Some(items.clone()),
        _ => None,
    }
}

/// Build a list, stealing the references in `items`.
pub fn list_new(items: Vec<ObjPtr>) -> ObjPtr {
    alloc(builtins().list, Payload::List(Mutex::new(items)))
}

/// Append `item` (borrowed). Returns 0, or -1 if `list` is not a list.
pub fn list_append(list: ObjPtr, item: ObjPtr) -> c_int {
    match payload(list) {
        Some(Payload::List(items)) => {
            incref(item);
            items.lock().push(item);
            0
        }
        _ => {
            err_set_string(builtins().exception("SystemError"), "bad internal call");
            -1
        }
    }
}

/// Borrowed snapshot of the items of a list.
pub fn list_items(op: ObjPtr) -> Option<Vec<ObjPtr>> {
    match payload(op) {
        Some(Payload::List(items)) => Some(items.lock().clone()),
        _ => None,
    }
}

/// Borrowed list item, null if out of range.
pub fn list_get_item(list: ObjPtr, index: usize) -> ObjPtr {
    match payload(list) {
        Some(Payload::List(items)) => items
            .lock()
            .get(index)
            .copied()
            .unwrap_or(std::ptr::null_mut()),
        _ => std::ptr::null_mut(),
    }
}

pub fn dict_new() -> ObjPtr {
    alloc(builtins().dict, Payload::Dict(Mutex::new(index_map_new())))
}

pub(crate) fn hash_key(op: ObjPtr) -> Option<DictKey> {
    match payload(op)? {
        Payload::None => Some(DictKey::None),
        Payload::Bool(b) => Some(DictKey::Bool(*b)),
        Payload::Int(v) => Some(DictKey::Int(v.clone())),
        Payload::Float(v) => Some(DictKey::Float(v.to_bits())),
        Payload::Str(s) => Some(DictKey::Str(s.clone())),
        Payload::Tuple(items) | Payload::Record(items) => items
            .iter()
            .map(|item| hash_key(*item))
            .collect::<Option<Vec<_>>>()
            .map(DictKey::Tuple),
        Payload::List(_) | Payload::Dict(_) => None,
        _ => Some(DictKey::Identity(op as usize)),
    }
}

fn unhashable(op: ObjPtr) {
    err_set_string(
        builtins().exception("TypeError"),
        &format!("unhashable type: '{}'", super::type_name(type_of(op))),
    );
}

/// Insert `key: value`, both borrowed. Returns 0, or -1 with an exception set.
pub fn dict_set_item(dict: ObjPtr, key: ObjPtr, value: ObjPtr) -> c_int {
    let Some(Payload::Dict(table)) = payload(dict) else {
        err_set_string(builtins().exception("SystemError"), "bad internal call");
        return -1;
    };
    let Some(hashed) = hash_key(key) else {
        unhashable(key);
        return -1;
    };
    incref(key);
    incref(value);
    let old = table.lock().insert(hashed, (key, value));
    if let Some((old_key, old_value)) = old {
        decref(old_key);
        decref(old_value);
    }
    0
}

/// Borrowed value for `key`, null if absent or unhashable (no exception set).
pub fn dict_get_item(dict: ObjPtr, key: ObjPtr) -> ObjPtr {
    let (Some(Payload::Dict(table)), Some(hashed)) = (payload(dict), hash_key(key)) else {
        return std::ptr::null_mut();
    };
    table
        .lock()
        .get(&hashed)
        .map_or(std::ptr::null_mut(), |(_, value)| *value)
}

/// Borrowed `(key, value)` pairs in insertion order.
pub(crate) fn dict_pairs(dict: ObjPtr) -> Option<Vec<(ObjPtr, ObjPtr)>> {
    match payload(dict) {
        Some(Payload::Dict(table)) => Some(table.lock().values().copied().collect()),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Modules, builtins, host objects, files
// ═══════════════════════════════════════════════════════════════════════════════

pub fn module_new(name: &str) -> ObjPtr {
    alloc_module(name, None)
}

/// An empty extension module for `def`, not yet initialized.
pub(crate) fn extension_module_new(def: Arc<ModuleDef>) -> ObjPtr {
    let name = def.name.clone();
    alloc_module(&name, Some(def))
}

fn alloc_module(name: &str, def: Option<Arc<ModuleDef>>) -> ObjPtr {
    alloc(
        builtins().module,
        Payload::Module(ModuleData {
            name: name.to_string(),
            dict: Mutex::new(index_map_new()),
            def,
            state: AtomicPtr::new(std::ptr::null_mut()),
        }),
    )
}

/// Name a module was created with.
pub fn module_name(op: ObjPtr) -> Option<String> {
    module_data(op).map(|m| m.name.clone())
}

/// Definition of an extension module.
pub fn module_def(op: ObjPtr) -> Option<Arc<ModuleDef>> {
    module_data(op).and_then(|m| m.def.clone())
}

/// Set the auxiliary state slot of a module. Fails with -1 if the slot is
/// occupied or `op` is not a module.
pub fn set_module_state(op: ObjPtr, state: *mut c_void) -> c_int {
    let Some(module) = module_data(op) else {
        return -1;
    };
    match module.state.compare_exchange(
        std::ptr::null_mut(),
        state,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// Clear the module state slot, returning what it held.
pub fn take_module_state(op: ObjPtr) -> *mut c_void {
    module_data(op).map_or(std::ptr::null_mut(), |m| {
        m.state.swap(std::ptr::null_mut(), Ordering::AcqRel)
    })
}

pub(crate) fn module_data<'a>(op: ObjPtr) -> Option<&'a ModuleData> {
    match payload(op) {
        Some(Payload::Module(module)) => Some(module),
        _ => None,
    }
}

/// Bind a builtin function; `receiver` (borrowed, may be null) becomes `self`.
pub fn builtin_new(name: &'static str, func: BuiltinFn, receiver: ObjPtr) -> ObjPtr {
    incref(receiver);
    alloc(
        builtins().builtin,
        Payload::Builtin(BuiltinData {
            name,
            func,
            receiver,
        }),
    )
}

/// Allocate an instance of a host type with an empty handle.
pub fn host_object_new(ty: ObjPtr) -> ObjPtr {
    if type_data(ty).is_none() {
        return std::ptr::null_mut();
    }
    alloc(ty, Payload::Host(Handle::new()))
}

/// Handle embedded in a host object.
pub fn host_handle<'a>(op: ObjPtr) -> Option<&'a Handle> {
    match payload(op) {
        Some(Payload::Host(handle)) => Some(handle),
        _ => None,
    }
}

/// Wrap an open file. The guest object owns `file` from now on.
pub fn file_new(file: File, name: &str, mode: &str, encoding: Option<&str>) -> ObjPtr {
    alloc(
        builtins().file,
        Payload::File(FileData {
            file: Mutex::new(Some(file)),
            name: name.to_string(),
            mode: mode.to_string(),
            encoding: encoding.map(str::to_string),
        }),
    )
}

pub(crate) fn file_data<'a>(op: ObjPtr) -> Option<&'a FileData> {
    match payload(op) {
        Some(Payload::File(data)) => Some(data),
        _ => None,
    }
}

/// Whether `op` is exactly an instance of `ty`.
pub fn is_exact(op: ObjPtr, ty: ObjPtr) -> bool {
    deref(op).is_some() && type_of(op) == ty
}
