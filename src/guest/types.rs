//! Builtin and heap type objects.

use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::object::{
    HostSlots, ObjPtr, Payload, TypeData, TypeKind, alloc, alloc_immortal, decref, incref,
    set_immortal_type, type_data,
};
use super::str_from;
use crate::prelude::{IndexMap, index_map_new};

/// Immortal builtin types and singletons, shared by every interpreter
/// lifetime in the process.
pub(crate) struct Builtins {
    pub object: ObjPtr,
    pub type_: ObjPtr,
    pub none_type: ObjPtr,
    pub bool_: ObjPtr,
    pub int: ObjPtr,
    pub float: ObjPtr,
    pub str: ObjPtr,
    pub tuple: ObjPtr,
    pub list: ObjPtr,
    pub dict: ObjPtr,
    pub module: ObjPtr,
    pub builtin: ObjPtr,
    pub file: ObjPtr,
    pub none: ObjPtr,
    pub true_: ObjPtr,
    pub false_: ObjPtr,
    pub exceptions: IndexMap<&'static str, ObjPtr>,
}

// SAFETY: every pointer here is immortal and its payload is immutable or
// mutex-protected.
unsafe impl Send for Builtins {}
unsafe impl Sync for Builtins {}

static BUILTINS: Lazy<Builtins> = Lazy::new(Builtins::bootstrap);

pub(crate) fn builtins() -> &'static Builtins {
    &BUILTINS
}

/// Exception hierarchy as (name, base) pairs, bases first.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("Exception", "BaseException"),
    ("KeyboardInterrupt", "BaseException"),
    ("SystemExit", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("OverflowError", "ArithmeticError"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("AssertionError", "Exception"),
    ("AttributeError", "Exception"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("MemoryError", "Exception"),
    ("NameError", "Exception"),
    ("OSError", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("RuntimeError", "Exception"),
    ("NotImplementedError", "RuntimeError"),
    ("StopIteration", "Exception"),
    ("SystemError", "Exception"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
    ("UnicodeError", "ValueError"),
];

fn type_payload(name: &str, kind: TypeKind, base: ObjPtr, slots: HostSlots) -> Payload {
    Payload::Type(TypeData {
        name: name.to_string(),
        kind,
        base,
        slots,
        state: AtomicPtr::new(std::ptr::null_mut()),
        fields: Vec::new(),
        dict: Mutex::new(index_map_new()),
    })
}

impl Builtins {
    fn bootstrap() -> Self {
        let type_ = alloc_immortal(
            std::ptr::null_mut(),
            type_payload("type", TypeKind::Type, std::ptr::null_mut(), HostSlots::default()),
        );
        set_immortal_type(type_, type_);
        let object = alloc_immortal(
            type_,
            type_payload("object", TypeKind::Object, std::ptr::null_mut(), HostSlots::default()),
        );
        let make = |name: &str, kind: TypeKind, base: ObjPtr| {
            alloc_immortal(type_, type_payload(name, kind, base, HostSlots::default()))
        };

        let none_type = make("NoneType", TypeKind::NoneType, object);
        let int = make("int", TypeKind::Int, object);
        let bool_ = make("bool", TypeKind::Bool, int);

        let mut exceptions: IndexMap<&'static str, ObjPtr> = index_map_new();
        for &(name, base) in EXCEPTIONS {
            let base = exceptions.get(&base).copied().unwrap_or(object);
            exceptions.insert(name, make(name, TypeKind::Exception, base));
        }

        Builtins {
            object,
            type_,
            none_type,
            bool_,
            int,
            float: make("float", TypeKind::Float, object),
            str: make("str", TypeKind::Str, object),
            tuple: make("tuple", TypeKind::Tuple, object),
            list: make("list", TypeKind::List, object),
            dict: make("dict", TypeKind::Dict, object),
            module: make("module", TypeKind::Module, object),
            builtin: make("builtin_function_or_method", TypeKind::Builtin, object),
            file: make("file", TypeKind::File, object),
            none: alloc_immortal(none_type, Payload::None),
            true_: alloc_immortal(bool_, Payload::Bool(true)),
            false_: alloc_immortal(bool_, Payload::Bool(false)),
            exceptions,
        }
    }

    /// Exception type by name, falling back to `RuntimeError`.
    pub fn exception(&self, name: &str) -> ObjPtr {
        self.exceptions
            .get(name)
            .or_else(|| self.exceptions.get("RuntimeError"))
            .copied()
            .unwrap_or(self.object)
    }
}

/// Borrowed reference to a builtin exception type, null if unknown.
pub fn exception_type(name: &str) -> ObjPtr {
    builtins()
        .exceptions
        .get(name)
        .copied()
        .unwrap_or(std::ptr::null_mut())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Heap types
// ═══════════════════════════════════════════════════════════════════════════════

fn new_heap_type(name: &str, kind: TypeKind, slots: HostSlots, fields: Vec<String>) -> ObjPtr {
    let base = builtins().object;
    incref(base);
    let mut payload = type_payload(name, kind, base, slots);
    if let Payload::Type(data) = &mut payload {
        data.fields = fields;
    }
    alloc(builtins().type_, payload)
}

/// Create a record type: a fixed list of named fields, built positionally.
/// Returns a new reference.
pub fn new_record_type(name: &str, module: &str, fields: Vec<String>) -> ObjPtr {
    let ty = new_heap_type(name, TypeKind::Record, HostSlots::default(), fields);
    set_type_dict(ty, "__module__", str_from(module));
    ty
}

/// Create a type whose instances carry a host handle and dispatch through
/// `slots`. Returns a new reference.
pub fn new_host_type(name: &str, module: &str, slots: HostSlots) -> ObjPtr {
    let ty = new_heap_type(name, TypeKind::Host, slots, Vec::new());
    set_type_dict(ty, "__module__", str_from(module));
    ty
}

/// Store `value` (stolen) in the type namespace.
fn set_type_dict(ty: ObjPtr, name: &str, value: ObjPtr) {
    match type_data(ty) {
        Some(data) => {
            if let Some(old) = data.dict.lock().insert(name.to_string(), value) {
                decref(old);
            }
        }
        None => decref(value),
    }
}

/// Field names of a record type.
pub fn record_fields(ty: ObjPtr) -> Option<Vec<String>> {
    type_data(ty)
        .filter(|t| t.kind == TypeKind::Record)
        .map(|t| t.fields.clone())
}

/// Set the auxiliary state slot. Fails with -1 if the slot is occupied.
pub fn set_type_state(ty: ObjPtr, state: *mut c_void) -> c_int {
    let Some(data) = type_data(ty) else {
        return -1;
    };
    match data.state.compare_exchange(
        std::ptr::null_mut(),
        state,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// Current auxiliary state, null if unset.
pub fn type_state(ty: ObjPtr) -> *mut c_void {
    type_data(ty).map_or(std::ptr::null_mut(), |t| t.state.load(Ordering::Acquire))
}

/// Clear the auxiliary state slot, returning what it held.
pub fn take_type_state(ty: ObjPtr) -> *mut c_void {
    type_data(ty).map_or(std::ptr::null_mut(), |t| {
        t.state.swap(std::ptr::null_mut(), Ordering::AcqRel)
    })
}
