//! Reference guest runtime.
//!
//! A small, reference-counted, single-writer interpreter core that provides
//! the ABI the bridging layer depends on: object allocation and reference
//! counting, exception set/fetch, attribute and call protocols, sequence and
//! mapping protocols, module and type creation, and the interpreter lock
//! with its thread-states.
//!
//! # Conventions
//!
//! Functions returning [`ObjPtr`] document whether the result is a *new*
//! reference (the caller must release it) or a *borrowed* one. A null result
//! from a fallible function means an exception is pending on the current
//! thread-state.
//!
//! # Thread Safety
//!
//! Every function except reference counting and the lifecycle entry points
//! must be called by a thread whose thread-state holds the interpreter lock.
//! Violations the runtime can detect are fatal.

mod builtin;
pub mod exc;
pub mod lock;
pub mod object;
pub mod ops;
pub mod types;
pub mod value;

use std::ffi::c_int;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

pub use exc::{
    err_clear, err_fetch, err_matches, err_occurred, err_restore, err_set_string,
    exception_message, exception_traceback,
};
pub use lock::{
    ThreadState, TsPtr, acquire_thread, current, release_thread, thread_state_clear,
    thread_state_interp, thread_state_new,
};
pub use object::{
    CallSlot, DeallocSlot, Frame, GetAttrSlot, HostSlots, IMMORTAL_REFCNT, ModuleDef,
    ModuleFreeSlot, ModuleInitSlot, ObjPtr, RawObject, SetAttrSlot, decref, incref, is_subtype,
    is_type, refcnt, type_name, type_of,
};
pub use ops::{
    call, call_method, getattr, is_true, length, mapping_items, object_str, repr, sequence_get_item,
    setattr, str_of,
};
pub use types::{
    exception_type, new_host_type, new_record_type, record_fields, set_type_state,
    take_type_state, type_state,
};
pub use value::{
    bool_from, bool_value, dict_get_item, dict_new, dict_set_item, file_new, float_from,
    float_value, host_handle, host_object_new, is_exact, list_append, list_get_item, list_items,
    list_new, long_from, long_value, module_def, module_name, module_new, none,
    set_module_state, str_from, str_value, take_module_state, tuple_items, tuple_new,
};

pub(crate) use lock::thread_state_delete;
pub(crate) use value::{dict_pairs, file_data};

use crate::prelude::{IndexMap, index_map_new};

/// Abort the current operation on an unrecoverable protocol violation.
#[cold]
#[allow(clippy::panic)]
pub(crate) fn fatal(message: &str) -> ! {
    tracing::error!(message, "fatal guest runtime error");
    panic!("fatal guest runtime error: {message}");
}

/// One running interpreter: its lock and its module table.
pub struct Interpreter {
    pub(crate) lock: lock::InterpreterLock,
    modules: Mutex<IndexMap<String, ObjPtr>>,
}

// SAFETY: module pointers are only touched under the interpreter lock.
unsafe impl Send for Interpreter {}
unsafe impl Sync for Interpreter {}

static RUNTIME: Mutex<Option<Arc<Interpreter>>> = Mutex::new(None);

/// Extension module definitions, by module name. Outlives interpreter
/// restarts.
static EXTENSIONS: Lazy<Mutex<IndexMap<String, Arc<ModuleDef>>>> =
    Lazy::new(|| Mutex::new(index_map_new()));

/// Make `def` importable. Returns -1 if a definition with the same name
/// exists. May be called before the interpreter starts.
pub fn extension_add(def: ModuleDef) -> c_int {
    let mut extensions = EXTENSIONS.lock();
    if extensions.contains_key(&def.name) {
        return -1;
    }
    debug!(name = %def.name, "extension module defined");
    extensions.insert(def.name.clone(), Arc::new(def));
    0
}

/// Forget the definition of `name`. Modules already built stay as they are.
pub fn extension_remove(name: &str) -> c_int {
    match EXTENSIONS.lock().shift_remove(name) {
        Some(_) => 0,
        None => -1,
    }
}

/// Build the extension module `def` and make it importable. Returns a new
/// reference, or null with an exception set when the init slot fails.
fn load_extension(interp: &Interpreter, def: Arc<ModuleDef>) -> ObjPtr {
    let init = def.init;
    let name = def.name.clone();
    let module = value::extension_module_new(def);
    if init(module) < 0 {
        decref(module);
        if err_occurred().is_null() {
            err_set_string(
                exception_type("SystemError"),
                &format!("initialization of {name} failed without raising an exception"),
            );
        }
        return std::ptr::null_mut();
    }
    incref(module);
    if let Some(old) = interp.modules.lock().insert(name.clone(), module) {
        decref(old);
    }
    debug!(%name, "extension module loaded");
    module
}

pub fn is_initialized() -> bool {
    RUNTIME.lock().is_some()
}

/// The running interpreter, if any.
pub fn interpreter() -> Option<Arc<Interpreter>> {
    RUNTIME.lock().clone()
}

/// Start the interpreter. Returns the main thread-state, already holding
/// the lock and current on this thread, or null if already initialized.
pub fn initialize() -> TsPtr {
    let interp = {
        let mut runtime = RUNTIME.lock();
        if runtime.is_some() {
            return std::ptr::null_mut();
        }
        let interp = Arc::new(Interpreter {
            lock: lock::InterpreterLock::new(),
            modules: Mutex::new(index_map_new()),
        });
        *runtime = Some(Arc::clone(&interp));
        interp
    };
    let ts = thread_state_new(&interp);
    acquire_thread(ts);
    interp.modules.lock().extend(builtin::startup_modules());
    debug!("guest interpreter initialized");
    ts
}

/// Stop the interpreter. `ts` must be the thread-state holding the lock; it
/// is released and deleted. Returns -1 if the interpreter was not running.
pub fn finalize(ts: TsPtr) -> c_int {
    let Some(interp) = RUNTIME.lock().take() else {
        return -1;
    };
    let modules: Vec<ObjPtr> = interp.modules.lock().drain(..).map(|(_, m)| m).collect();
    modules.into_iter().for_each(decref);
    thread_state_clear(ts);
    release_thread(ts);
    thread_state_delete(ts);
    debug!("guest interpreter finalized");
    0
}

/// Import a module by name, building extension modules on first import.
/// Returns a new reference.
pub fn import(name: &str) -> ObjPtr {
    let interp = lock::with_current(|ts| Arc::clone(ts.interp()));
    let module = interp.modules.lock().get(name).copied();
    if let Some(module) = module {
        incref(module);
        return module;
    }
    let def = EXTENSIONS.lock().get(name).cloned();
    match def {
        Some(def) => load_extension(&interp, def),
        None => {
            err_set_string(
                exception_type("ModuleNotFoundError"),
                &format!("No module named '{name}'"),
            );
            std::ptr::null_mut()
        }
    }
}

/// Make `module` (borrowed) importable under `name`.
pub fn add_module(name: &str, module: ObjPtr) -> c_int {
    if module.is_null() {
        return -1;
    }
    let interp = lock::with_current(|ts| Arc::clone(ts.interp()));
    incref(module);
    if let Some(old) = interp.modules.lock().insert(name.to_string(), module) {
        decref(old);
    }
    0
}
