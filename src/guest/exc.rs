//! Pending-exception indicator of the current thread-state.
//!
//! Exceptions are always stored as instances, so fetching never needs a
//! separate normalization step: the fetched value carries its type, its
//! message and the traceback captured when it was raised.

use super::lock::with_current;
use super::object::{
    ExceptionData, Frame, ObjPtr, Payload, alloc, decref, is_subtype, payload, type_of,
};

/// Raise a new `ty` instance with `message`.
pub fn err_set_string(ty: ObjPtr, message: &str) {
    let traceback = with_current(|ts| ts.frames.lock().clone());
    let exc = alloc(
        ty,
        Payload::Exception(ExceptionData {
            message: message.to_string(),
            traceback,
        }),
    );
    err_restore(exc);
}

/// Make `exc` (stolen) the pending exception, replacing any previous one.
pub fn err_restore(exc: ObjPtr) {
    let old = with_current(|ts| std::mem::replace(&mut *ts.exc.lock(), exc));
    decref(old);
}

/// Borrowed type of the pending exception, null if none.
pub fn err_occurred() -> ObjPtr {
    with_current(|ts| type_of(*ts.exc.lock()))
}

/// Whether the pending exception is a `ty`.
pub fn err_matches(ty: ObjPtr) -> bool {
    is_subtype(err_occurred(), ty)
}

/// Take the pending exception (owned), null if none.
pub fn err_fetch() -> ObjPtr {
    with_current(|ts| std::mem::replace(&mut *ts.exc.lock(), std::ptr::null_mut()))
}

pub fn err_clear() {
    decref(err_fetch());
}

pub fn exception_message(exc: ObjPtr) -> Option<String> {
    match payload(exc) {
        Some(Payload::Exception(data)) => Some(data.message.clone()),
        _ => None,
    }
}

/// Guest frames active when `exc` was raised, outermost first.
pub fn exception_traceback(exc: ObjPtr) -> Vec<Frame> {
    match payload(exc) {
        Some(Payload::Exception(data)) => data.traceback.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn push_frame(name: String) {
    with_current(|ts| {
        let mut frames = ts.frames.lock();
        let line = u32::try_from(frames.len() + 1).unwrap_or(u32::MAX);
        frames.push(Frame {
            name,
            file: "<guest>".to_string(),
            line,
        });
    });
}

pub(crate) fn pop_frame() {
    with_current(|ts| ts.frames.lock().pop());
}
