//! The interpreter lock and guest thread-states.
//!
//! Exactly one thread-state may hold the lock at a time. A thread-state is
//! bound to the OS thread that acquired the lock with it: the thread-local
//! "current" pointer is what every exception and call-frame operation uses.
//! Waiters are not ordered.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use super::Interpreter;
use super::fatal;
use super::object::{Frame, ObjPtr, decref};

pub(crate) struct InterpreterLock {
    holder: Mutex<Option<u64>>,
    released: Condvar,
}

impl InterpreterLock {
    pub(crate) const fn new() -> Self {
        Self {
            holder: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    fn acquire(&self, id: u64) {
        let mut holder = self.holder.lock();
        if *holder == Some(id) {
            drop(holder);
            fatal("thread state already holds the interpreter lock");
        }
        while holder.is_some() {
            self.released.wait(&mut holder);
        }
        *holder = Some(id);
    }

    fn release(&self, id: u64) {
        let mut holder = self.holder.lock();
        if *holder != Some(id) {
            drop(holder);
            fatal("releasing the interpreter lock with a thread state that does not hold it");
        }
        *holder = None;
        drop(holder);
        self.released.notify_one();
    }

    fn is_held_by(&self, id: u64) -> bool {
        *self.holder.lock() == Some(id)
    }
}

/// Per-execution-unit guest state: pending exception and call frames.
pub struct ThreadState {
    id: u64,
    interp: Arc<Interpreter>,
    /// Owned pending exception instance, or null.
    pub(crate) exc: Mutex<ObjPtr>,
    pub(crate) frames: Mutex<Vec<Frame>>,
}

impl ThreadState {
    pub(crate) fn interp(&self) -> &Arc<Interpreter> {
        &self.interp
    }
}

pub type TsPtr = *mut ThreadState;

static NEXT_THREAD_STATE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<TsPtr> = const { Cell::new(std::ptr::null_mut()) };
}

pub(crate) fn deref_ts<'a>(ts: TsPtr) -> Option<&'a ThreadState> {
    // SAFETY: thread-state pointers come from `thread_state_new` and stay
    // valid until `thread_state_delete`.
    unsafe { ts.as_ref() }
}

/// Create a thread-state for `interp`. The lock is not acquired.
pub fn thread_state_new(interp: &Arc<Interpreter>) -> TsPtr {
    Box::into_raw(Box::new(ThreadState {
        id: NEXT_THREAD_STATE.fetch_add(1, Ordering::Relaxed),
        interp: Arc::clone(interp),
        exc: Mutex::new(std::ptr::null_mut()),
        frames: Mutex::new(Vec::new()),
    }))
}

/// Drop the pending exception and frames. The caller holds the lock.
pub fn thread_state_clear(ts: TsPtr) {
    if let Some(state) = deref_ts(ts) {
        let exc = std::mem::replace(&mut *state.exc.lock(), std::ptr::null_mut());
        decref(exc);
        state.frames.lock().clear();
    }
}

/// Free a thread-state. It must not hold the lock, and `ts` must not be
/// used afterwards.
pub(crate) fn thread_state_delete(ts: TsPtr) {
    let Some(state) = deref_ts(ts) else {
        return;
    };
    if state.interp.lock.is_held_by(state.id) {
        fatal("deleting a thread state that holds the interpreter lock");
    }
    CURRENT.with(|cur| {
        if cur.get() == ts {
            cur.set(std::ptr::null_mut());
        }
    });
    // SAFETY: produced by `Box::into_raw` in `thread_state_new`, and the
    // caller gives up its last use here.
    drop(unsafe { Box::from_raw(ts) });
}

/// Interpreter the thread-state belongs to.
pub fn thread_state_interp(ts: TsPtr) -> Option<Arc<Interpreter>> {
    deref_ts(ts).map(|state| Arc::clone(&state.interp))
}

/// Block until `ts` holds the lock, then make it current on this thread.
pub fn acquire_thread(ts: TsPtr) {
    let Some(state) = deref_ts(ts) else {
        fatal("acquiring the interpreter lock without a thread state");
    };
    state.interp.lock.acquire(state.id);
    CURRENT.with(|cur| cur.set(ts));
}

/// Release the lock held by `ts`.
pub fn release_thread(ts: TsPtr) {
    let Some(state) = deref_ts(ts) else {
        fatal("releasing the interpreter lock without a thread state");
    };
    CURRENT.with(|cur| {
        if cur.get() == ts {
            cur.set(std::ptr::null_mut());
        }
    });
    state.interp.lock.release(state.id);
}

/// Thread-state holding the lock on this OS thread, null if none.
pub fn current() -> TsPtr {
    CURRENT.with(Cell::get)
}

/// Run `f` with the current thread-state. Calling the guest without holding
/// the lock is fatal.
pub(crate) fn with_current<R>(f: impl FnOnce(&ThreadState) -> R) -> R {
    match deref_ts(current()) {
        Some(state) => f(state),
        None => fatal("guest called without holding the interpreter lock"),
    }
}
