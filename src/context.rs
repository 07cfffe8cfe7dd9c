//! Execution contexts: embedding, new flows and exclusive guest access.
//!
//! A [`Ctx`] is one host thread's right to use the guest interpreter. The
//! root context comes from [`Ctx::embed`] and holds access from the start.
//! Contexts for other threads are derived through a [`Spawner`] and start
//! without access. Access is toggled with [`Ctx::enter_guest`] and
//! [`Ctx::leave_guest`], or scoped with [`Ctx::access`].
//!
//! # Pinning
//!
//! The guest keeps per-thread state, so a context must never move to
//! another OS thread. `Ctx` is neither `Send` nor `Sync`; a [`Spawner`] is
//! what crosses threads. Each thread owns at most one context.
//!
//! # Usage errors
//!
//! Entering while access is enabled, or leaving while it is disabled, is a
//! protocol violation. The interpreter lock detects both and aborts the
//! operation with a panic after logging at `error` level. The protocol gives
//! mutual exclusion only: waiters are not ordered, and host data shared by
//! several contexts needs its own synchronization.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, trace, warn};

use crate::closure::Closure;
use crate::convert::record::StructTable;
use crate::error::{Error, GuestError, Result};
use crate::expose::{self, HostTypes};
use crate::guest::{self, ObjPtr, TsPtr};
use crate::handle::Handle;
use crate::object::Object;

/// Per-embedding host state, shared by every context of the embedding.
#[derive(Default)]
pub(crate) struct State {
    pub(crate) types: RwLock<Option<HostTypes>>,
    pub(crate) structs: RwLock<StructTable>,
}

enum Closer {
    Root,
    Flow { captured: Vec<Object> },
}

thread_local! {
    static OWNS_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

fn owns_context() -> bool {
    OWNS_CONTEXT.with(Cell::get)
}

fn set_owns_context(owned: bool) {
    OWNS_CONTEXT.with(|flag| flag.set(owned));
}

/// One host thread's access window into the guest interpreter.
pub struct Ctx {
    state: Arc<Handle>,
    ts: TsPtr,
    enabled: Cell<bool>,
    closer: Option<Closer>,
}

impl Ctx {
    /// Start the guest interpreter and return the root context, holding
    /// access. Fails if the interpreter is already running.
    #[instrument]
    pub fn embed() -> Result<Ctx> {
        let ts = guest::initialize();
        if ts.is_null() {
            return Err(Error::AlreadyInitialized);
        }
        let state = Arc::new(Handle::new());
        state.set(Arc::new(State::default()));
        set_owns_context(true);
        let ctx = Ctx {
            state,
            ts,
            enabled: Cell::new(true),
            closer: Some(Closer::Root),
        };
        if let Err(err) = ctx.init_types() {
            if let Err(close_err) = ctx.close() {
                warn!(%close_err, "closing a partially embedded interpreter");
            }
            return Err(err);
        }
        debug!("guest interpreter embedded");
        Ok(ctx)
    }

    /// Context for a guest-to-host call on an object whose type carries the
    /// embedding state. Access is held by the calling thread.
    pub(crate) fn extend_object(o: ObjPtr) -> Result<Ctx> {
        Self::from_state_slot(guest::type_state(guest::type_of(o)))
    }

    fn from_state_slot(slot: *mut std::ffi::c_void) -> Result<Ctx> {
        let raw = slot.cast::<Handle>().cast_const();
        if raw.is_null() {
            return Err(Error::NotInitialized);
        }
        // SAFETY: state slots hold a strong count from `Arc::into_raw`, given
        // back only under access by the code that set it.
        let state = unsafe {
            Arc::increment_strong_count(raw);
            Arc::from_raw(raw)
        };
        if state.is_closed() || state.get().is_none() {
            return Err(Error::NotInitialized);
        }
        Ok(Self::extended(state))
    }

    fn extended(state: Arc<Handle>) -> Ctx {
        Ctx {
            state,
            ts: guest::current(),
            enabled: Cell::new(true),
            closer: None,
        }
    }

    /// Give a new extension module a state of its own, with its own host
    /// types, and return a context on it. The guest is importing the module
    /// on this thread, so access is held.
    pub(crate) fn init_module(module: ObjPtr) -> Result<Ctx> {
        let state = Arc::new(Handle::new());
        state.set(Arc::new(State::default()));
        let raw = Arc::into_raw(Arc::clone(&state));
        if guest::set_module_state(module, raw.cast_mut().cast()) < 0 {
            // SAFETY: the slot refused the pointer, so this is its only owner.
            drop(unsafe { Arc::from_raw(raw) });
            return Err(Error::runtime("module state is already set"));
        }
        let ctx = Self::extended(state);
        ctx.init_types()?;
        Ok(ctx)
    }

    /// Tear down the state of an extension module about to be freed.
    pub(crate) fn release_module(module: ObjPtr) {
        let raw = guest::take_module_state(module).cast::<Handle>().cast_const();
        if raw.is_null() {
            return;
        }
        // SAFETY: set from `Arc::into_raw` in `init_module`, taken back once.
        let state = unsafe { Arc::from_raw(raw) };
        let ctx = Self::extended(state);
        ctx.deinit_types();
        ctx.state.close();
        debug!("extension module state released");
    }

    /// Context without an embedding, for releasing references from
    /// deallocation slots that run after the root context closed.
    pub(crate) fn detached() -> Ctx {
        let state = Arc::new(Handle::new());
        state.close();
        Self::extended(state)
    }

    /// A `Send` factory for contexts on other threads.
    pub fn spawner(&self) -> Spawner {
        Spawner {
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn state(&self) -> Result<Arc<State>> {
        if self.state.is_closed() {
            return Err(Error::NotInitialized);
        }
        self.state
            .get_as::<State>()
            .ok_or(Error::NotInitialized)
    }

    pub(crate) fn state_handle(&self) -> &Arc<Handle> {
        &self.state
    }

    /// Host-backed guest types of this embedding.
    pub(crate) fn host_types(&self) -> Result<HostTypes> {
        let state = self.state()?;
        let types = *state.types.read();
        types.ok_or(Error::NotInitialized)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════════════════════════════════════

    /// Block until this context holds exclusive guest access.
    ///
    /// Calling it while access is already enabled is a usage error.
    pub fn enter_guest(&self) {
        guest::acquire_thread(self.ts);
        self.enabled.set(true);
        trace!("entered guest");
    }

    /// Give up exclusive guest access. Do it before slow host-only work.
    ///
    /// Calling it while access is disabled is a usage error.
    pub fn leave_guest(&self) {
        self.enabled.set(false);
        guest::release_thread(self.ts);
        trace!("left guest");
    }

    pub fn has_access(&self) -> bool {
        self.enabled.get()
    }

    /// Hold access for the lifetime of the guard. If access is already
    /// enabled the guard leaves it as it is.
    pub fn access(&self) -> Access<'_> {
        let entered = !self.has_access();
        if entered {
            self.enter_guest();
        }
        Access { ctx: self, entered }
    }

    /// Release access for the lifetime of the guard, if held.
    pub fn release(&self) -> Released<'_> {
        let left = self.has_access();
        if left {
            self.leave_guest();
        }
        Released { ctx: self, left }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    fn init_types(&self) -> Result<()> {
        let types = expose::init_types(self)?;
        *self.state()?.types.write() = Some(types);
        debug!("host types initialized");
        Ok(())
    }

    fn deinit_types(&self) {
        let Ok(state) = self.state() else {
            return;
        };
        crate::convert::record::deregister_all(self, &state);
        let types = state.types.write().take();
        if let Some(types) = types {
            expose::deinit_types(self, types);
            debug!("host types torn down");
        }
    }

    /// Dispose of the context.
    ///
    /// The root context tears down the host types and finalizes the
    /// interpreter. A derived context releases the references captured on
    /// its behalf and frees its thread-state, entering the guest first if
    /// needed. Contexts handed to host functions by the guest close as a
    /// no-op.
    #[instrument(skip(self))]
    pub fn close(mut self) -> Result<()> {
        let Some(closer) = self.closer.take() else {
            return Ok(());
        };
        match closer {
            Closer::Root => {
                if !self.has_access() {
                    self.enter_guest();
                }
                self.deinit_types();
                self.enabled.set(false);
                guest::finalize(self.ts);
                self.state.close();
                set_owns_context(false);
                debug!("guest interpreter finalized");
                Ok(())
            }
            Closer::Flow { captured } => {
                set_owns_context(false);
                if self.state.is_closed() {
                    if self.has_access() {
                        self.leave_guest();
                    }
                    guest::thread_state_delete(self.ts);
                    return Err(Error::NotInitialized);
                }
                if !self.has_access() {
                    self.enter_guest();
                }
                self.decref_all(&captured);
                guest::thread_state_clear(self.ts);
                self.leave_guest();
                guest::thread_state_delete(self.ts);
                debug!(captured = captured.len(), "guest flow closed");
                Ok(())
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Error channel
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fetch the pending guest exception as a host error, clearing it.
    pub fn catch_error(&self) -> Error {
        let exc = guest::err_fetch();
        if exc.is_null() {
            return Error::runtime("guest call failed without setting an exception");
        }
        let type_name = guest::type_name(guest::type_of(exc));
        let message = guest::exception_message(exc).unwrap_or_else(|| guest::str_of(exc));
        let frames = guest::exception_traceback(exc);
        guest::decref(exc);
        Error::Guest(GuestError::new(type_name, message).with_frames(&frames))
    }

    /// Raise `err` in the guest. Guest errors keep their exception type,
    /// everything else becomes `RuntimeError`.
    pub fn set_error(&self, err: &Error) {
        let ty = guest::exception_type(err.exception_name());
        let ty = if ty.is_null() {
            guest::exception_type("RuntimeError")
        } else {
            ty
        };
        guest::err_set_string(ty, &err.exception_message());
    }

    /// Raise a guest exception of type `type_name` with `message`.
    pub fn raise(&self, type_name: &str, message: &str) {
        self.set_error(&Error::guest(type_name, message));
    }

    /// Whether a guest exception is pending.
    pub fn error_pending(&self) -> bool {
        !guest::err_occurred().is_null()
    }
}

impl Drop for Ctx {
    fn drop(&mut self) {
        if self.closer.is_some() {
            warn!("guest context dropped without close, its thread-state leaks");
        }
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.closer {
            Some(Closer::Root) => "root",
            Some(Closer::Flow { .. }) => "flow",
            None => "extended",
        };
        f.debug_struct("Ctx")
            .field("kind", &kind)
            .field("access", &self.has_access())
            .finish()
    }
}

/// Scoped exclusive access, see [`Ctx::access`].
pub struct Access<'ctx> {
    ctx: &'ctx Ctx,
    entered: bool,
}

impl Drop for Access<'_> {
    fn drop(&mut self) {
        if self.entered {
            self.ctx.leave_guest();
        }
    }
}

/// Scoped release of access, see [`Ctx::release`].
pub struct Released<'ctx> {
    ctx: &'ctx Ctx,
    left: bool,
}

impl Drop for Released<'_> {
    fn drop(&mut self) {
        if self.left {
            self.ctx.enter_guest();
        }
    }
}

/// Creates contexts for new execution flows. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct Spawner {
    state: Arc<Handle>,
}

impl Spawner {
    /// Create a context for the calling thread, derived from the embedding
    /// this spawner came from. Access is not granted.
    ///
    /// If `closure` is given its captured references are accepted and
    /// released when the new context closes. On failure the closure is
    /// rejected, handing the references back to its buddy.
    #[instrument(skip_all)]
    pub fn new_flow(&self, closure: Option<Closure>) -> Result<Ctx> {
        if self.state.is_closed() || self.state.get().is_none() {
            return Err(Error::NotInitialized);
        }
        if owns_context() {
            return Err(Error::ContextOwned);
        }
        let interp = guest::interpreter().ok_or(Error::NotInitialized)?;
        let ts = guest::thread_state_new(&interp);
        let captured = closure.map(Closure::accept).unwrap_or_default();
        set_owns_context(true);
        debug!(captured = captured.len(), "guest flow created");
        Ok(Ctx {
            state: Arc::clone(&self.state),
            ts,
            enabled: Cell::new(false),
            closer: Some(Closer::Flow { captured }),
        })
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("closed", &self.state.is_closed())
            .finish()
    }
}
