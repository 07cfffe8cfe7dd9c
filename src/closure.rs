//! Handing guest references to concurrently started flows.
//!
//! A thread holding guest access captures references with
//! [`ClosureBuddy::capture`], which increments them on behalf of a flow that
//! has not started yet and returns a [`Closure`] token. The new flow passes
//! the token to [`Spawner::new_flow`](crate::Spawner::new_flow), which
//! accepts it: the captured references become the flow's, released when the
//! flow's context closes. A token that never reaches a flow is rejected,
//! explicitly or when dropped, and its references go back to the buddy.
//!
//! [`ClosureBuddy::close`] waits until every token is resolved, then releases
//! the references of the rejected ones.
//!
//! ```no_run
//! # use guestlink::{ClosureBuddy, Ctx, Object};
//! # fn run(ctx: &Ctx, o: Object) -> guestlink::Result<()> {
//! let buddy = ClosureBuddy::new(ctx);
//! let closure = buddy.capture(&[o]);
//! let spawner = ctx.spawner();
//! let worker = std::thread::spawn(move || -> guestlink::Result<()> {
//!     let flow = spawner.new_flow(Some(closure))?;
//!     {
//!         let _access = flow.access();
//!         // use `o` here
//!     }
//!     flow.close()
//! });
//! buddy.close();
//! # let _ = worker.join();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::context::Ctx;
use crate::object::Object;

/// Counts unresolved tokens; waiters block until it reaches zero.
#[derive(Default)]
struct WaitGroup {
    pending: Mutex<usize>,
    done: Condvar,
}

impl WaitGroup {
    fn add(&self) {
        *self.pending.lock() += 1;
    }

    fn done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.done.wait(&mut pending);
        }
    }
}

/// Resolution state of one token.
struct Captured {
    objects: Vec<Object>,
    resolved: bool,
}

/// A token carrying captured guest references to a new flow.
pub struct Closure {
    captured: Arc<Mutex<Captured>>,
    group: Arc<WaitGroup>,
}

impl Closure {
    /// Take ownership of the captured references. The caller releases them.
    pub fn accept(self) -> Vec<Object> {
        let objects = {
            let mut captured = self.captured.lock();
            if captured.resolved {
                return Vec::new();
            }
            captured.resolved = true;
            std::mem::take(&mut captured.objects)
        };
        self.group.done();
        trace!(count = objects.len(), "closure accepted");
        objects
    }

    /// Refuse the captured references; the buddy releases them.
    pub fn reject(self) {
        drop(self);
    }

    fn resolve_rejected(&self) {
        let mut captured = self.captured.lock();
        if captured.resolved {
            return;
        }
        captured.resolved = true;
        drop(captured);
        self.group.done();
        trace!("closure rejected");
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        self.resolve_rejected();
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let captured = self.captured.lock();
        f.debug_struct("Closure")
            .field("captured", &captured.objects.len())
            .field("resolved", &captured.resolved)
            .finish()
    }
}

/// Tracks the closures issued by one context.
pub struct ClosureBuddy<'ctx> {
    ctx: &'ctx Ctx,
    group: Arc<WaitGroup>,
    closures: Mutex<Vec<Arc<Mutex<Captured>>>>,
}

impl<'ctx> ClosureBuddy<'ctx> {
    pub fn new(ctx: &'ctx Ctx) -> Self {
        Self {
            ctx,
            group: Arc::new(WaitGroup::default()),
            closures: Mutex::new(Vec::new()),
        }
    }

    /// Capture `objects` for a flow about to start. The calling context
    /// must hold access.
    pub fn capture(&self, objects: &[Object]) -> Closure {
        self.ctx.incref_all(objects);
        let captured = Arc::new(Mutex::new(Captured {
            objects: objects.to_vec(),
            resolved: false,
        }));
        self.closures.lock().push(Arc::clone(&captured));
        self.group.add();
        Closure {
            captured,
            group: Arc::clone(&self.group),
        }
    }

    /// Wait for every closure to be resolved, then release the references
    /// of the rejected ones, entering the guest if needed.
    pub fn close(self) {
        drop(self);
    }

    fn finish(&self) {
        self.group.wait();
        let rejected: Vec<Object> = self
            .closures
            .lock()
            .drain(..)
            .flat_map(|captured| std::mem::take(&mut captured.lock().objects))
            .collect();
        if rejected.is_empty() {
            return;
        }
        let _access = self.ctx.access();
        self.ctx.decref_all(&rejected);
        trace!(count = rejected.len(), "released rejected captures");
    }
}

impl Drop for ClosureBuddy<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
