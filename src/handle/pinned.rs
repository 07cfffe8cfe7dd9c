//! Handle backed by its own heap allocation.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::HostAny;

/// Owns one host value in a stable allocation.
pub struct Handle {
    value: Mutex<Option<HostAny>>,
    closed: AtomicBool,
}

impl Handle {
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Store `value`, releasing whatever was stored before.
    pub fn set(&self, value: HostAny) {
        debug_assert!(!self.is_closed(), "Handle::set after close");
        if self.is_closed() {
            return;
        }
        let previous = self.value.lock().replace(value);
        drop(previous);
    }

    pub fn get(&self) -> Option<HostAny> {
        debug_assert!(!self.is_closed(), "Handle::get after close");
        self.value.lock().clone()
    }

    /// Stored value as `T`, `None` if empty or of another type.
    pub fn get_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get().and_then(super::downcast::<T>)
    }

    /// Stop tracking the value. Further `get`/`set` calls are usage errors.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let previous = self.value.lock().take();
        drop(previous);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("set", &self.value.lock().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
