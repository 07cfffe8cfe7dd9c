//! Handle backed by a synchronized, append-only table of values.
//!
//! The handle stores a 1-based slot index (0 means unset). Slots are never
//! reused: closing a handle clears its slot and resets the index.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::HostAny;

static VALUES: Mutex<Vec<Option<HostAny>>> = Mutex::new(Vec::new());

/// Owns one host value through an index into the process-wide table.
pub struct Handle {
    index: AtomicUsize,
    closed: AtomicBool,
}

impl Handle {
    pub const fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Store `value`, releasing whatever was stored before.
    pub fn set(&self, value: HostAny) {
        debug_assert!(!self.is_closed(), "Handle::set after close");
        if self.is_closed() {
            return;
        }
        let mut values = VALUES.lock();
        let index = self.index.load(Ordering::Acquire);
        let previous = match index.checked_sub(1).and_then(|i| values.get_mut(i)) {
            Some(slot) => slot.replace(value),
            None => {
                values.push(Some(value));
                self.index.store(values.len(), Ordering::Release);
                None
            }
        };
        drop(values);
        drop(previous);
    }

    pub fn get(&self) -> Option<HostAny> {
        debug_assert!(!self.is_closed(), "Handle::get after close");
        let index = self.index.load(Ordering::Acquire);
        let values = VALUES.lock();
        index
            .checked_sub(1)
            .and_then(|i| values.get(i))
            .and_then(Option::clone)
    }

    /// Stored value as `T`, `None` if empty or of another type.
    pub fn get_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get().and_then(super::downcast::<T>)
    }

    /// Clear the slot and forget the index.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let index = self.index.swap(0, Ordering::AcqRel);
        let previous = {
            let mut values = VALUES.lock();
            index
                .checked_sub(1)
                .and_then(|i| values.get_mut(i))
                .and_then(Option::take)
        };
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

impl Drop for Handle {
    fn drop(&mut self) {
        if self.index.load(Ordering::Acquire) != 0 {
            self.close();
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}
