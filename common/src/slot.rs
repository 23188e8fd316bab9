use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A single-value slot for handing a result from a callback thread to a waiter.
///
/// Sending overwrites any value that was not taken yet. Waiters block on a
/// condition variable instead of spinning.
#[derive(Debug)]
pub struct Slot<T> {
    value: Mutex<Option<T>>,
    filled: Condvar,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    /// Stores a value and wakes every waiter.
    pub fn send(&self, val: T) {
        *self.value.lock() = Some(val);
        self.filled.notify_all();
    }

    /// Takes the value if present, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    /// Returns true if there is a value present.
    pub fn has_value(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Blocks until a value arrives or `timeout` elapses.
    pub fn wait_take(&self, timeout: Duration) -> Option<T> {
        let mut value = self.value.lock();
        if value.is_none() {
            let _ = self
                .filled
                .wait_while_for(&mut value, |v| v.is_none(), timeout);
        }
        value.take()
    }
}
