//! Counting semaphore gating the disk queue workers.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore built on a mutex and condition variable.
///
/// `release` adds permits and wakes waiters; `acquire` blocks until a permit
/// is available and takes it.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Adds `n` permits and returns the new count.
    pub fn release(&self, n: usize) -> usize {
        let mut permits = self.permits.lock();
        *permits += n;
        let count = *permits;
        drop(permits);
        if n == 1 {
            self.available.notify_one();
        } else if n > 1 {
            self.available.notify_all();
        }
        count
    }

    /// Blocks until a permit is available, takes it and returns the remaining count.
    pub fn acquire(&self) -> usize {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
        *permits
    }
}
