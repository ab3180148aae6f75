//! Critical sections and safe counters
//!
//! [`CritSec`] is a recursive mutex with scoped acquisition. One
//! process-wide instance, the [`base_lock`], exists solely to guard
//! one-time initialization sequences that cannot rely on the rest of the
//! kernel being up yet (the CRC table fault-in, subsystem bring-up).
//!
//! The safe counters are 32-bit cells whose operations are linearizable
//! against other operations on the same counter.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::Result;

/// A recursive critical section.
///
/// The same thread may enter any number of times; the section is released
/// when every guard has been dropped. Entry blocks indefinitely.
pub struct CritSec {
    inner: ReentrantMutex<()>,
}

impl CritSec {
    /// Create a new, unowned critical section.
    pub const fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
        }
    }

    /// Enter the critical section, blocking until it is available. The
    /// returned guard releases one level of ownership when dropped.
    pub fn enter(&self) -> CritSecGuard<'_> {
        CritSecGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Try to enter without blocking.
    pub fn try_enter(&self) -> Option<CritSecGuard<'_>> {
        self.inner.try_lock().map(|guard| CritSecGuard { _guard: guard })
    }
}

impl Default for CritSec {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a [`CritSec`] level.
pub struct CritSecGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

static BASE_LOCK: CritSec = CritSec::new();

/// The process-wide bootstrap lock.
///
/// Used only around one-time initialization state. Nothing that can
/// block for arbitrary time may run under it.
pub fn base_lock() -> &'static CritSec {
    &BASE_LOCK
}

/// A linearizable signed 32-bit counter.
pub struct SafeInt32Counter {
    value: AtomicI32,
}

impl SafeInt32Counter {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self::with_value(0)
    }

    /// Create a counter starting at the given value.
    pub const fn with_value(init: i32) -> Self {
        Self {
            value: AtomicI32::new(init),
        }
    }

    /// Read the current value.
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Store a new value, returning the previous one.
    pub fn exchange(&self, new_value: i32) -> i32 {
        self.value.swap(new_value, Ordering::SeqCst)
    }

    /// Install `new_value` if the current value equals `compare`. Always
    /// returns the value the counter held before the operation.
    pub fn compare_and_exchange(&self, new_value: i32, compare: i32) -> i32 {
        match self
            .value
            .compare_exchange(compare, new_value, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(previous) => previous,
            Err(previous) => previous,
        }
    }

    /// Add to the counter, returning the new value.
    pub fn add_to(&self, to_add: i32) -> i32 {
        self.value.fetch_add(to_add, Ordering::SeqCst).wrapping_add(to_add)
    }

    /// Subtract from the counter, returning the new value.
    pub fn sub_from(&self, to_sub: i32) -> i32 {
        self.value.fetch_sub(to_sub, Ordering::SeqCst).wrapping_sub(to_sub)
    }

    /// Increment, returning the new value.
    pub fn inc(&self) -> i32 {
        self.add_to(1)
    }

    /// Decrement, returning the new value.
    pub fn dec(&self) -> i32 {
        self.sub_from(1)
    }
}

impl Default for SafeInt32Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// A linearizable unsigned 32-bit counter.
pub struct SafeCard32Counter {
    value: AtomicU32,
}

impl SafeCard32Counter {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self::with_value(0)
    }

    /// Create a counter starting at the given value.
    pub const fn with_value(init: u32) -> Self {
        Self {
            value: AtomicU32::new(init),
        }
    }

    /// Read the current value.
    pub fn value(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Store a new value, returning the previous one.
    pub fn exchange(&self, new_value: u32) -> u32 {
        self.value.swap(new_value, Ordering::SeqCst)
    }

    /// Install `new_value` if the current value equals `compare`. Always
    /// returns the value the counter held before the operation.
    pub fn compare_and_exchange(&self, new_value: u32, compare: u32) -> u32 {
        match self
            .value
            .compare_exchange(compare, new_value, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(previous) => previous,
            Err(previous) => previous,
        }
    }

    /// Add to the counter, returning the new value.
    pub fn add_to(&self, to_add: u32) -> u32 {
        self.value.fetch_add(to_add, Ordering::SeqCst).wrapping_add(to_add)
    }

    /// Subtract from the counter, returning the new value.
    pub fn sub_from(&self, to_sub: u32) -> u32 {
        self.value.fetch_sub(to_sub, Ordering::SeqCst).wrapping_sub(to_sub)
    }

    /// Increment, returning the new value.
    pub fn inc(&self) -> u32 {
        self.add_to(1)
    }

    /// Decrement, returning the new value.
    pub fn dec(&self) -> u32 {
        self.sub_from(1)
    }
}

impl Default for SafeCard32Counter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn initialize() -> Result<()> {
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_critsec_is_recursive() {
        let cs = CritSec::new();
        let _outer = cs.enter();
        let _inner = cs.enter();
        assert!(cs.try_enter().is_some());
    }

    #[test]
    fn test_critsec_excludes_other_threads() {
        let cs = Arc::new(CritSec::new());
        let guard = cs.enter();

        let cs2 = Arc::clone(&cs);
        let blocked = std::thread::spawn(move || cs2.try_enter().is_none())
            .join()
            .unwrap();
        assert!(blocked);
        drop(guard);
    }

    #[test]
    fn test_counter_returns_new_value() {
        let counter = SafeInt32Counter::with_value(10);
        assert_eq!(counter.add_to(5), 15);
        assert_eq!(counter.sub_from(3), 12);
        assert_eq!(counter.inc(), 13);
        assert_eq!(counter.dec(), 12);
        assert_eq!(counter.value(), 12);
    }

    #[test]
    fn test_counter_exchange_returns_previous() {
        let counter = SafeCard32Counter::with_value(7);
        assert_eq!(counter.exchange(9), 7);
        assert_eq!(counter.value(), 9);
    }

    #[test]
    fn test_compare_and_exchange() {
        let counter = SafeInt32Counter::with_value(5);

        // Mismatched compare leaves the value alone but still reports it
        assert_eq!(counter.compare_and_exchange(100, 4), 5);
        assert_eq!(counter.value(), 5);

        // Matching compare installs the new value
        assert_eq!(counter.compare_and_exchange(100, 5), 5);
        assert_eq!(counter.value(), 100);
    }

    #[test]
    fn test_concurrent_increments() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_000;

        let counter = Arc::new(SafeCard32Counter::new());
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    counter.inc();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.value(), (THREADS * PER_THREAD) as u32);
    }
}
