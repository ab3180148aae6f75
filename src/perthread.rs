//! Per-thread data slots
//!
//! There are two levels of slots here, so don't get them confused. The
//! process uses *one* thread-local cell per thread, and that cell holds a
//! growable array of data slots. Each [`PerThreadSlot`] handle created
//! anywhere in the process reserves one index into every thread's array;
//! a thread's array grows on demand the first time it stores into an
//! index beyond its current size.
//!
//! Slot ids come from a process-wide registry guarded by one lock. Reads
//! never take the lock: a thread only ever reads its own slot array.
//! When a thread exits, the cleanup registered by each slot's owner runs
//! exactly once for every non-null value the thread still holds.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr;

use parking_lot::Mutex;

use crate::Result;

/// Slot arrays grow by a fixed step rather than doubling: allocation is
/// rare and wasted trailing space is worse than the occasional regrow.
const SLOT_ARRAY_INCREMENT: usize = 16;

type CleanupFn = unsafe fn(*mut ());

struct SlotRegistry {
    next_slot: usize,
    owners: Vec<Option<CleanupFn>>,
}

static REGISTRY: Mutex<SlotRegistry> = Mutex::new(SlotRegistry {
    next_slot: 0,
    owners: Vec::new(),
});

struct ThreadSlots {
    slots: RefCell<Vec<*mut ()>>,
}

impl Drop for ThreadSlots {
    fn drop(&mut self) {
        cleanup_slots(self.slots.get_mut());
    }
}

thread_local! {
    static THREAD_SLOTS: ThreadSlots = ThreadSlots {
        slots: RefCell::new(Vec::new()),
    };
}

fn cleanup_slots(slots: &mut Vec<*mut ()>) {
    let registry = REGISTRY.lock();
    for (index, owner) in registry.owners.iter().enumerate().take(registry.next_slot) {
        if index >= slots.len() {
            break;
        }
        let value = slots[index];
        if value.is_null() {
            continue;
        }
        slots[index] = ptr::null_mut();
        if let Some(cleanup) = owner {
            unsafe { cleanup(value) };
        }
    }
    slots.clear();
    slots.shrink_to_fit();
}

unsafe fn drop_value<T>(value: *mut ()) {
    drop(Box::from_raw(value.cast::<T>()));
}

/// A handle to one per-thread data slot.
///
/// Creating the handle reserves a slot id valid in every thread of the
/// process. The value stored through it is per thread: each thread sees
/// only what it stored itself, and a thread that never stored anything
/// reads `None`.
///
/// Handles are process-wide by construction; the slot id is never
/// reclaimed.
pub struct PerThreadSlot<T: 'static> {
    id: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> PerThreadSlot<T> {
    /// Reserve a new slot. The registry lock is held while the slot-owner
    /// table is (possibly) grown and the cleanup for `T` is recorded.
    pub fn new() -> Self {
        let mut registry = REGISTRY.lock();
        if registry.next_slot >= registry.owners.len() {
            let grown = registry.owners.len() + SLOT_ARRAY_INCREMENT;
            registry.owners.resize(grown, None);
        }
        let id = registry.next_slot;
        registry.next_slot += 1;
        registry.owners[id] = Some(drop_value::<T>);

        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The slot id this handle was assigned.
    pub fn slot_id(&self) -> usize {
        self.id
    }

    /// Store a value for the calling thread, returning the previous one.
    ///
    /// Growing the thread's slot array is synchronized with the registry
    /// so the new size covers every slot id handed out so far.
    pub fn set(&self, value: Option<Box<T>>) -> Option<Box<T>> {
        let new_ptr = value.map_or(ptr::null_mut(), |boxed| Box::into_raw(boxed).cast::<()>());

        THREAD_SLOTS.with(|cell| {
            let mut slots = cell.slots.borrow_mut();
            if self.id >= slots.len() {
                let target = {
                    let registry = REGISTRY.lock();
                    registry.next_slot + SLOT_ARRAY_INCREMENT
                };
                slots.resize(target, ptr::null_mut());
            }

            let previous = slots[self.id];
            slots[self.id] = new_ptr;
            if previous.is_null() {
                None
            } else {
                Some(unsafe { Box::from_raw(previous.cast::<T>()) })
            }
        })
    }

    /// Remove and return the calling thread's value.
    pub fn take(&self) -> Option<Box<T>> {
        self.set(None)
    }

    /// Access the calling thread's value in place.
    ///
    /// Reads past the thread's current array size yield `None`; the
    /// array only grows on [`set`](Self::set). Re-entering the same
    /// slot from inside the closure panics rather than aliasing.
    pub fn with<R>(&self, body: impl FnOnce(Option<&mut T>) -> R) -> R {
        THREAD_SLOTS.with(|cell| {
            let slots = cell.slots.borrow_mut();
            let value = if self.id >= slots.len() {
                ptr::null_mut()
            } else {
                slots[self.id]
            };

            if value.is_null() {
                body(None)
            } else {
                body(Some(unsafe { &mut *value.cast::<T>() }))
            }
        })
    }

    /// Get the calling thread's value if it stored one, faulting it in
    /// with `init` otherwise.
    pub fn with_or_init<R>(
        &self,
        init: impl FnOnce() -> Box<T>,
        body: impl FnOnce(&mut T) -> R,
    ) -> R {
        if !self.is_set() {
            self.set(Some(init()));
        }
        self.with(|value| body(value.expect("slot was just initialized")))
    }

    /// Whether the calling thread currently holds a value in this slot.
    pub fn is_set(&self) -> bool {
        THREAD_SLOTS.with(|cell| {
            let slots = cell.slots.borrow();
            self.id < slots.len() && !slots[self.id].is_null()
        })
    }
}

impl<T: 'static> Default for PerThreadSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the registered cleanups for every value the calling thread still
/// holds and release its slot array.
///
/// This also happens automatically when the thread exits; calling it
/// early is safe, later stores simply regrow the array.
pub fn cleanup_current_thread() {
    THREAD_SLOTS.with(|cell| cleanup_slots(&mut cell.slots.borrow_mut()));
}

/// Number of slot ids handed out so far, mostly of diagnostic interest.
pub fn allocated_slot_count() -> usize {
    REGISTRY.lock().next_slot
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unset_slot_reads_none() {
        let slot: PerThreadSlot<u32> = PerThreadSlot::new();
        assert!(!slot.is_set());
        assert!(slot.with(|value| value.is_none()));
    }

    #[test]
    fn test_set_returns_previous() {
        let slot: PerThreadSlot<String> = PerThreadSlot::new();
        assert!(slot.set(Some(Box::new("first".into()))).is_none());

        let previous = slot.set(Some(Box::new("second".into())));
        assert_eq!(previous.as_deref().map(String::as_str), Some("first"));

        slot.with(|value| assert_eq!(value.unwrap().as_str(), "second"));
        let last = slot.take();
        assert_eq!(last.as_deref().map(String::as_str), Some("second"));
        assert!(!slot.is_set());
    }

    #[test]
    fn test_slots_are_per_thread() {
        let slot: Arc<PerThreadSlot<u32>> = Arc::new(PerThreadSlot::new());
        slot.set(Some(Box::new(41)));

        let remote = Arc::clone(&slot);
        std::thread::spawn(move || {
            assert!(!remote.is_set());
            remote.set(Some(Box::new(99)));
            remote.with(|value| assert_eq!(*value.unwrap(), 99));
        })
        .join()
        .unwrap();

        slot.with(|value| assert_eq!(*value.unwrap(), 41));
        slot.take();
    }

    #[test]
    fn test_thread_exit_runs_cleanup_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let slot: Arc<PerThreadSlot<DropCounter>> = Arc::new(PerThreadSlot::new());

        let remote = Arc::clone(&slot);
        let counted = Arc::clone(&drops);
        std::thread::spawn(move || {
            remote.set(Some(Box::new(DropCounter(counted))));
        })
        .join()
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_cleanup() {
        let drops = Arc::new(AtomicUsize::new(0));
        let slot: PerThreadSlot<DropCounter> = PerThreadSlot::new();

        std::thread::scope(|scope| {
            let counted = Arc::clone(&drops);
            let slot = &slot;
            scope
                .spawn(move || {
                    slot.set(Some(Box::new(DropCounter(counted))));
                    cleanup_current_thread();
                    // Cleanup already ran; exit must not run it again
                    assert!(!slot.is_set());
                })
                .join()
                .unwrap();
        });

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_many_slots_grow_arrays() {
        let slots: Vec<PerThreadSlot<usize>> =
            (0..SLOT_ARRAY_INCREMENT * 2 + 3).map(|_| PerThreadSlot::new()).collect();

        for (index, slot) in slots.iter().enumerate() {
            slot.set(Some(Box::new(index)));
        }
        for (index, slot) in slots.iter().enumerate() {
            slot.with(|value| assert_eq!(*value.unwrap(), index));
        }
        for slot in &slots {
            slot.take();
        }
    }
}
