//! Slot storage for the ring buffer
//!
//! Every slot is allocated once, up front, by the entry factory and reused for
//! the lifetime of the ring. Access to the payload is handed out by sequence
//! ownership rather than by locks, which is why the payload sits in an
//! `UnsafeCell`.

use std::cell::UnsafeCell;
use std::sync::atomic::{ AtomicI64, Ordering };

use crate::constants::INITIAL_CURSOR_VALUE;

/// A reusable ring entry: the payload plus the sequence it was last claimed for.
pub struct Slot<T> {
    sequence: AtomicI64,
    data: UnsafeCell<T>,
}

impl<T> Slot<T> {
    pub fn new(data: T) -> Self {
        Self {
            sequence: AtomicI64::new(INITIAL_CURSOR_VALUE),
            data: UnsafeCell::new(data),
        }
    }

    /// Sequence of the most recent claim of this slot.
    #[inline(always)]
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Record a new claim. The cursor release that publishes the claim also
    /// publishes this store.
    #[inline(always)]
    pub(crate) fn set_sequence(&self, sequence: i64) {
        self.sequence.store(sequence, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// No writer may hold the slot, i.e. its sequence must be published.
    #[inline(always)]
    pub(crate) unsafe fn get(&self) -> &T {
        &*self.data.get()
    }

    /// # Safety
    ///
    /// The caller must own the claim for this slot's current sequence.
    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub(crate) unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }
}

/// Pre-allocate `capacity` slots, calling `factory` exactly once per slot.
pub(crate) fn allocate<T>(capacity: usize, mut factory: impl FnMut() -> T) -> Box<[Slot<T>]> {
    (0..capacity).map(|_| Slot::new(factory())).collect()
}
