//! Batch claim for the claim/commit pattern
//!
//! Claiming `n` entries at once costs one trip through the claim strategy and
//! one cursor update instead of `n`.

use crate::disruptor::claim_strategy::{ ClaimStrategies, ClaimStrategy };
use crate::disruptor::ring_buffer::{ ExclusiveClaim, RingBuffer };
use crate::disruptor::wait_strategy::{ WaitStrategies, WaitStrategy };

/// Exclusive access to the claimed range `[start, end]`.
///
/// The whole range becomes visible in one commit, either through
/// [`BatchClaim::commit`] or when the claim is dropped.
pub struct BatchClaim<'a, T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    ring: &'a RingBuffer<T, C, W>,
    start: i64,
    end: i64,
    committed: bool,
    _exclusive: Option<ExclusiveClaim<'a>>,
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> BatchClaim<'a, T, C, W> {
    pub(crate) fn new(
        ring: &'a RingBuffer<T, C, W>,
        start: i64,
        end: i64,
        exclusive: Option<ExclusiveClaim<'a>>
    ) -> Self {
        debug_assert!(start <= end, "empty batch");
        Self {
            ring,
            start,
            end,
            committed: false,
            _exclusive: exclusive,
        }
    }

    /// First claimed sequence
    #[inline(always)]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Last claimed sequence
    #[inline(always)]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of claimed entries
    #[inline(always)]
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Always false; a claim covers at least one entry.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Mutable access to the entry for `sequence`, if it is in this batch
    #[inline(always)]
    pub fn get_mut(&mut self, sequence: i64) -> Option<&mut T> {
        if sequence < self.start || sequence > self.end {
            return None;
        }
        // SAFETY: in range, owned by this claim until commit
        Some(unsafe { self.ring.get_mut(sequence) })
    }

    /// Visit every entry of the batch in sequence order
    pub fn for_each_mut<F>(&mut self, mut f: F) where F: FnMut(i64, &mut T) {
        for sequence in self.start..=self.end {
            f(sequence, unsafe { self.ring.get_mut(sequence) });
        }
    }

    pub fn commit(mut self) {
        self.commit_once();
    }

    fn commit_once(&mut self) {
        if !self.committed {
            self.committed = true;
            self.ring.commit(self.end, self.len() as i64);
        }
    }
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> Drop for BatchClaim<'a, T, C, W> {
    fn drop(&mut self) {
        self.commit_once();
    }
}
