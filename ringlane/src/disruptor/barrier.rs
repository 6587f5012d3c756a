use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::time::Duration;

use crate::disruptor::claim_strategy::{ ClaimStrategies, ClaimStrategy };
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::wait_strategy::{ WaitForResult, WaitStrategies, WaitStrategy };
use crate::error::Result;

/// Gate a processor waits on before reading entries.
///
/// A first-stage barrier tracks the ring cursor. A later-stage barrier tracks
/// the sequences of the processors it depends on, so an entry only becomes
/// available once every one of them has handled it. The barrier reads those
/// sequences and never writes them.
pub struct DependencyBarrier<T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    ring: Arc<RingBuffer<T, C, W>>,
    dependents: Vec<Arc<Sequence>>,
    alerted: AtomicBool,
}

impl<T, C: ClaimStrategy, W: WaitStrategy> DependencyBarrier<T, C, W> {
    pub fn new(ring: Arc<RingBuffer<T, C, W>>, dependents: Vec<Arc<Sequence>>) -> Self {
        Self {
            ring,
            dependents,
            alerted: AtomicBool::new(false),
        }
    }

    /// Block until `sequence` is available and return the highest available
    /// sequence, which may be well past `sequence`.
    #[inline]
    pub fn wait_for(&self, sequence: i64) -> WaitForResult {
        self.ring
            .wait_strategy()
            .wait_for(sequence, self.ring.cursor_sequence(), &self.dependents, &self.alerted)
    }

    pub fn wait_for_timeout(&self, sequence: i64, timeout: Duration) -> Result<WaitForResult> {
        self.ring
            .wait_strategy()
            .wait_for_timeout(
                sequence,
                self.ring.cursor_sequence(),
                &self.dependents,
                &self.alerted,
                timeout
            )
    }

    /// Read the entry for `sequence`.
    ///
    /// # Safety
    ///
    /// `sequence` must be no greater than a value this barrier returned from
    /// `wait_for`, and the caller's own sequence must still be below it so the
    /// slot cannot have been recycled.
    #[inline(always)]
    pub unsafe fn get(&self, sequence: i64) -> &T {
        self.ring.get(sequence)
    }

    pub fn cursor(&self) -> i64 {
        self.ring.cursor()
    }

    pub fn dependents(&self) -> &[Arc<Sequence>] {
        &self.dependents
    }

    pub fn ring(&self) -> &Arc<RingBuffer<T, C, W>> {
        &self.ring
    }

    /// Raise the alert and wake any blocked waiter. Idempotent.
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.ring.wait_strategy().signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }
}
