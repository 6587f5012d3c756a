//! The ring buffer: pre-allocated slots, the cursor and the claim/commit
//! protocol producers use to publish into them.

use std::ops::{ Deref, DerefMut };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config_error;
use crate::disruptor::barrier::DependencyBarrier;
use crate::disruptor::claim_batch::BatchClaim;
use crate::disruptor::claim_strategy::{ ClaimStrategies, ClaimStrategy };
use crate::disruptor::sequence::Sequence;
use crate::disruptor::slots::{ self, Slot };
use crate::disruptor::wait_strategy::{ WaitStrategies, WaitStrategy };
use crate::disruptor::{ ceiling_next_power_of_two, RingBufferConfig };
use crate::error::{ Result, RinglaneError };

/// Fixed-capacity ring of reusable entries.
///
/// Producers claim sequences with [`RingBuffer::next_entry`] or
/// [`RingBuffer::next_entries`], write through the returned guard and commit.
/// Committing advances the cursor, which is what processors wait on.
///
/// Before the first claim the ring must know which processor sequences to
/// protect from being lapped; see [`RingBuffer::set_tracked_sequences`]. The
/// topology does this when it starts.
///
/// With [`ClaimStrategyOption::SingleProducer`](crate::disruptor::ClaimStrategyOption)
/// only one claim may be uncommitted at a time; claiming while another claim
/// is outstanding fails with [`RinglaneError::ClaimInProgress`].
pub struct RingBuffer<T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    slots: Box<[Slot<T>]>,
    mask: i64,
    cursor: Arc<Sequence>,
    claim_strategy: C,
    wait_strategy: W,
    tracked: OnceCell<Vec<Arc<Sequence>>>,
    claim_in_progress: AtomicBool,
}

// SAFETY: slots are only written through a claim on their sequence, which the
// claim strategy (or the exclusive claim flag for single producers) hands to
// exactly one producer, and only read once the cursor
// release has published them. Readers on other threads see `&T`, hence `Sync`.
unsafe impl<T: Send + Sync, C: ClaimStrategy, W: WaitStrategy> Sync for RingBuffer<T, C, W> {}

impl<T> RingBuffer<T> {
    /// Create a ring from a configuration, calling `factory` once per slot.
    pub fn new(factory: impl FnMut() -> T, config: &RingBufferConfig) -> Result<Self> {
        config.validate()?;
        Self::with_strategies(
            factory,
            config.size,
            ClaimStrategies::new(config.claim_strategy, config.size),
            WaitStrategies::from(config.wait_strategy)
        )
    }
}

impl<T, C: ClaimStrategy, W: WaitStrategy> RingBuffer<T, C, W> {
    /// Create a ring with explicit strategy instances.
    ///
    /// `size` is rounded up to a power of two. The claim strategy must have
    /// been built for that same capacity.
    pub fn with_strategies(
        factory: impl FnMut() -> T,
        size: usize,
        claim_strategy: C,
        wait_strategy: W
    ) -> Result<Self> {
        let capacity = ceiling_next_power_of_two(size)?;
        Ok(Self {
            slots: slots::allocate(capacity, factory),
            mask: (capacity as i64) - 1,
            cursor: Arc::new(Sequence::default()),
            claim_strategy,
            wait_strategy,
            tracked: OnceCell::new(),
            claim_in_progress: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest committed sequence, `-1` before the first commit.
    #[inline(always)]
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    pub fn cursor_sequence(&self) -> &Arc<Sequence> {
        &self.cursor
    }

    pub(crate) fn wait_strategy(&self) -> &W {
        &self.wait_strategy
    }

    /// Install the processor sequences producers must never lap.
    ///
    /// These are the leaves of the consumption graph. They can be set once.
    pub fn set_tracked_sequences(&self, sequences: Vec<Arc<Sequence>>) -> Result<()> {
        if sequences.is_empty() {
            return Err(config_error!("At least one processor sequence must be tracked"));
        }
        self.tracked
            .set(sequences)
            .map_err(|_| config_error!("Tracked sequences are already set"))
    }

    pub fn tracked_sequences(&self) -> Option<&[Arc<Sequence>]> {
        self.tracked.get().map(Vec::as_slice)
    }

    fn tracked(&self) -> Result<&[Arc<Sequence>]> {
        self.tracked_sequences().ok_or_else(|| {
            config_error!("No tracked sequences; a producer could overwrite unconsumed entries")
        })
    }

    /// Take the single-claim flag, unless the claim strategy serializes
    /// concurrent claims itself.
    fn exclusive_claim(&self, always: bool) -> Result<Option<ExclusiveClaim<'_>>> {
        if !always && self.claim_strategy.allows_concurrent_claims() {
            return Ok(None);
        }
        self.claim_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| RinglaneError::ClaimInProgress)?;
        Ok(Some(ExclusiveClaim(&self.claim_in_progress)))
    }

    /// Claim the next entry, blocking while the ring is full.
    pub fn next_entry(&self) -> Result<EntryClaim<'_, T, C, W>> {
        let tracked = self.tracked()?;
        let exclusive = self.exclusive_claim(false)?;
        let sequence = self.claim_strategy.increment_and_get();
        self.claim_strategy.ensure_processors_are_in_range(sequence, tracked);
        self.slot(sequence).set_sequence(sequence);

        Ok(EntryClaim {
            ring: self,
            sequence,
            forced: false,
            committed: false,
            _exclusive: exclusive,
        })
    }

    /// Claim `count` consecutive entries, blocking while the ring is full.
    pub fn next_entries(&self, count: usize) -> Result<BatchClaim<'_, T, C, W>> {
        if count == 0 || count > self.capacity() {
            return Err(
                config_error!("Batch size must be between 1 and {}, got {}", self.capacity(), count)
            );
        }
        let tracked = self.tracked()?;
        let exclusive = self.exclusive_claim(false)?;
        let end = self.claim_strategy.increment_and_get_by(count as i64);
        self.claim_strategy.ensure_processors_are_in_range(end, tracked);

        let start = end - (count as i64) + 1;
        for sequence in start..=end {
            self.slot(sequence).set_sequence(sequence);
        }
        Ok(BatchClaim::new(self, start, end, exclusive))
    }

    /// Claim an entry, fill it with `translator` and commit it.
    pub fn publish_with<F>(&self, translator: F) -> Result<i64> where F: FnOnce(i64, &mut T) {
        let mut entry = self.next_entry()?;
        let sequence = entry.sequence();
        translator(sequence, &mut *entry);
        entry.commit();
        Ok(sequence)
    }

    /// Claim a specific sequence, e.g. when replaying a journal.
    ///
    /// The claim counter jumps to `sequence` and the commit writes the cursor
    /// directly instead of waiting for earlier claims. Only single-producer
    /// rings support this, and like any single-producer claim it fails while
    /// another claim is outstanding.
    pub fn claim_at(&self, sequence: i64) -> Result<EntryClaim<'_, T, C, W>> {
        if sequence < 0 {
            return Err(config_error!("Cannot claim negative sequence {}", sequence));
        }
        if self.claim_strategy.allows_concurrent_claims() {
            return Err(config_error!("Claiming an explicit sequence requires a single-producer ring"));
        }
        let tracked = self.tracked()?;
        let exclusive = self.exclusive_claim(true)?;
        self.claim_strategy.set_sequence(sequence);
        self.claim_strategy.ensure_processors_are_in_range(sequence, tracked);
        self.slot(sequence).set_sequence(sequence);

        Ok(EntryClaim {
            ring: self,
            sequence,
            forced: true,
            committed: false,
            _exclusive: exclusive,
        })
    }

    /// Make `[sequence - batch_size + 1, sequence]` visible to processors.
    pub(crate) fn commit(&self, sequence: i64, batch_size: i64) {
        self.claim_strategy.serialize_publishing(&self.cursor, sequence, batch_size);
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn force_commit(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// The slot `sequence` maps to.
    #[inline(always)]
    pub fn slot(&self, sequence: i64) -> &Slot<T> {
        // mask keeps the index in bounds for any sequence
        &self.slots[(sequence & self.mask) as usize]
    }

    /// Read the entry for `sequence`.
    ///
    /// # Safety
    ///
    /// `sequence` must be committed and not yet eligible for reuse, which is
    /// what a [`DependencyBarrier`] reporting it as available guarantees.
    #[inline(always)]
    pub unsafe fn get(&self, sequence: i64) -> &T {
        self.slot(sequence).get()
    }

    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub(crate) unsafe fn get_mut(&self, sequence: i64) -> &mut T {
        self.slot(sequence).get_mut()
    }

    /// Barrier gated on the cursor, or on `dependents` when non-empty.
    pub fn create_barrier(self: &Arc<Self>, dependents: Vec<Arc<Sequence>>) -> DependencyBarrier<T, C, W> {
        DependencyBarrier::new(self.clone(), dependents)
    }
}

/// Held by the one outstanding claim of a single-producer ring. Released on
/// drop, after the owning claim has committed.
pub(crate) struct ExclusiveClaim<'a>(&'a AtomicBool);

impl Drop for ExclusiveClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exclusive access to one claimed entry.
///
/// Committed by [`EntryClaim::commit`], or on drop. A claim is never
/// abandoned, since a gap in the cursor would stall every later producer.
pub struct EntryClaim<'a, T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    ring: &'a RingBuffer<T, C, W>,
    sequence: i64,
    forced: bool,
    committed: bool,
    _exclusive: Option<ExclusiveClaim<'a>>,
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> EntryClaim<'a, T, C, W> {
    #[inline(always)]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn commit(mut self) {
        self.commit_once();
    }

    #[inline(always)]
    fn commit_once(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        if self.forced {
            self.ring.force_commit(self.sequence);
        } else {
            self.ring.commit(self.sequence, 1);
        }
    }
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> Deref for EntryClaim<'a, T, C, W> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this claim owns the slot until it commits
        unsafe { self.ring.get(self.sequence) }
    }
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> DerefMut for EntryClaim<'a, T, C, W> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` rules out a second borrow
        unsafe { self.ring.get_mut(self.sequence) }
    }
}

impl<'a, T, C: ClaimStrategy, W: WaitStrategy> Drop for EntryClaim<'a, T, C, W> {
    fn drop(&mut self) {
        self.commit_once();
    }
}
