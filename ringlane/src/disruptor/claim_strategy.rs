//! Producer-side sequencing.
//!
//! A claim strategy hands out write sequences, keeps producers from lapping
//! the slowest tracked processor, and orders commits when several producers
//! share the cursor.

use std::sync::Arc;
use std::thread;

use crossbeam::utils::Backoff;

use crate::constants::INITIAL_CURSOR_VALUE;
use crate::disruptor::sequence::{ minimum_sequence, Sequence };
use crate::disruptor::ClaimStrategyOption;

/// Trait for claim strategies that hand out producer sequences
pub trait ClaimStrategy: Send + Sync {
    /// Claim the next sequence.
    fn increment_and_get(&self) -> i64;

    /// Claim `delta` sequences at once and return the highest of them.
    fn increment_and_get_by(&self, delta: i64) -> i64;

    /// Move the claim counter to an explicit sequence.
    fn set_sequence(&self, sequence: i64);

    /// Highest sequence claimed so far.
    fn sequence(&self) -> i64;

    /// Block until writing `sequence` cannot overwrite a slot that one of
    /// `dependents` has yet to consume.
    fn ensure_processors_are_in_range(&self, sequence: i64, dependents: &[Arc<Sequence>]);

    /// Wait until the batch ending at `sequence` is next in line to be
    /// committed to `cursor`.
    fn serialize_publishing(&self, cursor: &Sequence, sequence: i64, batch_size: i64);

    /// Whether several claims may be outstanding at once. When false the ring
    /// allows one uncommitted claim at a time.
    fn allows_concurrent_claims(&self) -> bool;
}

/// Wrap prevention shared by both strategies.
///
/// `cached_minimum` only ever holds a value some dependent has already reached,
/// so checking against it first is safe and skips the scan in the common case.
#[inline]
fn wait_for_capacity(
    buffer_size: i64,
    cached_minimum: &Sequence,
    sequence: i64,
    dependents: &[Arc<Sequence>]
) {
    let wrap_point = sequence - buffer_size;
    if wrap_point <= cached_minimum.get() {
        return;
    }

    let mut minimum = minimum_sequence(dependents);
    while wrap_point > minimum {
        thread::yield_now();
        minimum = minimum_sequence(dependents);
    }
    cached_minimum.set(minimum);
}

/// Claim strategy for a ring with exactly one producer thread.
///
/// The claim counter is advanced with a plain load and store. Using it from
/// two threads at once hands out the same sequence twice, so the ring buffer
/// refuses a claim while another one is uncommitted.
pub struct SingleProducerClaimStrategy {
    buffer_size: i64,
    sequence: Sequence,
    min_processor_sequence: Sequence,
}

impl SingleProducerClaimStrategy {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            sequence: Sequence::new(INITIAL_CURSOR_VALUE),
            min_processor_sequence: Sequence::new(INITIAL_CURSOR_VALUE),
        }
    }
}

impl ClaimStrategy for SingleProducerClaimStrategy {
    #[inline]
    fn increment_and_get(&self) -> i64 {
        self.increment_and_get_by(1)
    }

    #[inline]
    fn increment_and_get_by(&self, delta: i64) -> i64 {
        let next = self.sequence.get() + delta;
        self.sequence.set(next);
        next
    }

    fn set_sequence(&self, sequence: i64) {
        self.sequence.set(sequence);
    }

    fn sequence(&self) -> i64 {
        self.sequence.get()
    }

    #[inline]
    fn ensure_processors_are_in_range(&self, sequence: i64, dependents: &[Arc<Sequence>]) {
        wait_for_capacity(self.buffer_size, &self.min_processor_sequence, sequence, dependents);
    }

    #[inline]
    fn serialize_publishing(&self, _cursor: &Sequence, _sequence: i64, _batch_size: i64) {
        // Only one thread ever advances the cursor
    }

    #[inline(always)]
    fn allows_concurrent_claims(&self) -> bool {
        false
    }
}

/// Claim strategy for rings shared by several producer threads.
pub struct MultiProducerClaimStrategy {
    buffer_size: i64,
    sequence: Sequence,
    min_processor_sequence: Sequence,
}

impl MultiProducerClaimStrategy {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size as i64,
            sequence: Sequence::new(INITIAL_CURSOR_VALUE),
            min_processor_sequence: Sequence::new(INITIAL_CURSOR_VALUE),
        }
    }
}

impl ClaimStrategy for MultiProducerClaimStrategy {
    #[inline]
    fn increment_and_get(&self) -> i64 {
        self.sequence.increment_and_get()
    }

    #[inline]
    fn increment_and_get_by(&self, delta: i64) -> i64 {
        self.sequence.add_and_get(delta)
    }

    fn set_sequence(&self, sequence: i64) {
        self.sequence.set(sequence);
    }

    fn sequence(&self) -> i64 {
        self.sequence.get()
    }

    #[inline]
    fn ensure_processors_are_in_range(&self, sequence: i64, dependents: &[Arc<Sequence>]) {
        wait_for_capacity(self.buffer_size, &self.min_processor_sequence, sequence, dependents);
    }

    /// Claims can finish out of order across threads, commits cannot: spin
    /// until every earlier batch is on the cursor.
    #[inline]
    fn serialize_publishing(&self, cursor: &Sequence, sequence: i64, batch_size: i64) {
        let expected = sequence - batch_size;
        let backoff = Backoff::new();
        while cursor.get() != expected {
            backoff.snooze();
        }
    }

    #[inline(always)]
    fn allows_concurrent_claims(&self) -> bool {
        true
    }
}

/// The claim strategies selectable through [`ClaimStrategyOption`].
///
/// Dispatch is a `match`, so the ring buffer's hot path stays free of
/// virtual calls.
pub enum ClaimStrategies {
    SingleProducer(SingleProducerClaimStrategy),
    MultiProducer(MultiProducerClaimStrategy),
}

impl ClaimStrategies {
    pub fn new(option: ClaimStrategyOption, buffer_size: usize) -> Self {
        match option {
            ClaimStrategyOption::SingleProducer => {
                Self::SingleProducer(SingleProducerClaimStrategy::new(buffer_size))
            }
            ClaimStrategyOption::MultipleProducers => {
                Self::MultiProducer(MultiProducerClaimStrategy::new(buffer_size))
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $strategy:ident => $call:expr) => {
        match $self {
            ClaimStrategies::SingleProducer($strategy) => $call,
            ClaimStrategies::MultiProducer($strategy) => $call,
        }
    };
}

impl ClaimStrategy for ClaimStrategies {
    #[inline]
    fn increment_and_get(&self) -> i64 {
        dispatch!(self, s => s.increment_and_get())
    }

    #[inline]
    fn increment_and_get_by(&self, delta: i64) -> i64 {
        dispatch!(self, s => s.increment_and_get_by(delta))
    }

    fn set_sequence(&self, sequence: i64) {
        dispatch!(self, s => s.set_sequence(sequence))
    }

    fn sequence(&self) -> i64 {
        dispatch!(self, s => s.sequence())
    }

    #[inline]
    fn ensure_processors_are_in_range(&self, sequence: i64, dependents: &[Arc<Sequence>]) {
        dispatch!(self, s => s.ensure_processors_are_in_range(sequence, dependents))
    }

    #[inline]
    fn serialize_publishing(&self, cursor: &Sequence, sequence: i64, batch_size: i64) {
        dispatch!(self, s => s.serialize_publishing(cursor, sequence, batch_size))
    }

    #[inline]
    fn allows_concurrent_claims(&self) -> bool {
        dispatch!(self, s => s.allows_concurrent_claims())
    }
}
