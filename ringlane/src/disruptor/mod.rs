//! Sequence-barrier ring buffer based on the LMAX Disruptor pattern.
//!
//! ## Moving parts
//!
//! | Piece | Type | Role |
//! |-------|------|------|
//! | Ring | `RingBuffer<T>` | Pre-allocated slots, cursor, claim/commit |
//! | Claim strategy | `ClaimStrategies` | Single or multi producer sequencing, wrap prevention |
//! | Wait strategy | `WaitStrategies` | How processors wait for a sequence |
//! | Barrier | `DependencyBarrier<T>` | Gate on the cursor or on upstream processors |
//! | Processor | `BatchEventProcessor<T, H>` | One thread draining batches into a handler |
//! | Topology | `Topology<T>` | Wires processors into pipelines and diamonds |
//!
//! ## Data flow
//!
//! A producer claims sequence `n`, writes slot `n & (capacity - 1)` and
//! commits, which advances the cursor and wakes waiting processors. Each
//! processor drains everything its barrier reports as available, in order,
//! then publishes its own sequence so the stages gated on it can proceed.
//! The producer never claims `n` until every leaf processor is past
//! `n - capacity`.
//!
//! ## Safety
//!
//! Slot access is arbitrated by sequences, not locks. Producers get `&mut T`
//! only through a live claim; processors get `&T` only for sequences their
//! barrier has reported as available.

pub mod sequence;
pub mod slots;
pub mod claim_strategy;
pub mod wait_strategy;
pub mod ring_buffer;
pub mod claim_batch;
pub mod barrier;
pub mod handler;
pub mod exception_handler;
pub mod processor;
pub mod topology;

pub use sequence::{ minimum_sequence, Sequence };
pub use slots::Slot;
pub use claim_strategy::{
    ClaimStrategy,
    ClaimStrategies,
    SingleProducerClaimStrategy,
    MultiProducerClaimStrategy,
};
pub use wait_strategy::{
    WaitStrategy,
    WaitStrategies,
    WaitForResult,
    BlockingWaitStrategy,
    YieldingWaitStrategy,
    BusySpinWaitStrategy,
    SleepingWaitStrategy,
};
pub use ring_buffer::{ RingBuffer, EntryClaim };
pub use claim_batch::BatchClaim;
pub use barrier::DependencyBarrier;
pub use handler::{ EventHandler, LifecycleAware, SequenceTracker, FnEventHandler, handler_fn };
pub use exception_handler::{ ExceptionHandler, FatalExceptionHandler, IgnoreExceptionHandler };
pub use processor::{ EventProcessor, BatchEventProcessor, NoOpEventProcessor };
pub use topology::{ Topology, EventHandlerGroup, StageHandle };

use serde::{ Deserialize, Serialize };

use crate::config_error;
use crate::constants::{ DEFAULT_RING_BUFFER_SIZE, MAX_RING_BUFFER_SIZE };
use crate::error::Result;

/// How producers claim sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimStrategyOption {
    /// One producer thread; claims are a plain increment
    SingleProducer,
    /// Any number of producer threads; claims are an atomic increment
    #[default]
    MultipleProducers,
}

/// How processors wait for sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitStrategyOption {
    /// Lock and condition variable. Lowest CPU, highest latency
    #[default]
    Blocking,
    /// Spin briefly, then yield. Balanced
    Yielding,
    /// Tight loop. Lowest latency, highest CPU
    BusySpin,
    /// Spin, then yield, then sleep. Adapts to load
    SpinThenYieldThenSleep,
}

/// Configuration for ring buffer behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBufferConfig {
    /// Number of slots; always a power of two
    pub size: usize,
    /// Claim strategy for producers
    pub claim_strategy: ClaimStrategyOption,
    /// Wait strategy for processors
    pub wait_strategy: WaitStrategyOption,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_BUFFER_SIZE,
            claim_strategy: ClaimStrategyOption::default(),
            wait_strategy: WaitStrategyOption::default(),
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration, rounding `size` up to the next power of two
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            size: ceiling_next_power_of_two(size)?,
            ..Default::default()
        })
    }

    /// Set the claim strategy
    pub fn with_claim_strategy(mut self, strategy: ClaimStrategyOption) -> Self {
        self.claim_strategy = strategy;
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, strategy: WaitStrategyOption) -> Self {
        self.wait_strategy = strategy;
        self
    }

    /// Re-check a configuration that was built by hand or deserialized
    pub fn validate(&self) -> Result<()> {
        if !self.size.is_power_of_two() || self.size < 2 || self.size > MAX_RING_BUFFER_SIZE {
            return Err(
                config_error!(
                    "Ring buffer size must be a power of two between 2 and {}, got {}",
                    MAX_RING_BUFFER_SIZE,
                    self.size
                )
            );
        }
        Ok(())
    }
}

/// Smallest power of two that is at least `size`, starting from 2.
pub fn ceiling_next_power_of_two(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(config_error!("Ring buffer size must be greater than 0"));
    }
    if size > MAX_RING_BUFFER_SIZE {
        return Err(
            config_error!("Ring buffer size {} exceeds maximum {}", size, MAX_RING_BUFFER_SIZE)
        );
    }
    Ok(size.next_power_of_two().max(2))
}
