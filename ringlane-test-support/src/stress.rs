//! Randomized multi-producer runs with a deadline.

use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use parking_lot::Mutex;
use rand::Rng;
use ringlane::disruptor::{
    handler_fn,
    ClaimStrategyOption,
    RingBuffer,
    RingBufferConfig,
    Topology,
    WaitStrategyOption,
};
use ringlane::{ Result, RinglaneError };

use crate::verify::{ ProducerOrderChecker, SequenceChecker };

/// Configuration for stress runs
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Entries each producer publishes
    pub events_per_producer: u64,
    /// Number of producer threads
    pub producers: usize,
    /// Upper bound for the random batch size of each claim
    pub max_batch: usize,
    /// Requested ring size, rounded up to a power of two
    pub ring_size: usize,
    pub wait_strategy: WaitStrategyOption,
    /// Give up waiting for the consumer after this long
    pub timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            events_per_producer: 100_000,
            producers: 1,
            max_batch: 16,
            ring_size: 1024,
            wait_strategy: WaitStrategyOption::Yielding,
            timeout: Duration::from_secs(30),
        }
    }
}

impl StressConfig {
    pub fn new(events_per_producer: u64) -> Self {
        Self {
            events_per_producer,
            ..Default::default()
        }
    }

    pub fn with_producers(mut self, n: usize) -> Self {
        self.producers = n;
        self
    }

    pub fn with_max_batch(mut self, size: usize) -> Self {
        self.max_batch = size;
        self
    }

    pub fn with_ring_size(mut self, size: usize) -> Self {
        self.ring_size = size;
        self
    }

    pub fn with_wait_strategy(mut self, strategy: WaitStrategyOption) -> Self {
        self.wait_strategy = strategy;
        self
    }
}

/// What the consumer saw during a stress run
#[derive(Debug, Clone, Default)]
pub struct StressOutcome {
    pub published: u64,
    pub consumed: u64,
    /// Entries that arrived out of their producer's order
    pub violations: u64,
    /// Sequences skipped or seen twice
    pub sequence_errors: u64,
    pub duration: Duration,
    pub timed_out: bool,
}

impl StressOutcome {
    pub fn rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.consumed as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.timed_out &&
            self.violations == 0 &&
            self.sequence_errors == 0 &&
            self.consumed == self.published
    }
}

struct Checks {
    sequences: SequenceChecker,
    producers: ProducerOrderChecker,
}

/// Publish from `config.producers` threads in random batch sizes into one
/// processor that checks sequence contiguity and per-producer order.
pub fn run_stress(config: &StressConfig) -> Result<StressOutcome> {
    let claim_strategy = if config.producers > 1 {
        ClaimStrategyOption::MultipleProducers
    } else {
        ClaimStrategyOption::SingleProducer
    };
    let ring_config = RingBufferConfig::new(config.ring_size)?
        .with_claim_strategy(claim_strategy)
        .with_wait_strategy(config.wait_strategy);
    let ring = Arc::new(RingBuffer::new(|| (0usize, 0u64), &ring_config)?);
    let max_batch = config.max_batch.clamp(1, ring.capacity());
    let published = config.events_per_producer * (config.producers as u64);

    let checks = Arc::new(
        Mutex::new(Checks {
            sequences: SequenceChecker::new(),
            producers: ProducerOrderChecker::new(config.producers),
        })
    );

    let mut topology = Topology::new(ring.clone());
    let observed = checks.clone();
    topology.handle_events_with(
        vec![
            handler_fn(move |sequence, entry: &(usize, u64), _| {
                let mut checks = observed.lock();
                checks.sequences.check(sequence);
                checks.producers.check(entry.0, entry.1);
                Ok(())
            })
        ]
    );
    topology.start()?;

    let start = Instant::now();
    let events = config.events_per_producer;
    let producers: Vec<_> = (0..config.producers)
        .map(|producer| {
            let ring = ring.clone();
            thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                let mut counter = 0u64;
                while counter < events {
                    let remaining = (events - counter) as usize;
                    let batch = rng.gen_range(1..=max_batch).min(remaining);
                    let mut claim = ring.next_entries(batch)?;
                    claim.for_each_mut(|_, entry| {
                        *entry = (producer, counter);
                        counter += 1;
                    });
                    claim.commit();
                }
                Ok(())
            })
        })
        .collect();

    for producer in producers {
        producer
            .join()
            .unwrap_or_else(|_| Err(RinglaneError::unexpected("Producer thread panicked")))?;
    }

    let timed_out = !wait_until(config.timeout, || checks.lock().sequences.received() >= published);
    let duration = start.elapsed();
    topology.halt()?;

    let checks = checks.lock();
    Ok(StressOutcome {
        published,
        consumed: checks.sequences.received(),
        violations: checks.producers.violations(),
        sequence_errors: checks.sequences.gaps() + checks.sequences.duplicates(),
        duration,
        timed_out,
    })
}

/// Poll `condition` until it holds or `timeout` passes; true if it held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_micros(200));
    }
    true
}
