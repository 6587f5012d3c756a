//! Entry types and handlers shared by the scenario tests.

use std::sync::atomic::{ AtomicBool, AtomicI64, AtomicU64, Ordering };
use std::sync::Arc;

use crossbeam_channel::Sender;
use ringlane::disruptor::EventHandler;
use ringlane::HandlerError;

/// Adds up `i64` entries. Clones share their counters, so keep one clone to
/// observe a handler that was moved into a topology.
#[derive(Clone, Default)]
pub struct SummingHandler {
    sum: Arc<AtomicI64>,
    count: Arc<AtomicU64>,
    max_sequence: Arc<AtomicI64>,
}

impl SummingHandler {
    pub fn new() -> Self {
        Self {
            max_sequence: Arc::new(AtomicI64::new(-1)),
            ..Default::default()
        }
    }

    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Acquire)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn max_sequence(&self) -> i64 {
        self.max_sequence.load(Ordering::Acquire)
    }
}

impl EventHandler<i64> for SummingHandler {
    fn on_available(
        &mut self,
        sequence: i64,
        data: &i64,
        _end_of_batch: bool
    ) -> Result<(), HandlerError> {
        self.sum.fetch_add(*data, Ordering::Relaxed);
        self.max_sequence.fetch_max(sequence, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

/// Entry for the fizz-buzz diamond: two parallel stages annotate, a third
/// joins on both.
#[derive(Debug, Default)]
pub struct FizzBuzzEvent {
    pub value: i64,
    pub fizz: AtomicBool,
    pub buzz: AtomicBool,
}

impl FizzBuzzEvent {
    pub fn reset(&mut self, value: i64) {
        self.value = value;
        *self.fizz.get_mut() = false;
        *self.buzz.get_mut() = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FizzBuzzStep {
    Fizz,
    Buzz,
}

impl EventHandler<FizzBuzzEvent> for FizzBuzzStep {
    fn on_available(
        &mut self,
        _sequence: i64,
        event: &FizzBuzzEvent,
        _end_of_batch: bool
    ) -> Result<(), HandlerError> {
        match self {
            FizzBuzzStep::Fizz => event.fizz.store(event.value % 3 == 0, Ordering::Relaxed),
            FizzBuzzStep::Buzz => event.buzz.store(event.value % 5 == 0, Ordering::Relaxed),
        }
        Ok(())
    }
}

/// Join stage of the diamond; counts entries both steps flagged.
#[derive(Clone, Default)]
pub struct FizzBuzzHandler {
    fizz_buzz: Arc<AtomicU64>,
    seen: Arc<AtomicU64>,
}

impl FizzBuzzHandler {
    pub fn fizz_buzz_count(&self) -> u64 {
        self.fizz_buzz.load(Ordering::Acquire)
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Acquire)
    }
}

impl EventHandler<FizzBuzzEvent> for FizzBuzzHandler {
    fn on_available(
        &mut self,
        _sequence: i64,
        event: &FizzBuzzEvent,
        _end_of_batch: bool
    ) -> Result<(), HandlerError> {
        if event.fizz.load(Ordering::Relaxed) && event.buzz.load(Ordering::Relaxed) {
            self.fizz_buzz.fetch_add(1, Ordering::Relaxed);
        }
        self.seen.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

/// Entry for the three-step pipeline; each step builds on the previous one.
#[derive(Debug, Default)]
pub struct PipelineEvent {
    pub value: i64,
    pub step_one: AtomicI64,
    pub step_two: AtomicI64,
}

impl PipelineEvent {
    pub fn reset(&mut self, value: i64) {
        self.value = value;
        *self.step_one.get_mut() = 0;
        *self.step_two.get_mut() = 0;
    }

    /// What the last step should see for `value`.
    pub fn expected(value: i64) -> i64 {
        (value + 1) * 3
    }
}

#[derive(Clone)]
pub enum PipelineStep {
    One,
    Two,
    Three {
        total: Arc<AtomicI64>,
        mismatches: Arc<AtomicU64>,
    },
}

impl EventHandler<PipelineEvent> for PipelineStep {
    fn on_available(
        &mut self,
        _sequence: i64,
        event: &PipelineEvent,
        _end_of_batch: bool
    ) -> Result<(), HandlerError> {
        match self {
            PipelineStep::One => {
                event.step_one.store(event.value + 1, Ordering::Relaxed);
            }
            PipelineStep::Two => {
                let step_one = event.step_one.load(Ordering::Relaxed);
                event.step_two.store(step_one * 3, Ordering::Relaxed);
            }
            PipelineStep::Three { total, mismatches } => {
                let step_two = event.step_two.load(Ordering::Relaxed);
                if step_two != PipelineEvent::expected(event.value) {
                    mismatches.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(step_two, Ordering::Release);
            }
        }
        Ok(())
    }
}

/// Forwards `(sequence, entry)` pairs to a channel.
///
/// Fails once the receiving side is gone, which stops the processor.
pub struct ChannelHandler<T> {
    sender: Sender<(i64, T)>,
}

impl<T> ChannelHandler<T> {
    pub fn new(sender: Sender<(i64, T)>) -> Self {
        Self { sender }
    }
}

impl<T: Clone + Send> EventHandler<T> for ChannelHandler<T> {
    fn on_available(
        &mut self,
        sequence: i64,
        data: &T,
        _end_of_batch: bool
    ) -> Result<(), HandlerError> {
        self.sender.send((sequence, data.clone())).map_err(|_| "entry receiver disconnected")?;
        Ok(())
    }
}
