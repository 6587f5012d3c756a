//! Wait strategies for event processors
//!
//! This module provides different wait strategies that control how a processor
//! waits for a sequence to become available. Each strategy offers different
//! trade-offs between latency, CPU usage, and throughput.
//!
//! Every strategy re-checks the alert flag on each iteration and returns
//! [`WaitForResult::Alerted`] as soon as it is raised, so halting a processor
//! never leaves its thread stuck in a wait.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use crate::constants::{ DEFAULT_SLEEP, SLEEP_RETRIES, YIELD_SPIN_TRIES };
use crate::disruptor::sequence::{ minimum_sequence, Sequence };
use crate::disruptor::WaitStrategyOption;
use crate::error::{ Result, RinglaneError };

/// Outcome of waiting for a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitForResult {
    /// Highest sequence available to the waiter; at least the one requested
    Available(i64),
    /// The barrier was alerted before the sequence became available
    Alerted,
}

impl WaitForResult {
    pub fn is_alerted(&self) -> bool {
        matches!(self, Self::Alerted)
    }

    pub fn available_sequence(&self) -> Option<i64> {
        match self {
            Self::Available(sequence) => Some(*sequence),
            Self::Alerted => None,
        }
    }
}

/// Trait for wait strategies that determine how processors wait for data
pub trait WaitStrategy: Send + Sync {
    /// Wait for `sequence` to become available
    ///
    /// # Arguments
    ///
    /// * `sequence` - The sequence number to wait for
    /// * `cursor` - The ring buffer cursor
    /// * `dependents` - Upstream processor sequences; when non-empty, their
    ///   minimum gates availability instead of the cursor
    /// * `alert` - The barrier's alert flag
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult;

    /// Like [`WaitStrategy::wait_for`], giving up with
    /// [`RinglaneError::Timeout`] once `timeout` has elapsed. A timeout too
    /// large to add to the current instant, such as `Duration::MAX`, never
    /// expires.
    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult>;

    /// Wake any thread blocked in `wait_for`. Called after every publish.
    fn signal_all_when_blocking(&self);
}

#[inline(always)]
fn available_sequence(sequence: i64, cursor: &Sequence, dependents: &[Arc<Sequence>]) -> Option<i64> {
    let available = if dependents.is_empty() {
        cursor.get()
    } else {
        minimum_sequence(dependents)
    };
    (available >= sequence).then_some(available)
}

#[inline(always)]
fn check(
    sequence: i64,
    cursor: &Sequence,
    dependents: &[Arc<Sequence>],
    alert: &AtomicBool
) -> Option<WaitForResult> {
    if alert.load(Ordering::Acquire) {
        return Some(WaitForResult::Alerted);
    }
    available_sequence(sequence, cursor, dependents).map(WaitForResult::Available)
}

/// `None` when `timeout` is too large to represent, which means no deadline.
#[inline]
fn deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[inline(always)]
fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Blocking wait strategy - lowest CPU usage, highest latency and jitter.
///
/// Waiters park on a condition variable until a publisher signals. The
/// cursor is re-checked while holding the mutex, and publishers take the
/// same mutex before notifying, so a publish can never slip between a
/// waiter's check and its park.
///
/// Upstream processors do not signal when they advance, so waiting on
/// dependents falls back to a yielding loop once the cursor is past.
pub struct BlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condition: parking_lot::Condvar,
}

impl BlockingWaitStrategy {
    /// Create a new blocking wait strategy
    pub fn new() -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condition: parking_lot::Condvar::new(),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                if alert.load(Ordering::Acquire) {
                    return WaitForResult::Alerted;
                }
                self.condition.wait(&mut guard);
            }
        }

        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return result;
            }
            thread::yield_now();
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult> {
        let deadline = deadline(timeout);

        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                if alert.load(Ordering::Acquire) {
                    return Ok(WaitForResult::Alerted);
                }
                match deadline {
                    Some(deadline) => {
                        let timed_out = self.condition.wait_until(&mut guard, deadline).timed_out();
                        if timed_out && cursor.get() < sequence {
                            return Err(RinglaneError::Timeout);
                        }
                    }
                    None => self.condition.wait(&mut guard),
                }
            }
        }

        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return Ok(result);
            }
            if expired(deadline) {
                return Err(RinglaneError::Timeout);
            }
            thread::yield_now();
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condition.notify_all();
    }
}

/// Yielding wait strategy - moderate CPU usage and latency.
///
/// Spins for a short while, then yields the rest of the timeslice on every
/// iteration. A good compromise when processors do not own a core.
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    /// Create a new yielding wait strategy
    pub fn new() -> Self {
        Self::with_spin_tries(YIELD_SPIN_TRIES)
    }

    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }

    #[inline(always)]
    fn idle(counter: &mut u32) {
        if *counter == 0 {
            thread::yield_now();
        } else {
            *counter -= 1;
            std::hint::spin_loop();
        }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult {
        let mut counter = self.spin_tries;
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return result;
            }
            Self::idle(&mut counter);
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult> {
        let deadline = deadline(timeout);
        let mut counter = self.spin_tries;
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return Ok(result);
            }
            if expired(deadline) {
                return Err(RinglaneError::Timeout);
            }
            Self::idle(&mut counter);
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for yielding - waiters never park
    }
}

/// Busy spin wait strategy - lowest latency, highest CPU usage.
///
/// Burns a full core while waiting. Only worth it when the processor thread
/// is pinned to a core of its own.
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Create a new busy spin wait strategy
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusySpinWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult {
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return result;
            }
            std::hint::spin_loop();
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult> {
        let deadline = deadline(timeout);
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return Ok(result);
            }
            if expired(deadline) {
                return Err(RinglaneError::Timeout);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for busy spin - no blocking threads to signal
    }
}

/// Progressive backoff: spin, then yield, then sleep.
///
/// Latency stays low while events keep arriving and CPU usage drops off once
/// the ring goes quiet.
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    /// Create a new sleeping wait strategy with custom retries and sleep duration
    pub fn new(retries: u32, sleep_duration: Duration) -> Self {
        Self {
            retries,
            sleep_duration,
        }
    }

    #[inline(always)]
    fn idle(&self, counter: &mut u32) {
        if *counter > self.retries / 2 {
            *counter -= 1;
            std::hint::spin_loop();
        } else if *counter > 0 {
            *counter -= 1;
            thread::yield_now();
        } else {
            thread::sleep(self.sleep_duration);
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(SLEEP_RETRIES, DEFAULT_SLEEP)
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult {
        let mut counter = self.retries;
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return result;
            }
            self.idle(&mut counter);
        }
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult> {
        let deadline = deadline(timeout);
        let mut counter = self.retries;
        loop {
            if let Some(result) = check(sequence, cursor, dependents, alert) {
                return Ok(result);
            }
            if expired(deadline) {
                return Err(RinglaneError::Timeout);
            }
            self.idle(&mut counter);
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for sleeping - threads will wake up naturally
    }
}

/// The wait strategies selectable through [`WaitStrategyOption`]
pub enum WaitStrategies {
    Blocking(BlockingWaitStrategy),
    Yielding(YieldingWaitStrategy),
    BusySpin(BusySpinWaitStrategy),
    SpinThenYieldThenSleep(SleepingWaitStrategy),
}

impl From<WaitStrategyOption> for WaitStrategies {
    fn from(option: WaitStrategyOption) -> Self {
        match option {
            WaitStrategyOption::Blocking => Self::Blocking(BlockingWaitStrategy::new()),
            WaitStrategyOption::Yielding => Self::Yielding(YieldingWaitStrategy::new()),
            WaitStrategyOption::BusySpin => Self::BusySpin(BusySpinWaitStrategy::new()),
            WaitStrategyOption::SpinThenYieldThenSleep => {
                Self::SpinThenYieldThenSleep(SleepingWaitStrategy::default())
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $strategy:ident => $call:expr) => {
        match $self {
            WaitStrategies::Blocking($strategy) => $call,
            WaitStrategies::Yielding($strategy) => $call,
            WaitStrategies::BusySpin($strategy) => $call,
            WaitStrategies::SpinThenYieldThenSleep($strategy) => $call,
        }
    };
}

impl WaitStrategy for WaitStrategies {
    #[inline]
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool
    ) -> WaitForResult {
        dispatch!(self, s => s.wait_for(sequence, cursor, dependents, alert))
    }

    fn wait_for_timeout(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
        timeout: Duration
    ) -> Result<WaitForResult> {
        dispatch!(self, s => s.wait_for_timeout(sequence, cursor, dependents, alert, timeout))
    }

    #[inline]
    fn signal_all_when_blocking(&self) {
        dispatch!(self, s => s.signal_all_when_blocking())
    }
}
