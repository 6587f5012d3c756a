//! Event processors: the consumer side of the ring.
//!
//! A processor owns one thread for as long as `run` executes. It waits on its
//! barrier, hands every available entry to its handler in order, then
//! publishes its own sequence so the stages gated on it can move.

use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config_error;
use crate::disruptor::barrier::DependencyBarrier;
use crate::disruptor::claim_strategy::{ ClaimStrategies, ClaimStrategy };
use crate::disruptor::exception_handler::{ ExceptionHandler, FatalExceptionHandler };
use crate::disruptor::handler::{ EventHandler, SequenceTracker };
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::wait_strategy::{ WaitForResult, WaitStrategies, WaitStrategy };
use crate::error::{ Result, RinglaneError };

/// A consumer that can be run on a thread of its own and halted from another.
pub trait EventProcessor: Send + Sync {
    /// Highest sequence this processor has finished with
    fn sequence(&self) -> &Arc<Sequence>;

    /// Process events until halted or until a handler fault is escalated.
    ///
    /// May be called again after it returns; processing resumes after the
    /// last published sequence.
    fn run(&self) -> Result<()>;

    /// Ask a running processor to stop at the next wait. Safe from any thread.
    fn halt(&self);

    fn is_running(&self) -> bool;

    /// Publish the sequence only once every `period` events instead of after
    /// every batch. Only meaningful for the last processors in a chain.
    ///
    /// `period` must be between 1 and half the ring capacity.
    fn delay_sequence_write(&self, _period: usize) -> Result<()> {
        Ok(())
    }
}

/// Clears the running flag however `run` exits, panics included.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains batches from a [`DependencyBarrier`] into an [`EventHandler`].
pub struct BatchEventProcessor<T, H, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    barrier: DependencyBarrier<T, C, W>,
    handler: Mutex<H>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    sequence: Arc<Sequence>,
    delivered: Arc<Sequence>,
    running: AtomicBool,
    publish_period: AtomicUsize,
    lifecycle_aware: bool,
}

impl<T, H, C, W> BatchEventProcessor<T, H, C, W>
    where T: 'static, H: EventHandler<T>, C: ClaimStrategy, W: WaitStrategy
{
    pub fn new(barrier: DependencyBarrier<T, C, W>, mut handler: H) -> Self {
        let sequence = Arc::new(Sequence::default());
        let delivered = Arc::new(Sequence::default());
        handler.set_sequence_tracker(SequenceTracker::new(sequence.clone(), delivered.clone()));
        let lifecycle_aware = handler.lifecycle_aware().is_some();

        Self {
            barrier,
            handler: Mutex::new(handler),
            exception_handler: Arc::new(FatalExceptionHandler),
            sequence,
            delivered,
            running: AtomicBool::new(false),
            publish_period: AtomicUsize::new(0),
            lifecycle_aware,
        }
    }

    /// Replace the default [`FatalExceptionHandler`]
    pub fn with_exception_handler(mut self, exception_handler: Arc<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = exception_handler;
        self
    }

    pub fn barrier(&self) -> &DependencyBarrier<T, C, W> {
        &self.barrier
    }

    fn process_events(&self, handler: &mut H) -> Result<()> {
        let period = self.publish_period.load(Ordering::Acquire) as i64;
        let mut next = self.sequence.get() + 1;
        let mut next_publish = next + period;
        let mut result = Ok(());

        while self.running.load(Ordering::Acquire) {
            let available = match self.barrier.wait_for(next) {
                WaitForResult::Available(available) => available,
                WaitForResult::Alerted => {
                    break;
                }
            };

            if let Err(fault) = self.drain(handler, &mut next, available) {
                result = Err(fault);
                break;
            }

            if period == 0 {
                self.sequence.set(next - 1);
            } else if next > next_publish {
                self.sequence.set(next - 1);
                next_publish += period;
            }
        }

        // A throttled or faulted run can stop with progress still unpublished.
        if self.sequence.get() != next - 1 {
            self.sequence.set(next - 1);
        }
        result
    }

    #[inline]
    fn drain(&self, handler: &mut H, next: &mut i64, available: i64) -> Result<()> {
        while *next <= available {
            let sequence = *next;
            // SAFETY: the barrier reported `sequence` as available and our own
            // sequence is still below it, so the slot cannot be reclaimed.
            let data = unsafe { self.barrier.get(sequence) };
            // a tracker may release everything before the entry in hand
            self.delivered.set(sequence - 1);
            if let Err(err) = handler.on_available(sequence, data, sequence == available) {
                self.exception_handler.handle(err, sequence, data)?;
            }
            *next += 1;
        }

        if let Err(err) = handler.on_end_of_batch() {
            let data = unsafe { self.barrier.get(available) };
            self.exception_handler.handle(err, available, data)?;
        }
        Ok(())
    }
}

impl<T, H, C, W> EventProcessor
    for BatchEventProcessor<T, H, C, W>
    where T: Send + Sync + 'static, H: EventHandler<T>, C: ClaimStrategy, W: WaitStrategy
{
    fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    fn run(&self) -> Result<()> {
        let mut handler = self.handler.try_lock().ok_or(RinglaneError::AlreadyRunning)?;

        self.running.store(true, Ordering::Release);
        let _running = RunningGuard(&self.running);
        self.barrier.clear_alert();

        if self.lifecycle_aware {
            if let Some(lifecycle) = handler.lifecycle_aware() {
                lifecycle.on_start();
            }
        }
        debug!(sequence = self.sequence.get(), "Event processor started");

        let result = self.process_events(&mut handler);

        if self.lifecycle_aware {
            if let Some(lifecycle) = handler.lifecycle_aware() {
                lifecycle.on_shutdown();
            }
        }
        debug!(sequence = self.sequence.get(), failed = result.is_err(), "Event processor stopped");

        result
    }

    fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.barrier.alert();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn delay_sequence_write(&self, period: usize) -> Result<()> {
        // A leaf holding back more than half the ring can starve the producer
        // of the slot the leaf needs before its first publish.
        let max_period = self.barrier.ring().capacity() / 2;
        if period == 0 || period > max_period {
            return Err(
                config_error!("Publish period must be between 1 and {}, got {}", max_period, period)
            );
        }
        self.publish_period.store(period, Ordering::Release);
        Ok(())
    }
}

/// Stand-in processor that is always exactly as far along as the cursor.
///
/// Tracking it lets a producer run with no consumers at all, e.g. when
/// replaying into a ring in tests.
pub struct NoOpEventProcessor<T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    ring: Arc<RingBuffer<T, C, W>>,
    running: AtomicBool,
}

impl<T, C: ClaimStrategy, W: WaitStrategy> NoOpEventProcessor<T, C, W> {
    pub fn new(ring: Arc<RingBuffer<T, C, W>>) -> Self {
        Self {
            ring,
            running: AtomicBool::new(false),
        }
    }
}

impl<T, C, W> EventProcessor
    for NoOpEventProcessor<T, C, W>
    where T: Send + Sync, C: ClaimStrategy, W: WaitStrategy
{
    fn sequence(&self) -> &Arc<Sequence> {
        self.ring.cursor_sequence()
    }

    fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn halt(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::exception_handler::IgnoreExceptionHandler;
    use crate::disruptor::handler::{ handler_fn, LifecycleAware };
    use crate::disruptor::{ RingBufferConfig, WaitStrategyOption };
    use crate::error::HandlerError;
    use std::sync::atomic::AtomicI64;
    use std::thread;
    use std::time::{ Duration, Instant };

    fn ring(size: usize) -> Arc<RingBuffer<i64>> {
        let config = RingBufferConfig::new(size)
            .unwrap()
            .with_wait_strategy(WaitStrategyOption::Yielding);
        Arc::new(RingBuffer::new(|| 0, &config).unwrap())
    }

    fn publish(ring: &RingBuffer<i64>, count: usize) {
        for _ in 0..count {
            ring.publish_with(|sequence, data| {
                *data = sequence;
            }).unwrap();
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn spawn<P: EventProcessor + 'static>(processor: &Arc<P>) -> thread::JoinHandle<Result<()>> {
        let processor = processor.clone();
        thread::spawn(move || processor.run())
    }

    #[test]
    fn test_processes_events_in_order() {
        let ring = ring(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            handler_fn(move |sequence, data: &i64, _| {
                seen.lock().push((sequence, *data));
                Ok(())
            })
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 40);
        wait_until(|| processor.sequence().get() == 39);

        processor.halt();
        thread.join().unwrap().unwrap();

        let expected: Vec<_> = (0..40).map(|i| (i, i)).collect();
        assert_eq!(*seen.lock(), expected);
        assert!(!processor.is_running());
    }

    #[test]
    fn test_end_of_batch_flag_marks_last_entry() {
        let ring = ring(16);
        publish_tracked_noop(&ring);
        publish(&ring, 5);

        let flags = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let flags = flags.clone();
            handler_fn(move |_, _: &i64, end_of_batch| {
                flags.lock().push(end_of_batch);
                Ok(())
            })
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));

        let thread = spawn(&processor);
        wait_until(|| processor.sequence().get() == 4);
        processor.halt();
        thread.join().unwrap().unwrap();

        // all five were available before the first wait
        assert_eq!(*flags.lock(), vec![false, false, false, false, true]);
    }

    fn publish_tracked_noop(ring: &Arc<RingBuffer<i64>>) {
        let noop = NoOpEventProcessor::new(ring.clone());
        ring.set_tracked_sequences(vec![noop.sequence().clone()]).unwrap();
    }

    struct Lifecycle {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl EventHandler<i64> for Lifecycle {
        fn on_available(&mut self, _: i64, _: &i64, _: bool) -> std::result::Result<(), HandlerError> {
            Ok(())
        }

        fn lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
            Some(self as &mut dyn LifecycleAware)
        }
    }

    impl LifecycleAware for Lifecycle {
        fn on_start(&mut self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_shutdown(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lifecycle_hooks_around_each_run() {
        let ring = ring(8);
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let handler = Lifecycle {
            starts: starts.clone(),
            stops: stops.clone(),
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));

        for round in 1..=2 {
            let thread = spawn(&processor);
            wait_until(|| starts.load(Ordering::SeqCst) == round);
            assert_eq!(stops.load(Ordering::SeqCst), round - 1);

            processor.halt();
            thread.join().unwrap().unwrap();
            assert_eq!(stops.load(Ordering::SeqCst), round);
        }
    }

    #[test]
    fn test_fatal_fault_stops_processor() {
        let ring = ring(16);
        let handler = handler_fn(|sequence, _: &i64, _| {
            if sequence == 3 { Err("cannot handle 3".into()) } else { Ok(()) }
        });
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 6);

        let err = thread.join().unwrap().unwrap_err();
        assert!(matches!(err, RinglaneError::HandlerFault { sequence: 3, .. }));
        assert!(!processor.is_running());
        // everything before the failed entry was handled
        assert_eq!(processor.sequence().get(), 2);
    }

    #[test]
    fn test_ignore_exception_handler_skips_entry() {
        let ring = ring(16);
        let handled = Arc::new(AtomicI64::new(0));
        let handler = {
            let handled = handled.clone();
            handler_fn(move |sequence, _: &i64, _| {
                if sequence % 2 == 0 {
                    return Err("even".into());
                }
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let processor = Arc::new(
            BatchEventProcessor::new(ring.create_barrier(vec![]), handler).with_exception_handler(
                Arc::new(IgnoreExceptionHandler)
            )
        );
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 10);
        wait_until(|| processor.sequence().get() == 9);
        processor.halt();
        thread.join().unwrap().unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_second_run_while_running_is_rejected() {
        let ring = ring(8);
        let processor = Arc::new(
            BatchEventProcessor::new(
                ring.create_barrier(vec![]),
                handler_fn(|_, _: &i64, _| Ok(()))
            )
        );

        let thread = spawn(&processor);
        wait_until(|| processor.is_running());
        assert!(matches!(processor.run(), Err(RinglaneError::AlreadyRunning)));

        processor.halt();
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_restart_resumes_after_last_sequence() {
        let ring = ring(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            handler_fn(move |sequence, _: &i64, _| {
                seen.lock().push(sequence);
                Ok(())
            })
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 3);
        wait_until(|| processor.sequence().get() == 2);
        processor.halt();
        thread.join().unwrap().unwrap();

        publish(&ring, 3);
        let thread = spawn(&processor);
        wait_until(|| processor.sequence().get() == 5);
        processor.halt();
        thread.join().unwrap().unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_delay_sequence_write_throttles_publication() {
        let ring = ring(8);
        let handled = Arc::new(AtomicI64::new(0));
        let handler = {
            let handled = handled.clone();
            handler_fn(move |_, _: &i64, _| {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        assert!(processor.delay_sequence_write(0).is_err());
        assert!(processor.delay_sequence_write(5).is_err());
        assert!(processor.delay_sequence_write(8).is_err());
        processor.delay_sequence_write(4).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 3);
        wait_until(|| handled.load(Ordering::SeqCst) == 3);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(processor.sequence().get(), -1);

        publish(&ring, 3);
        wait_until(|| handled.load(Ordering::SeqCst) == 6);
        // crossing sequence 4 forces a publish, however the batches fell
        assert!(processor.sequence().get() >= 4);

        processor.halt();
        thread.join().unwrap().unwrap();
        assert_eq!(processor.sequence().get(), 5);
    }

    #[test]
    fn test_halted_throttled_processor_publishes_progress() {
        let ring = ring(8);
        let handled = Arc::new(AtomicI64::new(0));
        let handler = {
            let handled = handled.clone();
            handler_fn(move |_, _: &i64, _| {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();
        processor.delay_sequence_write(4).unwrap();

        let thread = spawn(&processor);
        publish(&ring, 2);
        wait_until(|| handled.load(Ordering::SeqCst) == 2);
        assert_eq!(processor.sequence().get(), -1);
        processor.halt();
        thread.join().unwrap().unwrap();

        assert_eq!(processor.sequence().get(), 1);
    }

    #[test]
    fn test_throttled_leaf_lets_producer_lap_the_ring() {
        let ring = ring(8);
        let handler = handler_fn(|_, _: &i64, _| Ok(()));
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();
        processor.delay_sequence_write(4).unwrap();

        let thread = spawn(&processor);
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || publish(&ring, 20))
        };

        wait_until(|| producer.is_finished());
        producer.join().unwrap();
        assert_eq!(ring.cursor(), 19);

        processor.halt();
        thread.join().unwrap().unwrap();
        assert_eq!(processor.sequence().get(), 19);
    }

    struct Tracking {
        tracker: Option<SequenceTracker>,
        reported: Arc<AtomicBool>,
    }

    impl EventHandler<i64> for Tracking {
        fn on_available(&mut self, sequence: i64, _: &i64, _: bool) -> std::result::Result<(), HandlerError> {
            if let Some(tracker) = &self.tracker {
                // reaches past the entry in hand and beyond
                tracker.on_complete(sequence + 5);
            }
            if sequence == 1 {
                self.reported.store(true, Ordering::SeqCst);
                // hold the batch open until the test has looked
                while self.reported.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
            }
            Ok(())
        }

        fn set_sequence_tracker(&mut self, tracker: SequenceTracker) {
            self.tracker = Some(tracker);
        }
    }

    #[test]
    fn test_sequence_tracker_releases_only_finished_entries() {
        let ring = ring(16);
        let reported = Arc::new(AtomicBool::new(false));
        let handler = Tracking {
            tracker: None,
            reported: reported.clone(),
        };
        let processor = Arc::new(BatchEventProcessor::new(ring.create_barrier(vec![]), handler));
        ring.set_tracked_sequences(vec![processor.sequence().clone()]).unwrap();

        publish(&ring, 4);
        let thread = spawn(&processor);
        wait_until(|| reported.load(Ordering::SeqCst));
        // mid batch, with sequence 1 still in the handler
        assert_eq!(processor.sequence().get(), 0);

        reported.store(false, Ordering::SeqCst);
        wait_until(|| processor.sequence().get() == 3);
        processor.halt();
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_noop_processor_follows_cursor() {
        let ring = ring(8);
        let noop = NoOpEventProcessor::new(ring.clone());
        ring.set_tracked_sequences(vec![noop.sequence().clone()]).unwrap();

        publish(&ring, 20);
        assert_eq!(noop.sequence().get(), 19);

        noop.run().unwrap();
        assert!(noop.is_running());
        noop.halt();
        assert!(!noop.is_running());
    }
}
