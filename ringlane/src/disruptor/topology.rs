//! Wiring processors into pipelines, fan-outs and diamonds.
//!
//! ```text
//!                  +--> fizz --+
//! producer -> ring |           +--> fizz_buzz
//!                  +--> buzz --+
//! ```
//!
//! `handle_events_with` creates processors gated on the ring cursor; `then`
//! creates processors gated on every processor of the previous group. When the
//! topology starts, every processor no later stage depends on is a leaf and
//! is installed as a tracked sequence on the ring, so producers can never lap
//! the slowest end of the graph.

use std::ops::Range;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };

use tracing::{ debug, info, warn };

use crate::config_error;
use crate::constants::DEFAULT_THREAD_NAME_PREFIX;
use crate::cpu::pin_to_cpu;
use crate::disruptor::claim_strategy::{ ClaimStrategies, ClaimStrategy };
use crate::disruptor::exception_handler::ExceptionHandler;
use crate::disruptor::handler::EventHandler;
use crate::disruptor::processor::{ BatchEventProcessor, EventProcessor };
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::wait_strategy::{ WaitStrategies, WaitStrategy };
use crate::error::{ Result, RinglaneError };

static NEXT_TOPOLOGY_ID: AtomicU64 = AtomicU64::new(0);

/// Owns the processors of one ring and the threads that run them.
///
/// Wiring mistakes, such as an empty handler group or a [`StageHandle`] from
/// another topology, are reported by [`Topology::start`].
///
/// Halts and joins its threads when dropped.
pub struct Topology<T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    ring: Arc<RingBuffer<T, C, W>>,
    processors: Vec<Arc<dyn EventProcessor>>,
    gating: Vec<bool>,
    exception_handler: Option<Arc<dyn ExceptionHandler<T>>>,
    publish_period: Option<usize>,
    cpu_affinity: Vec<usize>,
    thread_name_prefix: String,
    threads: Vec<JoinHandle<Result<()>>>,
    wired: Option<usize>,
    id: u64,
    wiring_error: Option<String>,
}

impl<T, C, W> Topology<T, C, W>
    where T: Send + Sync + 'static, C: ClaimStrategy + 'static, W: WaitStrategy + 'static
{
    pub fn new(ring: Arc<RingBuffer<T, C, W>>) -> Self {
        Self {
            ring,
            processors: Vec::new(),
            gating: Vec::new(),
            exception_handler: None,
            publish_period: None,
            cpu_affinity: Vec::new(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            threads: Vec::new(),
            wired: None,
            id: NEXT_TOPOLOGY_ID.fetch_add(1, Ordering::Relaxed),
            wiring_error: None,
        }
    }

    /// Exception handler for processors created after this call
    pub fn with_exception_handler(mut self, exception_handler: Arc<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = Some(exception_handler);
        self
    }

    /// Leaf processors publish their sequence once every `period` events.
    /// Must be between 1 and half the ring capacity; checked on start.
    pub fn with_terminal_publish_period(mut self, period: usize) -> Self {
        self.publish_period = Some(period);
        self
    }

    /// Pin the processor created `n`th (in creation order) to `cores[n]`.
    /// Processors beyond the end of the list are left unpinned.
    pub fn with_cpu_affinity(mut self, cores: Vec<usize>) -> Self {
        self.cpu_affinity = cores;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// First stage: one processor per handler, each gated on the ring cursor.
    pub fn handle_events_with<H, I>(&mut self, handlers: I) -> EventHandlerGroup<'_, T, C, W>
        where H: EventHandler<T> + 'static, I: IntoIterator<Item = H>
    {
        let range = self.create_processors(&[], handlers);
        EventHandlerGroup { topology: self, range }
    }

    /// Start a group gated on a stage created earlier.
    pub fn after(&mut self, stage: &StageHandle) -> EventHandlerGroup<'_, T, C, W> {
        let range = if stage.topology == self.id {
            stage.range.clone()
        } else {
            self.record_wiring_error("Stage handle belongs to a different topology");
            0..0
        };
        EventHandlerGroup { topology: self, range }
    }

    fn record_wiring_error(&mut self, message: &str) {
        warn!(reason = message, "Invalid topology wiring");
        self.wiring_error.get_or_insert_with(|| message.to_string());
    }

    fn create_processors<H, I>(&mut self, gating_on: &[usize], handlers: I) -> Range<usize>
        where H: EventHandler<T> + 'static, I: IntoIterator<Item = H>
    {
        let dependents: Vec<Arc<Sequence>> = gating_on
            .iter()
            .map(|&index| self.processors[index].sequence().clone())
            .collect();

        let start = self.processors.len();
        for handler in handlers {
            let barrier = self.ring.create_barrier(dependents.clone());
            let mut processor = BatchEventProcessor::new(barrier, handler);
            if let Some(exception_handler) = &self.exception_handler {
                processor = processor.with_exception_handler(exception_handler.clone());
            }
            self.processors.push(Arc::new(processor));
            self.gating.push(false);
        }
        let range = start..self.processors.len();

        if range.is_empty() {
            self.record_wiring_error("Event handler group is empty");
        } else {
            for &index in gating_on {
                self.gating[index] = true;
            }
        }
        range
    }

    /// Sequences of processors no other processor depends on
    pub fn leaf_sequences(&self) -> Vec<Arc<Sequence>> {
        self.processors
            .iter()
            .zip(&self.gating)
            .filter(|(_, gating)| !**gating)
            .map(|(processor, _)| processor.sequence().clone())
            .collect()
    }

    fn wire(&mut self) -> Result<()> {
        match self.wired {
            Some(count) if count == self.processors.len() => {
                return Ok(());
            }
            Some(_) => {
                return Err(config_error!("Event handlers were added after the topology first started"));
            }
            None => {}
        }

        if let Some(period) = self.publish_period {
            for (processor, _) in self.processors
                .iter()
                .zip(&self.gating)
                .filter(|(_, gating)| !**gating) {
                processor.delay_sequence_write(period)?;
            }
        }
        self.ring.set_tracked_sequences(self.leaf_sequences())?;
        self.wired = Some(self.processors.len());
        Ok(())
    }

    /// Install leaf tracking, spawn one thread per processor and wait until
    /// every processor is running.
    ///
    /// A halted topology can be started again; processors resume where they
    /// stopped.
    pub fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Err(config_error!("Topology is already started"));
        }
        if let Some(message) = &self.wiring_error {
            return Err(RinglaneError::config(message.as_str()));
        }
        if self.processors.is_empty() {
            return Err(config_error!("Topology has no event handlers"));
        }
        self.wire()?;

        for index in 0..self.processors.len() {
            if let Err(err) = self.spawn(index) {
                self.stop_threads();
                return Err(err);
            }
        }

        while !self.all_running() {
            if self.threads.iter().any(JoinHandle::is_finished) {
                let outcome = self.halt();
                return Err(
                    outcome
                        .err()
                        .unwrap_or_else(|| RinglaneError::unexpected("Event processor exited during start"))
                );
            }
            thread::yield_now();
        }

        info!(processors = self.processors.len(), "Topology started");
        Ok(())
    }

    fn spawn(&mut self, index: usize) -> Result<()> {
        let processor = self.processors[index].clone();
        let core = self.cpu_affinity.get(index).copied();

        let handle = thread::Builder
            ::new()
            .name(format!("{}-{}", self.thread_name_prefix, index))
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_cpu(core)?;
                    debug!(processor = index, core, "Pinned event processor thread");
                }
                processor.run()
            })
            .map_err(|e| RinglaneError::system_resource(format!("Failed to spawn processor thread: {e}")))?;

        self.threads.push(handle);
        Ok(())
    }

    /// Halt every processor, join the threads and return the first error any
    /// processor stopped with.
    pub fn halt(&mut self) -> Result<()> {
        let outcome = self.stop_threads();
        info!(processors = self.processors.len(), "Topology halted");
        outcome
    }

    fn stop_threads(&mut self) -> Result<()> {
        for processor in &self.processors {
            processor.halt();
        }

        let mut first_error = None;
        for handle in self.threads.drain(..) {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(RinglaneError::unexpected("Event processor thread panicked")));
            if let Err(err) = outcome {
                match first_error {
                    None => {
                        first_error = Some(err);
                    }
                    Some(_) => warn!(error = %err, "Additional event processor failure"),
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// True while every processor is inside `run`.
    ///
    /// A processor that stopped on a handler fault leaves the stages behind it
    /// waiting forever; supervisors poll this and halt the topology.
    pub fn all_running(&self) -> bool {
        self.processors.iter().all(|processor| processor.is_running())
    }

    pub fn is_started(&self) -> bool {
        !self.threads.is_empty()
    }

    pub fn processors(&self) -> &[Arc<dyn EventProcessor>] {
        &self.processors
    }

    pub fn ring(&self) -> &Arc<RingBuffer<T, C, W>> {
        &self.ring
    }
}

impl<T, C: ClaimStrategy, W: WaitStrategy> Drop for Topology<T, C, W> {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        for processor in &self.processors {
            processor.halt();
        }
        for handle in self.threads.drain(..) {
            if let Ok(Err(err)) = handle.join() {
                warn!(error = %err, "Event processor failed before shutdown");
            }
        }
    }
}

/// Processors created by one `handle_events_with`, `after` or `then` call.
pub struct EventHandlerGroup<'a, T, C = ClaimStrategies, W = WaitStrategies>
    where C: ClaimStrategy, W: WaitStrategy
{
    topology: &'a mut Topology<T, C, W>,
    range: Range<usize>,
}

impl<'a, T, C, W> EventHandlerGroup<'a, T, C, W>
    where T: Send + Sync + 'static, C: ClaimStrategy + 'static, W: WaitStrategy + 'static
{
    /// Next stage: one processor per handler, each gated on every processor
    /// of this group.
    pub fn then<H, I>(self, handlers: I) -> EventHandlerGroup<'a, T, C, W>
        where H: EventHandler<T> + 'static, I: IntoIterator<Item = H>
    {
        let gating_on: Vec<usize> = self.range.collect();
        let range = self.topology.create_processors(&gating_on, handlers);
        EventHandlerGroup {
            topology: self.topology,
            range,
        }
    }

    /// Remember this group so a later stage can be gated on it with
    /// [`Topology::after`].
    pub fn handle(&self) -> StageHandle {
        StageHandle {
            topology: self.topology.id,
            range: self.range.clone(),
            sequences: self.sequences(),
        }
    }

    pub fn sequences(&self) -> Vec<Arc<Sequence>> {
        self.topology.processors[self.range.clone()]
            .iter()
            .map(|processor| processor.sequence().clone())
            .collect()
    }
}

/// A group of processors in a [`Topology`], detached from the builder borrow.
#[derive(Clone, Debug)]
pub struct StageHandle {
    topology: u64,
    range: Range<usize>,
    sequences: Vec<Arc<Sequence>>,
}

impl StageHandle {
    pub fn sequences(&self) -> &[Arc<Sequence>] {
        &self.sequences
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::exception_handler::IgnoreExceptionHandler;
    use crate::disruptor::handler::handler_fn;
    use crate::disruptor::{ RingBufferConfig, WaitStrategyOption };
    use crate::error::HandlerError;
    use parking_lot::Mutex;
    use std::time::{ Duration, Instant };

    type Boxed = Box<dyn EventHandler<i64>>;

    fn ring(size: usize) -> Arc<RingBuffer<i64>> {
        let config = RingBufferConfig::new(size)
            .unwrap()
            .with_wait_strategy(WaitStrategyOption::Yielding);
        Arc::new(RingBuffer::new(|| 0, &config).unwrap())
    }

    fn recorder(log: &Arc<Mutex<Vec<(&'static str, i64)>>>, name: &'static str) -> Boxed {
        let log = log.clone();
        Box::new(
            handler_fn(move |sequence, _: &i64, _| -> std::result::Result<(), HandlerError> {
                log.lock().push((name, sequence));
                Ok(())
            })
        )
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn publish(ring: &RingBuffer<i64>, count: usize) {
        for _ in 0..count {
            ring.publish_with(|sequence, data| {
                *data = sequence;
            }).unwrap();
        }
    }

    #[test]
    fn test_start_without_handlers_fails() {
        let mut topology = Topology::new(ring(8));
        assert!(matches!(topology.start(), Err(RinglaneError::InvalidConfig { .. })));
    }

    #[test]
    fn test_pipeline_tracks_only_last_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(16));
        let last = topology
            .handle_events_with(vec![recorder(&log, "one")])
            .then(vec![recorder(&log, "two")])
            .then(vec![recorder(&log, "three")])
            .handle();

        topology.start().unwrap();
        let tracked = topology.ring().tracked_sequences().unwrap();
        assert_eq!(tracked.len(), 1);
        assert!(Arc::ptr_eq(&tracked[0], &last.sequences()[0]));

        publish(topology.ring(), 20);
        wait_until(|| last.sequences()[0].get() == 19);
        topology.halt().unwrap();

        let log = log.lock();
        for stage in ["one", "two", "three"] {
            let seen: Vec<i64> = log
                .iter()
                .filter(|(name, _)| *name == stage)
                .map(|(_, sequence)| *sequence)
                .collect();
            assert_eq!(seen, (0..20).collect::<Vec<_>>());
        }
        // a later stage never sees a sequence before an earlier stage did
        for sequence in 0..20 {
            let position = |stage| log.iter().position(|entry| *entry == (stage, sequence)).unwrap();
            assert!(position("one") < position("two"));
            assert!(position("two") < position("three"));
        }
    }

    #[test]
    fn test_diamond_leaves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(16));
        let fan_in = topology
            .handle_events_with(vec![recorder(&log, "a"), recorder(&log, "b")])
            .then(vec![recorder(&log, "c")])
            .handle();

        let leaves = topology.leaf_sequences();
        assert_eq!(leaves.len(), 1);
        assert!(Arc::ptr_eq(&leaves[0], &fan_in.sequences()[0]));
    }

    #[test]
    fn test_parallel_first_stage_is_all_leaves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(16));
        let stage = topology
            .handle_events_with(vec![recorder(&log, "a"), recorder(&log, "b")])
            .handle();

        assert_eq!(stage.len(), 2);
        assert_eq!(topology.leaf_sequences().len(), 2);
    }

    #[test]
    fn test_after_gates_on_earlier_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(16));
        let first = topology.handle_events_with(vec![recorder(&log, "first")]).handle();
        topology.handle_events_with(vec![recorder(&log, "side")]);
        let late = topology.after(&first).then(vec![recorder(&log, "late")]).handle();

        let leaves = topology.leaf_sequences();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().any(|leaf| Arc::ptr_eq(leaf, &late.sequences()[0])));
        assert!(!leaves.iter().any(|leaf| Arc::ptr_eq(leaf, &first.sequences()[0])));
    }

    #[test]
    fn test_empty_handler_group_fails_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(8));
        topology
            .handle_events_with(vec![recorder(&log, "one")])
            .then(Vec::<Boxed>::new())
            .then(vec![recorder(&log, "three")]);

        assert!(matches!(topology.start(), Err(RinglaneError::InvalidConfig { .. })));
        assert!(!topology.is_started());
        // the check does not go away on a second attempt
        assert!(topology.start().is_err());
    }

    #[test]
    fn test_stage_handle_from_another_topology_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut other = Topology::new(ring(8));
        let foreign = other
            .handle_events_with(vec![recorder(&log, "x"), recorder(&log, "y"), recorder(&log, "z")])
            .handle();

        let mut topology = Topology::new(ring(8));
        topology.handle_events_with(vec![recorder(&log, "a")]);
        topology.after(&foreign).then(vec![recorder(&log, "b")]);

        assert_eq!(topology.processors().len(), 2);
        assert!(matches!(topology.start(), Err(RinglaneError::InvalidConfig { .. })));
    }

    #[test]
    fn test_start_twice_fails_and_restart_after_halt_resumes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(8));
        let stage = topology.handle_events_with(vec![recorder(&log, "only")]).handle();

        topology.start().unwrap();
        assert!(topology.is_started());
        assert!(topology.start().is_err());

        publish(topology.ring(), 3);
        wait_until(|| stage.sequences()[0].get() == 2);
        topology.halt().unwrap();
        assert!(!topology.all_running());

        topology.start().unwrap();
        publish(topology.ring(), 3);
        wait_until(|| stage.sequences()[0].get() == 5);
        topology.halt().unwrap();

        let seen: Vec<i64> = log.lock().iter().map(|(_, sequence)| *sequence).collect();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_handlers_added_after_start_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(8));
        topology.handle_events_with(vec![recorder(&log, "a")]);
        topology.start().unwrap();
        topology.halt().unwrap();

        topology.handle_events_with(vec![recorder(&log, "b")]);
        assert!(topology.start().is_err());
    }

    #[test]
    fn test_halt_reports_handler_fault() {
        let mut topology = Topology::new(ring(8));
        topology.handle_events_with(
            vec![
                handler_fn(|sequence, _: &i64, _| {
                    if sequence == 1 { Err("broken".into()) } else { Ok(()) }
                })
            ]
        );
        topology.start().unwrap();

        publish(topology.ring(), 2);
        wait_until(|| !topology.all_running());

        let err = topology.halt().unwrap_err();
        assert!(matches!(err, RinglaneError::HandlerFault { sequence: 1, .. }));
    }

    #[test]
    fn test_topology_exception_handler_applies_to_processors() {
        let mut topology = Topology::new(ring(8)).with_exception_handler(
            Arc::new(IgnoreExceptionHandler)
        );
        let stage = topology
            .handle_events_with(
                vec![handler_fn(|_, _: &i64, _| -> std::result::Result<(), HandlerError> { Err("always".into()) })]
            )
            .handle();
        topology.start().unwrap();

        publish(topology.ring(), 4);
        wait_until(|| stage.sequences()[0].get() == 3);
        assert!(topology.all_running());
        topology.halt().unwrap();
    }

    #[test]
    fn test_invalid_terminal_publish_period_fails_start() {
        for period in [0, 5, 8, 9] {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut topology = Topology::new(ring(8)).with_terminal_publish_period(period);
            topology.handle_events_with(vec![recorder(&log, "a")]);
            assert!(matches!(topology.start(), Err(RinglaneError::InvalidConfig { .. })));
        }
    }

    #[test]
    fn test_terminal_publish_period_still_delivers_everything() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(8)).with_terminal_publish_period(4);
        topology.handle_events_with(vec![recorder(&log, "a")]).then(vec![recorder(&log, "b")]);
        topology.start().unwrap();

        publish(topology.ring(), 50);
        wait_until(|| log.lock().len() == 100);
        topology.halt().unwrap();
    }

    #[test]
    fn test_drop_halts_running_processors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut topology = Topology::new(ring(8)).with_thread_name_prefix("drop-test");
        topology.handle_events_with(vec![recorder(&log, "a")]);
        topology.start().unwrap();

        let processors: Vec<_> = topology.processors().to_vec();
        drop(topology);
        assert!(processors.iter().all(|processor| !processor.is_running()));
    }
}
