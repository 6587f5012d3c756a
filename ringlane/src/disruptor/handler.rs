//! Callback contract between processors and business logic.

use std::sync::Arc;

use crate::disruptor::sequence::Sequence;
use crate::error::HandlerError;

/// Business logic driven by a [`BatchEventProcessor`](crate::disruptor::BatchEventProcessor).
///
/// Entries arrive strictly in sequence order. Handlers get shared references
/// because stages of a fan-out read the same entry at the same time; a stage
/// that annotates entries for downstream stages does so through interior
/// mutability in `T`.
pub trait EventHandler<T>: Send {
    /// Called for every available entry.
    fn on_available(
        &mut self,
        sequence: i64,
        data: &T,
        end_of_batch: bool
    ) -> Result<(), HandlerError>;

    /// Called once after the last entry of each batch.
    fn on_end_of_batch(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Return `Some` to receive start and shutdown notifications.
    ///
    /// Queried once when the processor is built.
    fn lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
        None
    }

    /// Receive a tracker to report progress in the middle of a batch.
    fn set_sequence_tracker(&mut self, _tracker: SequenceTracker) {}
}

/// Start/stop hooks, run on the processor thread.
pub trait LifecycleAware {
    /// Before the first wait
    fn on_start(&mut self);

    /// After the processor leaves its loop, whether halted or failed
    fn on_shutdown(&mut self);
}

/// Lets a handler release entries before its batch ends.
///
/// Useful when a handler hands entries to slower I/O and wants producers to
/// reuse slots as soon as each one is done. The processor still publishes at
/// the end of every batch.
///
/// Only entries whose `on_available` call has returned can be released. The
/// entry currently being handled stays protected, so a handler may keep
/// reading `data` after reporting its own sequence.
#[derive(Clone)]
pub struct SequenceTracker {
    sequence: Arc<Sequence>,
    delivered: Arc<Sequence>,
}

impl SequenceTracker {
    pub(crate) fn new(sequence: Arc<Sequence>, delivered: Arc<Sequence>) -> Self {
        Self { sequence, delivered }
    }

    /// Report everything up to and including `sequence` as consumed.
    ///
    /// Clamped to the last entry the handler has finished with; never moves
    /// the processor's sequence backwards.
    pub fn on_complete(&self, sequence: i64) {
        self.sequence.set_max(sequence.min(self.delivered.get()));
    }
}

impl<T, H: EventHandler<T> + ?Sized> EventHandler<T> for Box<H> {
    fn on_available(
        &mut self,
        sequence: i64,
        data: &T,
        end_of_batch: bool
    ) -> Result<(), HandlerError> {
        (**self).on_available(sequence, data, end_of_batch)
    }

    fn on_end_of_batch(&mut self) -> Result<(), HandlerError> {
        (**self).on_end_of_batch()
    }

    fn lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
        (**self).lifecycle_aware()
    }

    fn set_sequence_tracker(&mut self, tracker: SequenceTracker) {
        (**self).set_sequence_tracker(tracker)
    }
}

type EndOfBatchFn = fn() -> Result<(), HandlerError>;

/// Handler built from closures; see [`handler_fn`].
pub struct FnEventHandler<F, E = EndOfBatchFn> {
    on_available: F,
    on_end_of_batch: Option<E>,
}

/// Wrap a closure as an [`EventHandler`].
///
/// ```
/// use ringlane::disruptor::handler_fn;
///
/// let mut total = 0u64;
/// let handler = handler_fn(move |_sequence, value: &u64, _end_of_batch| {
///     total += *value;
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<T, F>(on_available: F) -> FnEventHandler<F>
    where F: FnMut(i64, &T, bool) -> Result<(), HandlerError> + Send
{
    FnEventHandler {
        on_available,
        on_end_of_batch: None,
    }
}

impl<F> FnEventHandler<F> {
    /// Also run `on_end_of_batch` after every batch.
    pub fn with_end_of_batch<E>(self, on_end_of_batch: E) -> FnEventHandler<F, E>
        where E: FnMut() -> Result<(), HandlerError> + Send
    {
        FnEventHandler {
            on_available: self.on_available,
            on_end_of_batch: Some(on_end_of_batch),
        }
    }
}

impl<T, F, E> EventHandler<T>
    for FnEventHandler<F, E>
    where
        F: FnMut(i64, &T, bool) -> Result<(), HandlerError> + Send,
        E: FnMut() -> Result<(), HandlerError> + Send
{
    fn on_available(
        &mut self,
        sequence: i64,
        data: &T,
        end_of_batch: bool
    ) -> Result<(), HandlerError> {
        (self.on_available)(sequence, data, end_of_batch)
    }

    fn on_end_of_batch(&mut self) -> Result<(), HandlerError> {
        match self.on_end_of_batch.as_mut() {
            Some(on_end_of_batch) => on_end_of_batch(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Vec<(i64, u32, bool)>,
        started: bool,
        stopped: bool,
    }

    impl EventHandler<u32> for Recorder {
        fn on_available(
            &mut self,
            sequence: i64,
            data: &u32,
            end_of_batch: bool
        ) -> Result<(), HandlerError> {
            self.seen.push((sequence, *data, end_of_batch));
            Ok(())
        }

        fn lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
            Some(self as &mut dyn LifecycleAware)
        }
    }

    impl LifecycleAware for Recorder {
        fn on_start(&mut self) {
            self.started = true;
        }

        fn on_shutdown(&mut self) {
            self.stopped = true;
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            seen: Vec::new(),
            started: false,
            stopped: false,
        }
    }

    #[test]
    fn test_lifecycle_hooks_are_reachable() {
        let mut handler = recorder();
        let lifecycle = handler.lifecycle_aware().unwrap();
        lifecycle.on_start();
        lifecycle.on_shutdown();

        assert!(handler.started);
        assert!(handler.stopped);
    }

    #[test]
    fn test_boxed_handler_delegates() {
        let mut handler: Box<dyn EventHandler<u32>> = Box::new(recorder());

        handler.on_available(0, &5u32, true).unwrap();
        handler.on_available(1, &6u32, false).unwrap();
        assert!(EventHandler::<u32>::lifecycle_aware(&mut handler).is_some());
        assert!(EventHandler::<u32>::on_end_of_batch(&mut handler).is_ok());
    }

    #[test]
    fn test_recorder_sees_entries_in_order() {
        let mut handler = recorder();
        handler.on_available(0, &5, false).unwrap();
        handler.on_available(1, &6, true).unwrap();
        assert_eq!(handler.seen, vec![(0, 5, false), (1, 6, true)]);
    }

    #[test]
    fn test_handler_without_lifecycle() {
        let mut handler = handler_fn(|_, _: &u32, _| Ok(()));
        assert!(EventHandler::<u32>::lifecycle_aware(&mut handler).is_none());
    }

    #[test]
    fn test_fn_handler_with_end_of_batch() {
        let mut batches = 0;
        let mut total = 0;
        {
            let mut handler = handler_fn(|_, value: &u32, _| {
                total += *value;
                Ok(())
            }).with_end_of_batch(|| {
                batches += 1;
                Ok(())
            });

            handler.on_available(0, &3u32, false).unwrap();
            handler.on_available(1, &4u32, true).unwrap();
            EventHandler::<u32>::on_end_of_batch(&mut handler).unwrap();
        }
        assert_eq!(total, 7);
        assert_eq!(batches, 1);
    }

    #[test]
    fn test_fn_handler_propagates_errors() {
        let mut handler = handler_fn(|sequence, _: &u32, _| {
            if sequence == 1 { Err("bad entry".into()) } else { Ok(()) }
        });
        assert!(handler.on_available(0, &0u32, false).is_ok());
        assert_eq!(handler.on_available(1, &0u32, true).unwrap_err().to_string(), "bad entry");
    }

    #[test]
    fn test_sequence_tracker_sets_sequence() {
        let sequence = Arc::new(Sequence::default());
        let delivered = Arc::new(Sequence::new(20));
        let tracker = SequenceTracker::new(sequence.clone(), delivered);
        tracker.clone().on_complete(17);
        assert_eq!(sequence.get(), 17);
    }

    #[test]
    fn test_sequence_tracker_is_clamped_to_delivered_entries() {
        let sequence = Arc::new(Sequence::default());
        let delivered = Arc::new(Sequence::new(4));
        let tracker = SequenceTracker::new(sequence.clone(), delivered.clone());

        // entries past the delivered range stay protected
        tracker.on_complete(100);
        assert_eq!(sequence.get(), 4);

        // and progress never goes backwards
        tracker.on_complete(2);
        assert_eq!(sequence.get(), 4);

        delivered.set(9);
        tracker.on_complete(7);
        assert_eq!(sequence.get(), 7);
    }
}
