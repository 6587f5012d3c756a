use std::fmt;
use std::sync::atomic::{ AtomicI64, Ordering };
use std::sync::Arc;

use static_assertions::const_assert_eq;

use crate::constants::{ CACHE_LINE_SIZE, INITIAL_CURSOR_VALUE };

/// Cache-line padded progress counter.
///
/// The ring buffer cursor and every processor's position are `Sequence`s.
/// They are polled in tight loops by other threads, so each one occupies a
/// whole padded line of its own: the alignment keeps anything before it off
/// the line, the padding keeps anything after it off the line.
///
/// Reads are acquire loads and writes are release stores. A consumer that
/// observes a sequence at `n` therefore also observes every slot write made
/// before it was advanced to `n`.
#[repr(align(128))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; CACHE_LINE_SIZE - 8], // 128 - 8 bytes for AtomicI64
}

const_assert_eq!(std::mem::size_of::<Sequence>(), CACHE_LINE_SIZE);
const_assert_eq!(std::mem::align_of::<Sequence>(), CACHE_LINE_SIZE);

impl Sequence {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            _padding: [0; CACHE_LINE_SIZE - 8],
        }
    }

    #[inline(always)]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically set to `new` if the current value is `expected`.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Raise the value to `value` unless it is already higher.
    #[inline]
    pub fn set_max(&self, value: i64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }

    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Smallest value among `sequences`, or `i64::MAX` when there are none.
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>]) -> i64 {
    sequences.iter().fold(i64::MAX, |min, sequence| min.min(sequence.get()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sequence_starts_at_initial_value() {
        assert_eq!(Sequence::default().get(), -1);
        assert_eq!(Sequence::new(7).get(), 7);
    }

    #[test]
    fn test_sequence_set_and_add() {
        let sequence = Sequence::default();
        sequence.set(10);
        assert_eq!(sequence.get(), 10);
        assert_eq!(sequence.increment_and_get(), 11);
        assert_eq!(sequence.add_and_get(5), 16);
    }

    #[test]
    fn test_sequence_set_max_only_raises() {
        let sequence = Sequence::new(5);
        sequence.set_max(3);
        assert_eq!(sequence.get(), 5);
        sequence.set_max(8);
        assert_eq!(sequence.get(), 8);
    }

    #[test]
    fn test_sequence_compare_and_set() {
        let sequence = Sequence::new(3);
        assert!(!sequence.compare_and_set(2, 9));
        assert_eq!(sequence.get(), 3);
        assert!(sequence.compare_and_set(3, 9));
        assert_eq!(sequence.get(), 9);
    }

    #[test]
    fn test_adjacent_sequences_do_not_share_a_line() {
        let pair = [Sequence::default(), Sequence::default()];
        let first = &pair[0] as *const Sequence as usize;
        let second = &pair[1] as *const Sequence as usize;
        assert_eq!(second - first, CACHE_LINE_SIZE);
        assert_eq!(first % CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn test_minimum_sequence() {
        assert_eq!(minimum_sequence(&[]), i64::MAX);

        let sequences = vec![
            Arc::new(Sequence::new(4)),
            Arc::new(Sequence::new(-1)),
            Arc::new(Sequence::new(9))
        ];
        assert_eq!(minimum_sequence(&sequences), -1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let sequence = Arc::new(Sequence::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sequence = sequence.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        sequence.increment_and_get();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sequence.get(), 3999);
    }
}
