//! Ringlane Constants
//!
//! Core constants used by the ring buffer, strategies and processors.

use std::time::Duration;

/// Value of every sequence before anything has been published or consumed
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Default ring buffer size (must be power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 1024;

/// Maximum ring buffer size
pub const MAX_RING_BUFFER_SIZE: usize = 64 * 1024 * 1024; // 64M slots

/// Width a sequence is padded to. Two 64-byte lines, since adjacent-line
/// prefetch pulls lines in pairs on most x86 parts.
pub const CACHE_LINE_SIZE: usize = 128;

/// Spins before the yielding strategy starts yielding
pub const YIELD_SPIN_TRIES: u32 = 100;

/// Retries before the spin/yield/sleep strategy starts sleeping
pub const SLEEP_RETRIES: u32 = 200;

/// Sleep used by the spin/yield/sleep strategy once retries are exhausted
pub const DEFAULT_SLEEP: Duration = Duration::from_micros(100);

/// Prefix for processor thread names
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "ringlane-processor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_sizes_are_powers_of_two() {
        assert!(DEFAULT_RING_BUFFER_SIZE.is_power_of_two());
        assert!(MAX_RING_BUFFER_SIZE.is_power_of_two());
    }

    #[test]
    fn test_cache_line_size_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_sleep_phase_follows_yield_phase() {
        assert!(SLEEP_RETRIES > YIELD_SPIN_TRIES);
    }
}
