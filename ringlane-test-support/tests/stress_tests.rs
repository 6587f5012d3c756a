//! Stress runs with random batch sizes and several producers.

use ringlane::disruptor::WaitStrategyOption;
use ringlane_test_support::{ init_tracing, run_stress, StressConfig };

#[test]
fn test_stress_single_producer_each_wait_strategy() {
    init_tracing();
    for wait_strategy in [
        WaitStrategyOption::Blocking,
        WaitStrategyOption::Yielding,
        WaitStrategyOption::BusySpin,
        WaitStrategyOption::SpinThenYieldThenSleep,
    ] {
        let config = StressConfig::new(50_000).with_wait_strategy(wait_strategy).with_ring_size(256);
        let outcome = run_stress(&config).unwrap();

        println!("{wait_strategy:?}: {:.0} events/s", outcome.rate());
        assert!(outcome.is_clean(), "{wait_strategy:?}: {outcome:?}");
    }
}

#[test]
fn test_stress_multi_producer_small_ring() {
    init_tracing();
    let config = StressConfig::new(25_000).with_producers(4).with_ring_size(64).with_max_batch(8);
    let outcome = run_stress(&config).unwrap();

    assert!(outcome.is_clean(), "{outcome:?}");
    assert_eq!(outcome.consumed, 100_000);
}

/// Batches as large as the ring itself still make progress.
#[test]
fn test_stress_full_ring_batches() {
    init_tracing();
    let config = StressConfig::new(10_000).with_producers(2).with_ring_size(16).with_max_batch(16);
    let outcome = run_stress(&config).unwrap();

    assert!(outcome.is_clean(), "{outcome:?}");
}
