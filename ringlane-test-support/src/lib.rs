//! # ringlane-test-support
//!
//! Testing infrastructure for ringlane.
//!
//! ## Components
//!
//! - **fixtures** - Entry types and handlers for the classic scenarios
//!   (unicast sum, fizz-buzz diamond, three-step pipeline)
//! - **verify** - Sequence and per-producer ordering checks
//! - **stress** - Randomized multi-producer runs with a deadline

pub mod fixtures;
pub mod stress;
pub mod verify;

pub use fixtures::{
    FizzBuzzEvent,
    FizzBuzzStep,
    FizzBuzzHandler,
    PipelineEvent,
    PipelineStep,
    SummingHandler,
    ChannelHandler,
};
pub use stress::{ StressConfig, StressOutcome, run_stress, wait_until };
pub use verify::{ SequenceChecker, ProducerOrderChecker };

/// Route `tracing` output to the test harness, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber
        ::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
