//! Unicast - one producer, one processor
//!
//! Sums 1..=1,000,000 through a ring and prints the average.
//!
//! Run: RUST_LOG=debug cargo run --release --example unicast

use std::sync::atomic::{ AtomicI64, Ordering };
use std::sync::Arc;
use std::time::Instant;

use ringlane::disruptor::{
    handler_fn,
    ClaimStrategyOption,
    RingBuffer,
    RingBufferConfig,
    Topology,
    WaitStrategyOption,
};
use ringlane::{ HandlerError, Result };

const RING_SIZE: usize = 64 * 1024;
const MAX_NUMBER: i64 = 1_000_000;

fn main() -> Result<()> {
    tracing_subscriber
        ::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RingBufferConfig::new(RING_SIZE)?
        .with_claim_strategy(ClaimStrategyOption::SingleProducer)
        .with_wait_strategy(WaitStrategyOption::Yielding);
    let ring = Arc::new(RingBuffer::new(|| 0i64, &config)?);

    let sum = Arc::new(AtomicI64::new(0));
    let total = sum.clone();
    let mut topology = Topology::new(ring.clone()).with_thread_name_prefix("unicast");
    let stage = topology
        .handle_events_with([
            handler_fn(move |_, value: &i64, _| -> std::result::Result<(), HandlerError> {
                total.fetch_add(*value, Ordering::Relaxed);
                Ok(())
            }),
        ])
        .handle();
    topology.start()?;

    let start = Instant::now();
    for number in 1..=MAX_NUMBER {
        let mut entry = ring.next_entry()?;
        *entry = number;
    }
    while stage.sequences()[0].get() < MAX_NUMBER - 1 {
        std::thread::yield_now();
    }
    let elapsed = start.elapsed();
    topology.halt()?;

    let sum = sum.load(Ordering::Relaxed);
    println!("Sum:      {}", sum);
    println!("Average:  {:.1}", (sum as f64) / (MAX_NUMBER as f64));
    println!("Elapsed:  {:?}", elapsed);
    println!("Rate:     {:.2} M/s", (MAX_NUMBER as f64) / elapsed.as_secs_f64() / 1_000_000.0);
    Ok(())
}
