//! Diamond - fizz and buzz in parallel, joined by fizz-buzz
//!
//! ```text
//!          +--> fizz --+
//! ring ----|           +--> fizz_buzz
//!          +--> buzz --+
//! ```
//!
//! Run: RUST_LOG=info cargo run --release --example diamond

use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::Arc;

use ringlane::disruptor::{ EventHandler, RingBuffer, RingBufferConfig, Topology, WaitStrategyOption };
use ringlane::{ HandlerError, Result };

const ITERATIONS: i64 = 100_000;

#[derive(Default)]
struct FizzBuzzEvent {
    value: i64,
    fizz: AtomicBool,
    buzz: AtomicBool,
}

enum Step {
    Fizz,
    Buzz,
}

impl EventHandler<FizzBuzzEvent> for Step {
    fn on_available(
        &mut self,
        _sequence: i64,
        event: &FizzBuzzEvent,
        _end_of_batch: bool
    ) -> std::result::Result<(), HandlerError> {
        match self {
            Step::Fizz => event.fizz.store(event.value % 3 == 0, Ordering::Relaxed),
            Step::Buzz => event.buzz.store(event.value % 5 == 0, Ordering::Relaxed),
        }
        Ok(())
    }
}

struct FizzBuzz {
    count: Arc<AtomicU64>,
}

impl EventHandler<FizzBuzzEvent> for FizzBuzz {
    fn on_available(
        &mut self,
        _sequence: i64,
        event: &FizzBuzzEvent,
        _end_of_batch: bool
    ) -> std::result::Result<(), HandlerError> {
        if event.fizz.load(Ordering::Relaxed) && event.buzz.load(Ordering::Relaxed) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber
        ::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RingBufferConfig::new(1024)?.with_wait_strategy(WaitStrategyOption::Yielding);
    let ring = Arc::new(RingBuffer::new(FizzBuzzEvent::default, &config)?);
    let count = Arc::new(AtomicU64::new(0));

    let mut topology = Topology::new(ring.clone());
    let join = topology
        .handle_events_with([Step::Fizz, Step::Buzz])
        .then([FizzBuzz { count: count.clone() }])
        .handle();
    topology.start()?;

    for i in 0..ITERATIONS {
        ring.publish_with(|_, event| {
            event.value = i;
            *event.fizz.get_mut() = false;
            *event.buzz.get_mut() = false;
        })?;
    }
    while join.sequences()[0].get() < ITERATIONS - 1 {
        std::thread::yield_now();
    }
    topology.halt()?;

    println!("fizz-buzz count for 0..{}: {}", ITERATIONS, count.load(Ordering::Relaxed));
    Ok(())
}
