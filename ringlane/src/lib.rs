//! # ringlane
//!
//! Bounded inter-thread messaging on a pre-allocated ring, after the LMAX
//! Disruptor.
//!
//! ## Architecture
//!
//! ```text
//!  producers                ring (capacity 2^n)              processors
//! ┌──────────┐   claim   ┌─┬─┬─┬─┬─┬─┬─┬─┐   wait_for   ┌──────────────┐
//! │ claim    ├──────────►│ │ │█│█│█│ │ │ ├─────────────►│ stage 1 ...  │
//! │ write    │  commit   └─┴─┴─┴─┴─┴─┴─┴─┘              │ stage 2 ...  │
//! │ commit   ├──► cursor ────────────────► barrier ────►│ leaves ──┐   │
//! └──────────┘      ▲                                   └──────────┼───┘
//!                   └────────── wrap prevention ◄──── tracked seqs ┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{ AtomicI64, Ordering };
//! use ringlane::disruptor::{ handler_fn, RingBuffer, RingBufferConfig, Topology };
//!
//! let ring = Arc::new(RingBuffer::new(|| 0i64, &RingBufferConfig::new(64).unwrap()).unwrap());
//! let total = Arc::new(AtomicI64::new(0));
//!
//! let mut topology = Topology::new(ring.clone());
//! let sum = total.clone();
//! let stage = topology
//!     .handle_events_with(vec![handler_fn(move |_, value: &i64, _| {
//!         sum.fetch_add(*value, Ordering::Relaxed);
//!         Ok(())
//!     })])
//!     .handle();
//! topology.start().unwrap();
//!
//! for i in 0..10 {
//!     let mut entry = ring.next_entry().unwrap();
//!     *entry = i;
//! }
//!
//! while stage.sequences()[0].get() < 9 {
//!     std::thread::yield_now();
//! }
//! topology.halt().unwrap();
//! assert_eq!(total.load(Ordering::Relaxed), 45);
//! ```

pub mod constants;
pub mod cpu;
pub mod disruptor;
pub mod error;

pub use disruptor::{
    BatchEventProcessor,
    DependencyBarrier,
    EventHandler,
    EventProcessor,
    RingBuffer,
    RingBufferConfig,
    Sequence,
    Topology,
};
pub use error::{ HandlerError, Result, RinglaneError };
