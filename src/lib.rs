//! # Conteggi - Process-Wide Counter Registry
//!
//! A Rust library providing a registry of named 64-bit counters that any
//! thread can update at high frequency, and that can be aggregated at any
//! time across every thread, including threads that have already gone away.
//!
//! ## The Problem
//!
//! Counting in a multi-threaded process with a single atomic per counter
//! makes every update bounce the counter's cache line between cores. Giving
//! every thread its own copy fixes the writes, but raises two new questions:
//! where do the counts of a thread go when it exits, and what happens to
//! threads that never asked for storage?
//!
//! ## The Solution: Thread Slots
//!
//! Counters are registered once by name and receive a small integer
//! [`Handle`]. Storage is organized by **thread slot**: each slot owns a
//! block holding one cell per handle.
//!
//! ### Design Principles
//!
//! 1. **Private blocks**: a thread bound to a slot updates its own block with
//!    plain loads and stores; no other thread ever writes it.
//!
//! 2. **Two thread classes**: *static* slots are numbered by the caller for
//!    long-lived workers; *dynamic* slots are pooled for transient threads,
//!    and the pool grows on demand with [`Counters::reserve_dynamic`].
//!
//! 3. **Fold on release**: releasing a slot adds its block into a
//!    dead-thread accumulator and zeroes it, inside the same short critical
//!    section that aggregation uses, so no count is lost or seen twice.
//!
//! 4. **Shared fallback**: threads without a slot update a shared block with
//!    atomic read-modify-write, unless the context forbids it.
//!
//! 5. **Aggregation on read**: totals sum live blocks, the accumulator and the
//!    shared block. Counters with a [`CombineHandler`] report the handler's
//!    value instead, for gauges that are not sums.
//!
//! ```text
//!   ┌───────────────┐    register("net.rx") ──► Handle(1)
//!   │   Registry    │    register("net.tx") ──► Handle(2)
//!   └───────────────┘
//!   ┌───────────────┐
//!   │ slot 0 block  │ ◄── main thread (static)
//!   │ slot 1 block  │ ◄── worker (static)
//!   │ slot 2 block  │ ◄── pool thread (dynamic)
//!   ├───────────────┤
//!   │ accumulator   │ ◄── folded slots, retired threads
//!   │ shared block  │ ◄── unbound threads (atomic)
//!   └───────────────┘
//!           │
//!           ▼
//!     get / combine / walk_subtree
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use conteggi::{Counters, CountersConfig};
//! use std::thread;
//!
//! let counters = Counters::with_config(CountersConfig::new(64, 1, false));
//! let requests = counters.register("http.requests");
//! counters.reserve_dynamic(4);
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counters = counters.clone();
//!         thread::spawn(move || {
//!             let slot = counters.acquire_dynamic();
//!             for _ in 0..1000 {
//!                 counters.increment(requests);
//!             }
//!             counters.release_dynamic(slot);
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! assert_eq!(counters.get(requests), 4000);
//! ```
//!
//! ## Contract Violations
//!
//! Misuse (double initialization, exhausted capacity, releasing a slot the
//! thread does not hold, updating from an unbound thread when sharing is
//! disabled) is a programmer error: the plain operations panic with a
//! [`CounterError`] message. Every such operation has a `try_*` twin
//! returning the error instead.
//!
//! Handles out of range are ignored, and the zero [`Handle::INVALID`] is
//! always safe to read (it reads 0) and to update (nothing happens).
//!
//! ## Process-Wide Context
//!
//! The [`global`] module exposes one context for the whole process, usable
//! before [`global::initialize`] is called.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | [`snapshot`] module and `Serialize`/`Deserialize` for [`CountersConfig`] |
//! | `demo` | Builds the `walk` demo |
//!
//! ## Demo
//!
//! The demo sources live in `demos/` rather than `examples/`:
//!
//! ```bash
//! cargo run --example walk --features demo -- --skip-zero
//! ```

mod block;
mod spinlock;

pub mod config;
pub mod counters;
pub mod error;
pub mod global;
pub mod memory;
pub mod registry;
pub mod report;
pub mod slots;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use config::CountersConfig;
pub use counters::{Counters, Totals};
pub use error::CounterError;
pub use registry::{CombineHandler, Handle, ThreadSelector};
pub use report::{ReportHandler, WalkFlags, WalkQuery};
pub use slots::{SlotKind, SlotState};
