//! Contract violations of the counters registry.
//!
//! Every way of misusing the registry is a variant of [`CounterError`]. The
//! `try_*` operations return them as values; the plain operations treat them
//! as programmer errors and stop through [`fatal`], keeping the hot paths
//! free of `Result` plumbing.
//!
//! # Example
//!
//! ```rust
//! use conteggi::{Counters, CountersConfig, CounterError};
//!
//! let counters = Counters::with_config(CountersConfig::new(8, 1, true));
//! counters.register("requests");
//!
//! let err = counters.try_register("requests").unwrap_err();
//! assert!(matches!(err, CounterError::DuplicateName(_)));
//! ```

use thiserror::Error;

/// Errors raised when the registry is used outside of its contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    /// `initialize` was called on a context that is already formally initialized.
    #[error("counters already initialized")]
    AlreadyInitialized,

    /// A counter with this name is already registered.
    #[error("counter `{0}` already registered")]
    DuplicateName(String),

    /// No room for another counter.
    #[error("counter capacity exhausted ({capacity} counters)")]
    CapacityExhausted {
        /// Configured maximum number of counters.
        capacity: usize,
    },

    /// The slot index is beyond the slot table.
    #[error("slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange {
        /// Requested slot.
        slot: usize,
        /// Current number of slots.
        capacity: usize,
    },

    /// Another thread holds the slot.
    #[error("slot {0} already in use")]
    SlotInUse(usize),

    /// The calling thread does not hold the slot it tries to release.
    #[error("slot {0} is not held by the calling thread")]
    SlotNotHeld(usize),

    /// A static operation on a dynamic slot, or the other way round.
    #[error("slot {0} is reserved for a different thread class")]
    SlotKindMismatch(usize),

    /// The calling thread already holds a slot on this context.
    #[error("thread already bound to slot {0}")]
    ThreadAlreadyBound(usize),

    /// `acquire_dynamic` found no reserved dynamic slot.
    #[error("no dynamic slot available, reserve_dynamic first")]
    NoDynamicSlot,

    /// An unbound thread updated a counter while shared counters are disabled.
    #[error("shared counters are disabled and the calling thread has no slot")]
    SharedDisallowed,

    /// The calling thread's thread-local storage is already torn down, so a
    /// slot could not be bound to it.
    #[error("thread-local storage of the calling thread is gone")]
    ThreadExiting,

    /// Formal initialization found slots bound by other threads.
    #[error("cannot initialize while {0} slot(s) are in use by other threads")]
    SlotsBusy(usize),
}

/// Result type for the `try_*` operations.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Stops on a contract violation.
///
/// Logs the error and panics with its message. Building with
/// `panic = "abort"` turns this into a process abort.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(err: CounterError) -> ! {
    log::error!("counters contract violation: {err}");
    panic!("{err}")
}

/// Unwraps a `try_*` result or stops through [`fatal`].
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    #[inline]
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(v) => v,
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            CounterError::DuplicateName("x".to_string()).to_string(),
            "counter `x` already registered"
        );
        assert_eq!(
            CounterError::SlotOutOfRange { slot: 4, capacity: 2 }.to_string(),
            "slot 4 out of range (capacity 2)"
        );
    }

    #[test]
    #[should_panic(expected = "slot 3 already in use")]
    fn test_fatal_panics_with_message() {
        fatal(CounterError::SlotInUse(3));
    }

    #[test]
    fn test_or_fatal_ok() {
        let r: Result<u32> = Ok(7);
        assert_eq!(r.or_fatal(), 7);
    }
}
