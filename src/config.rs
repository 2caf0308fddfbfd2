//! Sizing and policy of a counters context.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of counters a soft-initialized context can hold.
pub const SOFT_MAX_COUNTERS: usize = 1024;

/// Number of thread slots of a soft-initialized context (the startup thread).
pub const SOFT_MAX_THREADS: usize = 1;

/// Capacity and sharing policy passed to [`Counters::initialize`].
///
/// The default describes the "soft" configuration used when counters are
/// touched before formal initialization: room for [`SOFT_MAX_COUNTERS`]
/// counters, a single slot for the startup thread, and shared counters
/// enabled so that any other thread still lands somewhere safe.
///
/// # Examples
///
/// ```rust
/// use conteggi::CountersConfig;
///
/// let config = CountersConfig::default()
///     .with_max_counters(600)
///     .with_max_threads(2)
///     .with_allow_shared(false);
///
/// assert_eq!(config, CountersConfig::new(600, 2, false));
/// ```
///
/// [`Counters::initialize`]: crate::Counters::initialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CountersConfig {
    /// Maximum number of counters that can be registered.
    pub max_counters: usize,
    /// Number of slots created up front; slot numbers `0..max_threads` are
    /// available to [`Counters::bind_static`](crate::Counters::bind_static).
    pub max_threads: usize,
    /// Whether threads without a slot may update the shared block.
    pub allow_shared: bool,
}

impl CountersConfig {
    /// Creates a configuration with explicit limits.
    pub const fn new(max_counters: usize, max_threads: usize, allow_shared: bool) -> Self {
        Self {
            max_counters,
            max_threads,
            allow_shared,
        }
    }

    /// Sets the maximum number of counters.
    pub const fn with_max_counters(self, max_counters: usize) -> Self {
        Self {
            max_counters,
            ..self
        }
    }

    /// Sets the number of pre-allocated thread slots.
    pub const fn with_max_threads(self, max_threads: usize) -> Self {
        Self {
            max_threads,
            ..self
        }
    }

    /// Enables or disables the shared fallback block.
    pub const fn with_allow_shared(self, allow_shared: bool) -> Self {
        Self {
            allow_shared,
            ..self
        }
    }

    /// Slot count actually allocated: slot 0 always exists.
    pub(crate) fn slot_count(&self) -> usize {
        self.max_threads.max(1)
    }
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self::new(SOFT_MAX_COUNTERS, SOFT_MAX_THREADS, true)
    }
}
