//! Serializable point-in-time captures of a counters context.
//!
//! # Feature Flag
//!
//! This module requires the `serde` feature:
//!
//! ```toml
//! [dependencies]
//! conteggi = { version = "0.1", features = ["serde"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use conteggi::snapshot::MetricsSnapshot;
//! use conteggi::{Counters, ThreadSelector};
//!
//! let counters = Counters::new();
//! let requests = counters.register("requests");
//! counters.add(requests, 42);
//!
//! let snapshot = MetricsSnapshot::capture(&counters, ThreadSelector::All);
//!
//! // Serialize with any serde-compatible format
//! let json = serde_json::to_string(&snapshot).unwrap();
//! ```

use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::registry::ThreadSelector;

/// A snapshot of a single counter.
///
/// # Examples
///
/// ```rust,ignore
/// use conteggi::snapshot::CounterSnapshot;
///
/// let snapshot = CounterSnapshot::new("requests", 42);
///
/// let json = serde_json::to_string(&snapshot).unwrap();
/// assert_eq!(json, r#"{"name":"requests","value":42}"#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// The name of the counter.
    pub name: String,
    /// The aggregated value of the counter.
    pub value: u64,
}

impl CounterSnapshot {
    /// Creates a new counter snapshot.
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// All counters of a context, in name order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Optional timestamp in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// The counter snapshots.
    pub counters: Vec<CounterSnapshot>,
}

impl MetricsSnapshot {
    /// Creates a new metrics snapshot with the given counters.
    pub fn new(counters: Vec<CounterSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            counters,
        }
    }

    /// Creates a new metrics snapshot with counters and a timestamp.
    pub fn with_timestamp(counters: Vec<CounterSnapshot>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            counters,
        }
    }

    /// Aggregates `counters` for `selector` and captures every counter in
    /// name order.
    pub fn capture(counters: &Counters, selector: ThreadSelector) -> Self {
        let totals = counters.snapshot(selector);
        let captured = (0..counters.count_registered())
            .filter_map(|n| counters.nth_sorted(n))
            .filter_map(|handle| {
                counters
                    .name_of(handle)
                    .map(|name| CounterSnapshot::new(&*name, totals.get(handle)))
            })
            .collect();
        Self::new(captured)
    }

    /// Same as [`capture`](Self::capture) with a timestamp.
    pub fn capture_with_timestamp(
        counters: &Counters,
        selector: ThreadSelector,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            ..Self::capture(counters, selector)
        }
    }

    /// Finds a counter by name.
    pub fn get(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.counters[i])
            .or_else(|| self.counters.iter().find(|c| c.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot_new() {
        let snapshot = CounterSnapshot::new("test", 42);
        assert_eq!(snapshot.name, "test");
        assert_eq!(snapshot.value, 42);
    }

    #[test]
    fn test_capture_in_name_order() {
        let counters = Counters::new();
        let b = counters.register("b");
        let a = counters.register("a");
        counters.add(a, 1);
        counters.add(b, 2);

        let snapshot = MetricsSnapshot::capture(&counters, ThreadSelector::All);

        assert_eq!(
            snapshot.counters,
            vec![CounterSnapshot::new("a", 1), CounterSnapshot::new("b", 2)]
        );
        assert!(snapshot.timestamp_ms.is_none());
        assert_eq!(snapshot.get("b").unwrap().value, 2);
        assert!(snapshot.get("c").is_none());
    }

    #[test]
    fn test_capture_shared_only() {
        let counters = Counters::new();
        let a = counters.register("a");
        counters.add(a, 5);

        let snapshot = MetricsSnapshot::capture(&counters, ThreadSelector::Shared);
        assert_eq!(snapshot.get("a").unwrap().value, 0);
    }

    #[test]
    fn test_capture_with_timestamp() {
        let counters = Counters::new();
        counters.register("a");
        let snapshot =
            MetricsSnapshot::capture_with_timestamp(&counters, ThreadSelector::All, 1234567890);
        assert_eq!(snapshot.timestamp_ms, Some(1234567890));
        assert_eq!(snapshot.counters.len(), 1);
    }

    #[test]
    fn test_metrics_snapshot_get_unsorted() {
        let snapshot = MetricsSnapshot::new(vec![
            CounterSnapshot::new("foo", 1),
            CounterSnapshot::new("bar", 2),
        ]);

        assert!(snapshot.get("foo").is_some());
        assert!(snapshot.get("bar").is_some());
        assert!(snapshot.get("baz").is_none());
    }

    #[test]
    fn test_serialize_counter_snapshot() {
        let snapshot = CounterSnapshot::new("test", 42);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"name":"test","value":42}"#);
    }

    #[test]
    fn test_serialize_metrics_snapshot() {
        let snapshot =
            MetricsSnapshot::with_timestamp(vec![CounterSnapshot::new("a", 1)], 1234567890);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("timestamp_ms"));
        assert!(json.contains("1234567890"));
    }

    #[test]
    fn test_deserialize_metrics_snapshot() {
        let json = r#"{"timestamp_ms":1234567890,"counters":[{"name":"a","value":1}]}"#;
        let snapshot: MetricsSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.timestamp_ms, Some(1234567890));
        assert_eq!(snapshot.counters, vec![CounterSnapshot::new("a", 1)]);
    }
}
