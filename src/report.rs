//! Walking counters by dot-delimited namespace.
//!
//! [`Counters::walk_subtree`] aggregates once, then visits counters in name
//! order. A counter belongs to the namespace `prefix` when its name equals
//! the prefix or continues it after a `.`:
//!
//! ```text
//!   prefix "memory"   memory          ✓
//!                     memory.bytes    ✓
//!                     memory2.bytes   ✗
//! ```
//!
//! Plain counters are passed to the visitor as `(name, decimal value)`.
//! Counters registered with a [`ReportHandler`] produce their own lines,
//! which lets one stored counter expand into computed sub-metrics.
//!
//! # Example
//!
//! ```rust
//! use conteggi::{Counters, ThreadSelector, WalkFlags};
//!
//! let counters = Counters::new();
//! let rx = counters.register("net.rx");
//! counters.register("net.tx");
//! counters.register("disk.reads");
//! counters.add(rx, 3);
//!
//! let mut lines = Vec::new();
//! counters.walk_subtree(
//!     "net",
//!     |name, value| lines.push(format!("{name}={value}")),
//!     ThreadSelector::All,
//!     WalkFlags::NONE,
//! );
//! assert_eq!(lines, ["net.rx=3", "net.tx=0"]);
//! ```

use std::ops::BitOr;

use crate::counters::Counters;
use crate::registry::ThreadSelector;

/// Options of a reporting walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalkFlags(u8);

impl WalkFlags {
    /// No options.
    pub const NONE: WalkFlags = WalkFlags(0);
    /// Skip plain counters whose value is 0.
    pub const SKIP_ZERO: WalkFlags = WalkFlags(1);
    /// Ignore report handlers and print the stored value of every counter.
    pub const RAW: WalkFlags = WalkFlags(1 << 1);

    /// Returns `true` if all flags of `other` are set.
    pub const fn contains(self, other: WalkFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WalkFlags {
    type Output = WalkFlags;

    fn bitor(self, rhs: WalkFlags) -> WalkFlags {
        WalkFlags(self.0 | rhs.0)
    }
}

/// The walk a [`ReportHandler`] is called from.
#[derive(Debug, Clone, Copy)]
pub struct WalkQuery<'a> {
    /// Namespace being walked.
    pub prefix: &'a str,
    /// Thread data the values were aggregated from.
    pub selector: ThreadSelector,
    /// Options of the walk.
    pub flags: WalkFlags,
}

impl WalkQuery<'_> {
    /// Returns `true` if `name` lies in the walked namespace.
    pub fn matches(&self, name: &str) -> bool {
        in_namespace(name, self.prefix)
    }
}

/// Custom formatting of a counter during a walk.
///
/// The handler is called when its counter lies in the walked namespace, and
/// also when the walked namespace lies below the counter's name, so that a
/// handler exposing `memory.arena.peak` can answer a walk of that exact
/// prefix from a counter named `memory.arena`.
pub trait ReportHandler: Send + Sync {
    /// Emits zero or more `(name, value)` lines through `visitor`.
    fn report(
        &self,
        name: &str,
        value: u64,
        query: &WalkQuery<'_>,
        visitor: &mut dyn FnMut(&str, &str),
    );
}

impl<F> ReportHandler for F
where
    F: Fn(&str, u64, &WalkQuery<'_>, &mut dyn FnMut(&str, &str)) + Send + Sync,
{
    fn report(
        &self,
        name: &str,
        value: u64,
        query: &WalkQuery<'_>,
        visitor: &mut dyn FnMut(&str, &str),
    ) {
        self(name, value, query, visitor)
    }
}

/// Returns `true` if `name` is `prefix` or a dotted descendant of it.
///
/// An empty prefix matches everything; a trailing `.` is ignored.
pub fn in_namespace(name: &str, prefix: &str) -> bool {
    let prefix = prefix.strip_suffix('.').unwrap_or(prefix);
    if prefix.is_empty() {
        return true;
    }
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

impl Counters {
    /// Visits the counters of the namespace `prefix` in name order.
    ///
    /// Values are aggregated once for `selector` before the first visit.
    pub fn walk_subtree<V>(
        &self,
        prefix: &str,
        mut visitor: V,
        selector: ThreadSelector,
        flags: WalkFlags,
    ) where
        V: FnMut(&str, &str),
    {
        let totals = self.snapshot(selector);
        let query = WalkQuery {
            prefix,
            selector,
            flags,
        };

        for entry in self.inner.registry.sorted_entries() {
            let value = totals.get(entry.handle);
            let inside = in_namespace(&entry.name, prefix);
            match &entry.report {
                Some(handler)
                    if !flags.contains(WalkFlags::RAW)
                        && (inside || in_namespace(prefix, &entry.name)) =>
                {
                    handler.report(&entry.name, value, &query, &mut visitor);
                }
                _ if inside => {
                    if value == 0 && flags.contains(WalkFlags::SKIP_ZERO) {
                        continue;
                    }
                    visitor(&*entry.name, &value.to_string());
                }
                _ => {}
            }
        }
    }
}
