//! Name table of registered counters.
//!
//! The registry maps a counter name to a small integer [`Handle`] and keeps a
//! second index sorted by name for deterministic enumeration. Entries are
//! append-only: once registered, a counter keeps its handle and name for the
//! lifetime of its context.
//!
//! The mutators never look at the registry tables; they only read the
//! registered count, an atomic published after each registration.

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CounterError, Result};
use crate::report::ReportHandler;

/// Opaque identifier of a registered counter.
///
/// Handles are assigned from 1 upwards. The zero value, which is also the
/// [`Default`], is the reserved [`Handle::INVALID`]: reading it yields 0 and
/// updating it does nothing, so a handle variable that was never assigned is
/// always safe to use.
///
/// ```rust
/// use conteggi::Handle;
///
/// let h = Handle::default();
/// assert!(h.is_invalid());
/// assert_eq!(h, Handle::INVALID);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// The reserved invalid handle.
    pub const INVALID: Handle = Handle(0);

    /// Builds a handle from its raw value.
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    /// Returns the raw value of the handle.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for the reserved invalid handle.
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which thread data an aggregation covers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSelector {
    /// Every live slot, the dead-thread accumulator and the shared block.
    #[default]
    All,
    /// A single slot.
    Slot(usize),
    /// Only the shared block.
    Shared,
}

/// Replaces summation for counters whose value is not additive across
/// threads, such as a live memory gauge read from an allocator.
///
/// Any `Fn(ThreadSelector) -> u64` closure is a combine handler.
///
/// ```rust
/// use conteggi::{Counters, ThreadSelector};
///
/// let counters = Counters::new();
/// let h = counters.register_with_combine("pool.size", |_: ThreadSelector| 42u64);
/// counters.add(h, 5);
/// assert_eq!(counters.get(h), 42);
/// ```
pub trait CombineHandler: Send + Sync {
    /// Returns the value reported for `selector`.
    fn combine(&self, selector: ThreadSelector) -> u64;
}

impl<F> CombineHandler for F
where
    F: Fn(ThreadSelector) -> u64 + Send + Sync,
{
    fn combine(&self, selector: ThreadSelector) -> u64 {
        self(selector)
    }
}

struct Entry {
    name: Arc<str>,
    combine: Option<Arc<dyn CombineHandler>>,
    report: Option<Arc<dyn ReportHandler>>,
}

struct Tables {
    capacity: usize,
    entries: Vec<Entry>,
    /// Handles ordered by name.
    sorted: Vec<Handle>,
}

impl Tables {
    fn entry(&self, handle: Handle) -> Option<&Entry> {
        handle
            .index()
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
    }

    fn search(&self, name: &str) -> std::result::Result<usize, usize> {
        self.sorted
            .binary_search_by(|h| self.entries[h.index() - 1].name.as_ref().cmp(name))
    }
}

/// A counter as seen by the reporting walk.
pub(crate) struct SortedEntry {
    pub(crate) handle: Handle,
    pub(crate) name: Arc<str>,
    pub(crate) report: Option<Arc<dyn ReportHandler>>,
}

pub(crate) struct Registry {
    registered: AtomicUsize,
    tables: RwLock<Tables>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Registry {
            registered: AtomicUsize::new(0),
            tables: RwLock::new(Tables {
                capacity,
                entries: Vec::new(),
                sorted: Vec::new(),
            }),
        }
    }

    /// Number of registered counters; the largest valid handle.
    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_valid(&self, handle: Handle) -> bool {
        !handle.is_invalid() && handle.index() <= self.count()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.tables.read().capacity
    }

    /// Changes the capacity; fails if more counters are already registered.
    pub(crate) fn set_capacity(&self, capacity: usize) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.entries.len() > capacity {
            return Err(CounterError::CapacityExhausted { capacity });
        }
        tables.capacity = capacity;
        Ok(())
    }

    pub(crate) fn register(
        &self,
        name: &str,
        combine: Option<Arc<dyn CombineHandler>>,
        report: Option<Arc<dyn ReportHandler>>,
    ) -> Result<Handle> {
        let mut tables = self.tables.write();
        let pos = match tables.search(name) {
            Ok(_) => return Err(CounterError::DuplicateName(name.to_string())),
            Err(pos) => pos,
        };
        if tables.entries.len() >= tables.capacity || tables.entries.len() >= u32::MAX as usize {
            return Err(CounterError::CapacityExhausted {
                capacity: tables.capacity,
            });
        }

        tables.entries.push(Entry {
            name: Arc::from(name),
            combine,
            report,
        });
        let handle = Handle(tables.entries.len() as u32);
        tables.sorted.insert(pos, handle);
        self.registered.store(tables.entries.len(), Ordering::Release);

        log::trace!("registered counter `{name}` as {handle}");
        Ok(handle)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Handle> {
        let tables = self.tables.read();
        tables.search(name).ok().map(|pos| tables.sorted[pos])
    }

    pub(crate) fn name_of(&self, handle: Handle) -> Option<Arc<str>> {
        self.tables.read().entry(handle).map(|e| Arc::clone(&e.name))
    }

    pub(crate) fn nth_sorted(&self, n: usize) -> Option<Handle> {
        self.tables.read().sorted.get(n).copied()
    }

    pub(crate) fn combine_handlers(&self) -> Vec<(Handle, Arc<dyn CombineHandler>)> {
        let tables = self.tables.read();
        tables
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                e.combine
                    .as_ref()
                    .map(|c| (Handle(i as u32 + 1), Arc::clone(c)))
            })
            .collect()
    }

    pub(crate) fn combine_handler(&self, handle: Handle) -> Option<Arc<dyn CombineHandler>> {
        self.tables.read().entry(handle).and_then(|e| e.combine.clone())
    }

    pub(crate) fn sorted_entries(&self) -> Vec<SortedEntry> {
        let tables = self.tables.read();
        tables
            .sorted
            .iter()
            .map(|&handle| {
                let e = &tables.entries[handle.index() - 1];
                SortedEntry {
                    handle,
                    name: Arc::clone(&e.name),
                    report: e.report.clone(),
                }
            })
            .collect()
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("Registry")
            .field("capacity", &tables.capacity)
            .field(
                "names",
                &tables.entries.iter().map(|e| &*e.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
