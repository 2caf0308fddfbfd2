//! The process-wide counters context.
//!
//! The context is created on first use in its soft configuration, so
//! counters can be registered and bumped during early startup. The hosting
//! process then calls [`initialize`] once with the real limits; counts
//! recorded before that call are discarded.
//!
//! The thread that first touches the context is its startup thread and
//! implicitly owns slot 0.
//!
//! # Example
//!
//! ```rust
//! use conteggi::global;
//!
//! let requests = global::register("requests");
//! global::initialize(600, 4, true);
//!
//! global::increment(requests);
//! assert_eq!(global::get(requests), 1);
//! ```

use std::sync::{Arc, OnceLock};

use crate::config::CountersConfig;
use crate::counters::{Counters, Totals};
use crate::registry::{CombineHandler, Handle, ThreadSelector};
use crate::report::{ReportHandler, WalkFlags};

static GLOBAL: OnceLock<Counters> = OnceLock::new();

/// Returns the process-wide context, soft-initializing it on first use.
pub fn counters() -> &'static Counters {
    GLOBAL.get_or_init(Counters::new)
}

/// Formally initializes the process-wide context.
///
/// # Panics
///
/// If called twice; see [`Counters::initialize`].
pub fn initialize(max_counters: usize, max_threads: usize, allow_shared: bool) {
    counters().initialize(CountersConfig::new(max_counters, max_threads, allow_shared));
}

/// See [`Counters::register`].
pub fn register(name: &str) -> Handle {
    counters().register(name)
}

/// See [`Counters::register_with_combine`].
pub fn register_with_combine<C>(name: &str, handler: C) -> Handle
where
    C: CombineHandler + 'static,
{
    counters().register_with_combine(name, handler)
}

/// See [`Counters::register_with_custom_report`].
pub fn register_with_custom_report<R>(name: &str, handler: R) -> Handle
where
    R: ReportHandler + 'static,
{
    counters().register_with_custom_report(name, handler)
}

/// See [`Counters::increment`].
#[inline]
pub fn increment(handle: Handle) {
    counters().increment(handle);
}

/// See [`Counters::decrement`].
#[inline]
pub fn decrement(handle: Handle) {
    counters().decrement(handle);
}

/// See [`Counters::add`].
#[inline]
pub fn add(handle: Handle, value: u64) {
    counters().add(handle, value);
}

/// See [`Counters::sub`].
#[inline]
pub fn sub(handle: Handle, value: u64) {
    counters().sub(handle, value);
}

/// See [`Counters::zero`].
#[inline]
pub fn zero(handle: Handle) {
    counters().zero(handle);
}

/// See [`Counters::get`]. The invalid handle reads 0 without creating the
/// context.
pub fn get(handle: Handle) -> u64 {
    if handle.is_invalid() {
        return 0;
    }
    counters().get(handle)
}

/// See [`Counters::bind_static`].
pub fn bind_static(slot: usize) {
    counters().bind_static(slot);
}

/// See [`Counters::unbind_static`].
pub fn unbind_static(slot: usize) {
    counters().unbind_static(slot);
}

/// See [`Counters::reserve_dynamic`].
pub fn reserve_dynamic(n: usize) {
    counters().reserve_dynamic(n);
}

/// See [`Counters::acquire_dynamic`].
pub fn acquire_dynamic() -> usize {
    counters().acquire_dynamic()
}

/// See [`Counters::release_dynamic`].
pub fn release_dynamic(slot: usize) {
    counters().release_dynamic(slot);
}

/// See [`Counters::combine`].
pub fn combine(out: &mut [u64], selector: ThreadSelector) {
    counters().combine(out, selector);
}

/// See [`Counters::snapshot`].
pub fn snapshot(selector: ThreadSelector) -> Totals {
    counters().snapshot(selector)
}

/// See [`Counters::walk_subtree`].
pub fn walk_subtree<V>(prefix: &str, visitor: V, selector: ThreadSelector, flags: WalkFlags)
where
    V: FnMut(&str, &str),
{
    counters().walk_subtree(prefix, visitor, selector, flags);
}

/// See [`Counters::count_registered`].
pub fn count_registered() -> usize {
    counters().count_registered()
}

/// See [`Counters::is_valid`].
pub fn is_valid(handle: Handle) -> bool {
    counters().is_valid(handle)
}

/// See [`Counters::name_of`].
pub fn name_of(handle: Handle) -> Option<Arc<str>> {
    counters().name_of(handle)
}

/// See [`Counters::lookup`].
pub fn lookup(name: &str) -> Option<Handle> {
    counters().lookup(name)
}

/// See [`Counters::nth_sorted`].
pub fn nth_sorted(n: usize) -> Option<Handle> {
    counters().nth_sorted(n)
}
