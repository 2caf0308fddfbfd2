//! The counters context: registration, updates, slot lifecycle and
//! aggregation.
//!
//! A [`Counters`] value is a cheap, clonable handle to one context. Most
//! programs use the process-wide instance from [`crate::global`], but a
//! context can also be built explicitly and passed around, which is what the
//! tests do.
//!
//! # Update routing
//!
//! ```text
//!   increment(h) ──► h == 0 or h > registered? ──► ignored
//!                         │
//!                         ▼
//!                 thread binding for this context
//!                 ├─ Live(slot)  ──► own block, plain load/store
//!                 ├─ Retired     ──► dead-thread accumulator, atomic
//!                 ├─ Shared      ──► shared block, atomic (SeqCst)
//!                 └─ none
//!                     ├─ startup thread, slot 0 free ──► bind slot 0
//!                     ├─ sharing allowed             ──► shared block
//!                     └─ otherwise                   ──► fatal
//! ```

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::block::Block;
use crate::config::CountersConfig;
use crate::error::{fatal, CounterError, OrFatal, Result};
use crate::registry::{CombineHandler, Handle, Registry, ThreadSelector};
use crate::report::ReportHandler;
use crate::slots::{Mode, SlotKind, SlotState, SlotTable, BINDINGS};
use crate::spinlock::SpinLock;

pub(crate) struct Inner {
    pub(crate) registry: Registry,
    table: SpinLock<SlotTable>,
    /// Bumped by formal initialization; stale thread bindings are ignored.
    epoch: AtomicU64,
    allow_shared: AtomicBool,
    initialized: AtomicBool,
    startup: ThreadId,
}

impl Inner {
    /// Releases the slot of a thread that exits while still holding it.
    pub(crate) fn release_on_exit(&self, slot: usize, block: &Arc<Block>) {
        let mut table = self.table.lock();
        let dead = Arc::clone(&table.dead);
        if let Some(entry) = table.slots.get_mut(slot) {
            if entry.state.in_use && Arc::ptr_eq(&entry.block, block) {
                entry.block.fold_into(&dead);
                entry.state.in_use = false;
                log::debug!("released slot {slot} of exiting thread");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(u64),
    Sub(u64),
    Set(u64),
}

impl Op {
    #[inline]
    fn apply_local(self, block: &Block, idx: usize) {
        match self {
            Op::Add(v) => block.local_add(idx, v),
            Op::Sub(v) => block.local_sub(idx, v),
            Op::Set(v) => block.local_set(idx, v),
        }
    }

    #[inline]
    fn apply_atomic(self, block: &Block, idx: usize) {
        match self {
            Op::Add(v) => block.atomic_add(idx, v),
            Op::Sub(v) => block.atomic_sub(idx, v),
            // Shared cells also hold other threads' counts.
            Op::Set(_) => {}
        }
    }

    #[inline]
    fn apply(self, mode: Mode, block: &Block, idx: usize) {
        match mode {
            Mode::Live(_) => self.apply_local(block, idx),
            Mode::Retired | Mode::Shared => self.apply_atomic(block, idx),
        }
    }
}

/// A registry of named counters with per-thread storage.
///
/// # Examples
///
/// ```rust
/// use conteggi::{Counters, CountersConfig};
/// use std::thread;
///
/// let counters = Counters::with_config(CountersConfig::new(600, 2, false));
/// let x = counters.register("x");
///
/// // The constructing thread owns slot 0 implicitly.
/// counters.increment(x);
///
/// let worker = counters.clone();
/// thread::spawn(move || {
///     worker.bind_static(1);
///     worker.add(x, 5);
///     worker.unbind_static(1);
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(counters.get(x), 6);
/// ```
#[derive(Clone)]
pub struct Counters {
    pub(crate) inner: Arc<Inner>,
}

impl Counters {
    /// Creates a soft-initialized context with the default limits.
    ///
    /// Counters can be registered and updated right away; a later call to
    /// [`initialize`](Self::initialize) sets the real limits and discards
    /// every count recorded so far.
    pub fn new() -> Self {
        Self::build(CountersConfig::default(), false)
    }

    /// Creates a formally initialized context.
    pub fn with_config(config: CountersConfig) -> Self {
        Self::build(config, true)
    }

    fn build(config: CountersConfig, initialized: bool) -> Self {
        Counters {
            inner: Arc::new(Inner {
                registry: Registry::new(config.max_counters),
                table: SpinLock::new(SlotTable::new(&config)),
                epoch: AtomicU64::new(0),
                allow_shared: AtomicBool::new(config.allow_shared),
                initialized: AtomicBool::new(initialized),
                startup: thread::current().id(),
            }),
        }
    }

    /// Formally initializes a soft context.
    ///
    /// Rebuilds the slot table for `config`, discarding all counts recorded
    /// before. If the calling thread holds static slot 0, it keeps it.
    ///
    /// # Panics
    ///
    /// On a second call, when more counters are registered than
    /// `config.max_counters`, or when other threads hold slots.
    pub fn initialize(&self, config: CountersConfig) {
        self.try_initialize(config).or_fatal()
    }

    /// Fallible version of [`initialize`](Self::initialize).
    pub fn try_initialize(&self, config: CountersConfig) -> Result<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            return Err(CounterError::AlreadyInitialized);
        }
        let caller = match self.current_mode() {
            Some(Mode::Live(slot)) => Some(slot),
            _ => None,
        };
        let mut next = SlotTable::new(&config);

        let (kept, epoch) = {
            let mut table = self.inner.table.lock();
            if self.inner.initialized.load(Ordering::Relaxed) {
                return Err(CounterError::AlreadyInitialized);
            }
            let busy = table
                .in_use_count()
                .saturating_sub(usize::from(caller.is_some()));
            if busy > 0 {
                return Err(CounterError::SlotsBusy(busy));
            }
            self.inner.registry.set_capacity(config.max_counters)?;

            let kept = match caller {
                Some(slot)
                    if table.state(slot).map(|s| s.kind) == Some(SlotKind::Static)
                        && slot < next.slots.len() =>
                {
                    Some((slot, next.bind_static(slot)?))
                }
                _ => None,
            };

            *table = next;
            let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            self.inner
                .allow_shared
                .store(config.allow_shared, Ordering::Release);
            self.inner.initialized.store(true, Ordering::Release);
            (kept, epoch)
        };

        if let Some((slot, block)) = kept {
            self.set_binding(epoch, Mode::Live(slot), block);
        }
        log::debug!(
            "counters initialized: {} counters, {} threads, shared {}",
            config.max_counters,
            config.max_threads,
            if config.allow_shared { "allowed" } else { "disabled" }
        );
        Ok(())
    }

    /// Returns `true` once [`initialize`](Self::initialize) has run, or if the
    /// context was built with [`with_config`](Self::with_config).
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    // Registration

    /// Registers a counter.
    ///
    /// # Panics
    ///
    /// If the name is already registered or the capacity is exhausted.
    pub fn register(&self, name: &str) -> Handle {
        self.try_register(name).or_fatal()
    }

    /// Fallible version of [`register`](Self::register).
    pub fn try_register(&self, name: &str) -> Result<Handle> {
        self.inner.registry.register(name, None, None)
    }

    /// Registers a counter whose aggregated value comes from `handler`.
    pub fn register_with_combine<C>(&self, name: &str, handler: C) -> Handle
    where
        C: CombineHandler + 'static,
    {
        self.try_register_with_combine(name, handler).or_fatal()
    }

    /// Fallible version of [`register_with_combine`](Self::register_with_combine).
    pub fn try_register_with_combine<C>(&self, name: &str, handler: C) -> Result<Handle>
    where
        C: CombineHandler + 'static,
    {
        self.inner
            .registry
            .register(name, Some(Arc::new(handler)), None)
    }

    /// Registers a counter reported through `handler` by
    /// [`walk_subtree`](Self::walk_subtree).
    pub fn register_with_custom_report<R>(&self, name: &str, handler: R) -> Handle
    where
        R: ReportHandler + 'static,
    {
        self.try_register_with_custom_report(name, handler)
            .or_fatal()
    }

    /// Fallible version of
    /// [`register_with_custom_report`](Self::register_with_custom_report).
    pub fn try_register_with_custom_report<R>(&self, name: &str, handler: R) -> Result<Handle>
    where
        R: ReportHandler + 'static,
    {
        self.inner
            .registry
            .register(name, None, Some(Arc::new(handler)))
    }

    /// Returns the handle of `name`, registering it if needed.
    ///
    /// # Panics
    ///
    /// If the capacity is exhausted.
    pub fn register_or_lookup(&self, name: &str) -> Handle {
        if let Some(handle) = self.lookup(name) {
            return handle;
        }
        match self.try_register(name) {
            Err(CounterError::DuplicateName(name)) => self
                .lookup(&name)
                .unwrap_or_else(|| fatal(CounterError::DuplicateName(name))),
            result => result.or_fatal(),
        }
    }

    /// Finds a registered counter by name.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.inner.registry.lookup(name)
    }

    /// Returns the name a handle was registered with.
    pub fn name_of(&self, handle: Handle) -> Option<Arc<str>> {
        self.inner.registry.name_of(handle)
    }

    /// Returns `true` if `0 < handle <= count_registered()`.
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.inner.registry.is_valid(handle)
    }

    /// Number of registered counters.
    pub fn count_registered(&self) -> usize {
        self.inner.registry.count()
    }

    /// Maximum number of counters.
    pub fn max_counters(&self) -> usize {
        self.inner.registry.capacity()
    }

    /// Returns the `n`-th handle in name order.
    pub fn nth_sorted(&self, n: usize) -> Option<Handle> {
        self.inner.registry.nth_sorted(n)
    }

    // Updates

    /// Adds one to a counter.
    #[inline]
    pub fn increment(&self, handle: Handle) {
        self.update(handle, Op::Add(1));
    }

    /// Subtracts one from a counter, wrapping below zero.
    #[inline]
    pub fn decrement(&self, handle: Handle) {
        self.update(handle, Op::Sub(1));
    }

    /// Adds `value` to a counter, wrapping on overflow.
    #[inline]
    pub fn add(&self, handle: Handle, value: u64) {
        self.update(handle, Op::Add(value));
    }

    /// Subtracts `value` from a counter, wrapping below zero.
    #[inline]
    pub fn sub(&self, handle: Handle, value: u64) {
        self.update(handle, Op::Sub(value));
    }

    /// Clears the calling thread's own block for a counter.
    ///
    /// Only a thread holding a slot has a share of its own. From a thread
    /// without one (unbound, or after a release) this is a no-op: the
    /// shared block and the dead-thread accumulator also hold the counts of
    /// other threads.
    #[inline]
    pub fn zero(&self, handle: Handle) {
        self.update(handle, Op::Set(0));
    }

    #[inline]
    fn update(&self, handle: Handle, op: Op) {
        let idx = handle.index();
        if idx == 0 || idx > self.inner.registry.count() {
            return;
        }
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let bound = BINDINGS.try_with(|bindings| {
            bindings
                .with_current(&self.inner, epoch, |b| op.apply(b.mode, &b.block, idx))
                .is_some()
        });
        match bound {
            Ok(true) => {}
            Ok(false) => self.update_unbound(idx, op),
            Err(_) => self.update_exiting(idx, op),
        }
    }

    #[cold]
    fn update_unbound(&self, idx: usize, op: Op) {
        if thread::current().id() == self.inner.startup {
            let bound = {
                let mut table = self.inner.table.lock();
                let epoch = self.inner.epoch.load(Ordering::Relaxed);
                table.bind_static(0).ok().map(|block| (block, epoch))
            };
            if let Some((block, epoch)) = bound {
                log::debug!("startup thread bound to slot 0");
                op.apply_local(&block, idx);
                self.set_binding(epoch, Mode::Live(0), block);
                return;
            }
        }

        if !self.inner.allow_shared.load(Ordering::Acquire) {
            fatal(CounterError::SharedDisallowed);
        }
        let (shared, epoch) = {
            let table = self.inner.table.lock();
            (
                Arc::clone(&table.shared),
                self.inner.epoch.load(Ordering::Relaxed),
            )
        };
        op.apply_atomic(&shared, idx);
        self.set_binding(epoch, Mode::Shared, shared);
    }

    /// Updates from a thread whose thread-local storage is already torn down
    /// land in the accumulator.
    #[cold]
    fn update_exiting(&self, idx: usize, op: Op) {
        let dead = Arc::clone(&self.inner.table.lock().dead);
        op.apply_atomic(&dead, idx);
    }

    // Thread slots

    fn current_mode(&self) -> Option<Mode> {
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        BINDINGS
            .try_with(|bindings| bindings.mode(&self.inner, epoch))
            .ok()
            .flatten()
    }

    fn set_binding(&self, epoch: u64, mode: Mode, block: Arc<Block>) {
        if BINDINGS
            .try_with(|bindings| bindings.set(&self.inner, epoch, mode, block))
            .is_err()
        {
            log::warn!("thread-local bindings unavailable, {mode:?} binding dropped");
        }
    }

    /// Fails if the calling thread already holds a slot, or if its
    /// thread-local storage is gone and a binding could not be recorded.
    fn check_unbound(&self) -> Result<()> {
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        match BINDINGS.try_with(|bindings| bindings.mode(&self.inner, epoch)) {
            Err(_) => Err(CounterError::ThreadExiting),
            Ok(Some(Mode::Live(slot))) => Err(CounterError::ThreadAlreadyBound(slot)),
            Ok(_) => Ok(()),
        }
    }

    /// Slot held by the calling thread, if any.
    pub fn current_slot(&self) -> Option<usize> {
        match self.current_mode() {
            Some(Mode::Live(slot)) => Some(slot),
            _ => None,
        }
    }

    /// State of `slot`, or `None` beyond the table.
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.inner.table.lock().state(slot)
    }

    /// Number of slots in the table, static and dynamic.
    pub fn capacity(&self) -> usize {
        self.inner.table.lock().slots.len()
    }

    /// Number of dynamic slots reserved and not in use.
    pub fn available_dynamic(&self) -> usize {
        self.inner.table.lock().available_dynamic()
    }

    /// Binds the calling thread to a caller-chosen static slot.
    ///
    /// # Panics
    ///
    /// If the slot is out of range, dynamic or in use, or if the thread
    /// already holds a slot.
    pub fn bind_static(&self, slot: usize) {
        self.try_bind_static(slot).or_fatal()
    }

    /// Fallible version of [`bind_static`](Self::bind_static).
    pub fn try_bind_static(&self, slot: usize) -> Result<()> {
        self.check_unbound()?;
        let (block, epoch) = {
            let mut table = self.inner.table.lock();
            (
                table.bind_static(slot)?,
                self.inner.epoch.load(Ordering::Relaxed),
            )
        };
        self.set_binding(epoch, Mode::Live(slot), block);
        log::debug!("thread bound to static slot {slot}");
        Ok(())
    }

    /// Releases a static slot held by the calling thread.
    ///
    /// The slot's counts are folded into the dead-thread accumulator, and
    /// further updates from this thread land there too.
    ///
    /// # Panics
    ///
    /// If the calling thread does not hold `slot` as a static slot.
    pub fn unbind_static(&self, slot: usize) {
        self.try_unbind_static(slot).or_fatal()
    }

    /// Fallible version of [`unbind_static`](Self::unbind_static).
    pub fn try_unbind_static(&self, slot: usize) -> Result<()> {
        self.release_held(slot, SlotKind::Static)?;
        log::debug!("thread unbound from static slot {slot}");
        Ok(())
    }

    /// Reserves `n` more dynamic slots, growing the slot table if needed.
    ///
    /// Reservations add up: every call promises `n` slots to the threads
    /// about to call [`acquire_dynamic`](Self::acquire_dynamic), on top of
    /// the slots promised by earlier calls and not yet acquired.
    pub fn reserve_dynamic(&self, n: usize) {
        loop {
            let (deficit, block_len) = {
                let table = self.inner.table.lock();
                (table.reserve_deficit(n), table.block_len)
            };

            let blocks: Vec<_> = (0..deficit)
                .map(|_| Arc::new(Block::new(block_len)))
                .collect();

            let mut table = self.inner.table.lock();
            let missing = table.reserve_deficit(n);
            if table.block_len == block_len && missing <= blocks.len() {
                if missing > 0 {
                    let before = table.slots.len();
                    table.grow(blocks.into_iter().take(missing).collect());
                    log::debug!("slot table grown from {before} to {} slots", table.slots.len());
                }
                table.reserved += n;
                return;
            }
        }
    }

    /// Claims a reserved dynamic slot for the calling thread.
    ///
    /// # Panics
    ///
    /// If no dynamic slot is available or the thread already holds a slot.
    pub fn acquire_dynamic(&self) -> usize {
        self.try_acquire_dynamic().or_fatal()
    }

    /// Fallible version of [`acquire_dynamic`](Self::acquire_dynamic).
    pub fn try_acquire_dynamic(&self) -> Result<usize> {
        self.check_unbound()?;
        let (slot, block, epoch) = {
            let mut table = self.inner.table.lock();
            let (slot, block) = table.acquire_dynamic()?;
            (slot, block, self.inner.epoch.load(Ordering::Relaxed))
        };
        self.set_binding(epoch, Mode::Live(slot), block);
        log::debug!("thread acquired dynamic slot {slot}");
        Ok(slot)
    }

    /// Releases a dynamic slot held by the calling thread, returning it to
    /// the pool.
    ///
    /// # Panics
    ///
    /// If the calling thread does not hold `slot` as a dynamic slot.
    pub fn release_dynamic(&self, slot: usize) {
        self.try_release_dynamic(slot).or_fatal()
    }

    /// Fallible version of [`release_dynamic`](Self::release_dynamic).
    pub fn try_release_dynamic(&self, slot: usize) -> Result<()> {
        self.release_held(slot, SlotKind::Dynamic)?;
        log::debug!("thread released dynamic slot {slot}");
        Ok(())
    }

    fn release_held(&self, slot: usize, kind: SlotKind) -> Result<()> {
        if self.current_mode() != Some(Mode::Live(slot)) {
            return Err(CounterError::SlotNotHeld(slot));
        }
        let (dead, epoch) = {
            let mut table = self.inner.table.lock();
            (
                table.release(slot, kind)?,
                self.inner.epoch.load(Ordering::Relaxed),
            )
        };
        self.set_binding(epoch, Mode::Retired, dead);
        Ok(())
    }

    // Aggregation

    /// Writes the aggregated value of every counter into `out`, indexed by
    /// handle.
    ///
    /// `out` is cleared first; counters beyond its length are skipped.
    /// Counters with a combine handler get the handler's value instead of
    /// the sum.
    pub fn combine(&self, out: &mut [u64], selector: ThreadSelector) {
        out.fill(0);
        self.inner.table.lock().accumulate(out, selector);
        for (handle, handler) in self.inner.registry.combine_handlers() {
            if let Some(value) = out.get_mut(handle.index()) {
                *value = handler.combine(selector);
            }
        }
    }

    /// Returns the value of a counter across all threads.
    ///
    /// The invalid handle always reads 0.
    pub fn get(&self, handle: Handle) -> u64 {
        self.get_for(handle, ThreadSelector::All)
    }

    /// Returns the value of a counter for `selector`.
    pub fn get_for(&self, handle: Handle, selector: ThreadSelector) -> u64 {
        if !self.is_valid(handle) {
            return 0;
        }
        if let Some(handler) = self.inner.registry.combine_handler(handle) {
            return handler.combine(selector);
        }
        self.inner.table.lock().sum_cell(handle.index(), selector)
    }

    /// Aggregates every counter into an owned [`Totals`].
    pub fn snapshot(&self, selector: ThreadSelector) -> Totals {
        let mut values = vec![0; self.count_registered() + 1];
        self.combine(&mut values, selector);
        Totals { values }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters")
            .field("registry", &self.inner.registry)
            .field("initialized", &self.is_initialized())
            .field("slots", &self.capacity())
            .finish()
    }
}

/// Aggregated values of all counters, indexed by handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totals {
    values: Vec<u64>,
}

impl Totals {
    /// Value of `handle`; 0 for the invalid handle or unknown handles.
    pub fn get(&self, handle: Handle) -> u64 {
        if handle.is_invalid() {
            return 0;
        }
        self.values.get(handle.index()).copied().unwrap_or(0)
    }

    /// Iterates `(handle, value)` pairs in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, u64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, v)| (Handle::from_raw(i as u32), *v))
    }

    /// Values indexed by handle; index 0 is always 0.
    pub fn as_slice(&self) -> &[u64] {
        &self.values
    }
}
