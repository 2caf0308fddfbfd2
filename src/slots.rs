//! Thread slots and the per-thread binding to them.
//!
//! # Architecture
//!
//! A context owns one [`SlotTable`] behind its aggregation lock. The table
//! holds a block per slot, the dead-thread accumulator and the shared block:
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 │          SlotTable (SpinLock)            │
//!                 ├──────────────────────────────────────────┤
//!   main ──────►  │ [0] STATIC  | IN_USE   ████ block        │
//!   worker ────►  │ [1] STATIC  | IN_USE   ████ block        │
//!                 │ [2] FREE               ████ block        │
//!   pool ──────►  │ [3] DYNAMIC | IN_USE   ████ block        │
//!                 │ [4] DYNAMIC            ████ block        │
//!                 ├──────────────────────────────────────────┤
//!   retired ───►  │ dead-thread accumulator ████             │
//!   unbound ───►  │ shared block            ████ (SeqCst)    │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! Blocks are reference counted and never freed while the table holds them;
//! growing the table copies the slot entries (not the blocks) into a larger
//! vector and swaps it in under the lock, so a bound thread keeps writing to
//! the same block across growth.
//!
//! # Thread bindings
//!
//! Each thread keeps, per context, a [`Binding`] in thread-local storage:
//! the block it writes to and why (`Live` slot owner, `Retired` after a
//! release, or `Shared` fallback). Bindings are stamped with the context's
//! epoch, bumped by formal initialization, so cached blocks from before it
//! are never written again.
//!
//! A thread that exits while still holding a slot releases it from the
//! thread-local destructor.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::block::Block;
use crate::config::CountersConfig;
use crate::counters::Inner;
use crate::error::{CounterError, Result};
use crate::registry::ThreadSelector;

/// Thread class a slot is reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Never claimed; can become static.
    Free,
    /// Caller-numbered slot for a long-lived thread.
    Static,
    /// Pool slot for transient threads.
    Dynamic,
}

/// State of a slot: its class and whether a thread currently holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotState {
    /// Thread class of the slot.
    pub kind: SlotKind,
    /// Whether a live thread holds the slot.
    pub in_use: bool,
}

impl SlotState {
    pub(crate) const FREE: SlotState = SlotState {
        kind: SlotKind::Free,
        in_use: false,
    };

    pub(crate) const DYNAMIC: SlotState = SlotState {
        kind: SlotKind::Dynamic,
        in_use: false,
    };
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SlotKind::Free => "FREE",
            SlotKind::Static => "STATIC",
            SlotKind::Dynamic => "DYNAMIC",
        };
        if self.in_use {
            write!(f, "{kind}|IN_USE")
        } else {
            write!(f, "{kind}")
        }
    }
}

#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) state: SlotState,
    pub(crate) block: Arc<Block>,
}

pub(crate) struct SlotTable {
    pub(crate) slots: Vec<Slot>,
    pub(crate) dead: Arc<Block>,
    pub(crate) shared: Arc<Block>,
    pub(crate) block_len: usize,
    /// Dynamic slots promised by `reserve_dynamic` and not yet acquired.
    pub(crate) reserved: usize,
}

impl SlotTable {
    pub(crate) fn new(config: &CountersConfig) -> Self {
        let block_len = config.max_counters + 1;
        let slots = (0..config.slot_count())
            .map(|_| Slot {
                state: SlotState::FREE,
                block: Arc::new(Block::new(block_len)),
            })
            .collect();
        SlotTable {
            slots,
            dead: Arc::new(Block::new(block_len)),
            shared: Arc::new(Block::new(block_len)),
            block_len,
            reserved: 0,
        }
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot> {
        let capacity = self.slots.len();
        self.slots
            .get_mut(slot)
            .ok_or(CounterError::SlotOutOfRange { slot, capacity })
    }

    pub(crate) fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub(crate) fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state.in_use).count()
    }

    pub(crate) fn available_dynamic(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::DYNAMIC)
            .count()
    }

    /// Marks a free or static slot as a static slot in use.
    pub(crate) fn bind_static(&mut self, slot: usize) -> Result<Arc<Block>> {
        let entry = self.slot_mut(slot)?;
        match entry.state {
            SlotState { in_use: true, .. } => Err(CounterError::SlotInUse(slot)),
            SlotState {
                kind: SlotKind::Dynamic,
                ..
            } => Err(CounterError::SlotKindMismatch(slot)),
            _ => {
                entry.state = SlotState {
                    kind: SlotKind::Static,
                    in_use: true,
                };
                Ok(Arc::clone(&entry.block))
            }
        }
    }

    /// Dynamic slots to add so that `n` more reservations can be honored.
    pub(crate) fn reserve_deficit(&self, n: usize) -> usize {
        (self.reserved + n).saturating_sub(self.available_dynamic())
    }

    /// Claims the lowest reserved dynamic slot, using up one reservation.
    pub(crate) fn acquire_dynamic(&mut self) -> Result<(usize, Arc<Block>)> {
        let (slot, entry) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state == SlotState::DYNAMIC)
            .ok_or(CounterError::NoDynamicSlot)?;
        entry.state.in_use = true;
        let block = Arc::clone(&entry.block);
        self.reserved = self.reserved.saturating_sub(1);
        Ok((slot, block))
    }

    /// Folds a held slot into the accumulator and clears `IN_USE`.
    ///
    /// Returns the accumulator, the new write target of the releasing thread.
    pub(crate) fn release(&mut self, slot: usize, kind: SlotKind) -> Result<Arc<Block>> {
        let dead = Arc::clone(&self.dead);
        let entry = self.slot_mut(slot)?;
        if entry.state.kind != kind {
            return Err(CounterError::SlotKindMismatch(slot));
        }
        if !entry.state.in_use {
            return Err(CounterError::SlotNotHeld(slot));
        }
        entry.block.fold_into(&dead);
        entry.state.in_use = false;
        Ok(dead)
    }

    /// Appends dynamic slots backed by `blocks`.
    ///
    /// The entries are copied into a new vector which replaces the current
    /// one; the old vector is dropped only after the swap.
    pub(crate) fn grow(&mut self, blocks: Vec<Arc<Block>>) {
        let mut slots = Vec::with_capacity(self.slots.len() + blocks.len());
        slots.extend(self.slots.iter().cloned());
        slots.extend(blocks.into_iter().map(|block| Slot {
            state: SlotState::DYNAMIC,
            block,
        }));
        let old = std::mem::replace(&mut self.slots, slots);
        drop(old);
    }

    /// Sums the blocks covered by `selector` into `out`.
    pub(crate) fn accumulate(&self, out: &mut [u64], selector: ThreadSelector) {
        match selector {
            ThreadSelector::All => {
                for slot in self.slots.iter().filter(|s| s.state.in_use) {
                    slot.block.accumulate_into(out);
                }
                self.dead.accumulate_into(out);
                self.shared.accumulate_into(out);
            }
            ThreadSelector::Slot(n) => {
                if let Some(slot) = self.slots.get(n) {
                    slot.block.accumulate_into(out);
                }
            }
            ThreadSelector::Shared => self.shared.accumulate_into(out),
        }
    }

    /// Same as [`accumulate`](Self::accumulate) for a single cell.
    pub(crate) fn sum_cell(&self, idx: usize, selector: ThreadSelector) -> u64 {
        match selector {
            ThreadSelector::All => self
                .slots
                .iter()
                .filter(|s| s.state.in_use)
                .fold(0u64, |acc, s| acc.wrapping_add(s.block.load(idx)))
                .wrapping_add(self.dead.load(idx))
                .wrapping_add(self.shared.load(idx)),
            ThreadSelector::Slot(n) => self.slots.get(n).map_or(0, |s| s.block.load(idx)),
            ThreadSelector::Shared => self.shared.load(idx),
        }
    }
}

/// What a thread's binding writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// The thread holds this slot and writes its block without atomics.
    Live(usize),
    /// The thread released its slot; writes land in the accumulator.
    Retired,
    /// The thread never had a slot; writes land in the shared block.
    Shared,
}

pub(crate) struct Binding {
    owner: Weak<Inner>,
    pub(crate) epoch: u64,
    pub(crate) mode: Mode,
    pub(crate) block: Arc<Block>,
}

impl Binding {
    fn is_for(&self, inner: &Arc<Inner>) -> bool {
        std::ptr::eq(Weak::as_ptr(&self.owner), Arc::as_ptr(inner))
    }
}

#[derive(Default)]
pub(crate) struct Bindings {
    entries: RefCell<Vec<Binding>>,
}

thread_local! {
    pub(crate) static BINDINGS: Bindings = Bindings::default();
}

impl Bindings {
    /// Runs `f` on the binding of `inner` stamped with `epoch`, if any.
    #[inline]
    pub(crate) fn with_current<R>(
        &self,
        inner: &Arc<Inner>,
        epoch: u64,
        f: impl FnOnce(&Binding) -> R,
    ) -> Option<R> {
        let entries = self.entries.borrow();
        entries
            .iter()
            .find(|b| b.epoch == epoch && b.is_for(inner))
            .map(f)
    }

    /// Returns the current mode for `inner`, ignoring stale epochs.
    pub(crate) fn mode(&self, inner: &Arc<Inner>, epoch: u64) -> Option<Mode> {
        self.with_current(inner, epoch, |b| b.mode)
    }

    /// Replaces the binding of `inner`.
    ///
    /// Entries of contexts that no longer exist are pruned on the way.
    pub(crate) fn set(&self, inner: &Arc<Inner>, epoch: u64, mode: Mode, block: Arc<Block>) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|b| b.owner.strong_count() > 0 && !b.is_for(inner));
        entries.push(Binding {
            owner: Arc::downgrade(inner),
            epoch,
            mode,
            block,
        });
    }
}

impl Drop for Bindings {
    fn drop(&mut self) {
        for binding in self.entries.get_mut().drain(..) {
            if let Mode::Live(slot) = binding.mode {
                if let Some(inner) = binding.owner.upgrade() {
                    inner.release_on_exit(slot, &binding.block);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(threads: usize) -> SlotTable {
        SlotTable::new(&CountersConfig::new(4, threads, true))
    }

    #[test]
    fn test_new_table() {
        let table = table(3);
        assert_eq!(table.slots.len(), 3);
        assert_eq!(table.block_len, 5);
        assert_eq!(table.state(0), Some(SlotState::FREE));
        assert_eq!(table.state(3), None);
        assert_eq!(table.in_use_count(), 0);
    }

    #[test]
    fn test_bind_static_twice() {
        let mut table = table(2);
        assert!(table.bind_static(1).is_ok());
        assert_eq!(table.bind_static(1).err(), Some(CounterError::SlotInUse(1)));
        assert_eq!(
            table.bind_static(2).err(),
            Some(CounterError::SlotOutOfRange {
                slot: 2,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_release_folds_into_dead() {
        let mut table = table(2);
        let block = table.bind_static(1).unwrap();
        block.local_add(2, 5);

        let dead = table.release(1, SlotKind::Static).unwrap();

        assert!(Arc::ptr_eq(&dead, &table.dead));
        assert_eq!(dead.load(2), 5);
        assert_eq!(block.load(2), 0);
        assert_eq!(
            table.state(1),
            Some(SlotState {
                kind: SlotKind::Static,
                in_use: false
            })
        );
        assert_eq!(
            table.release(1, SlotKind::Static).err(),
            Some(CounterError::SlotNotHeld(1))
        );
    }

    #[test]
    fn test_grow_keeps_blocks() {
        let mut table = table(1);
        let block = table.bind_static(0).unwrap();
        table.grow(vec![Arc::new(Block::new(5)), Arc::new(Block::new(5))]);

        assert_eq!(table.slots.len(), 3);
        assert!(Arc::ptr_eq(&table.slots[0].block, &block));
        assert_eq!(table.available_dynamic(), 2);
    }

    #[test]
    fn test_acquire_dynamic_lowest_first() {
        let mut table = table(1);
        assert_eq!(table.acquire_dynamic().err(), Some(CounterError::NoDynamicSlot));

        table.grow(vec![Arc::new(Block::new(5)), Arc::new(Block::new(5))]);
        let (first, _) = table.acquire_dynamic().unwrap();
        let (second, _) = table.acquire_dynamic().unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.acquire_dynamic().err(), Some(CounterError::NoDynamicSlot));

        table.release(1, SlotKind::Dynamic).unwrap();
        assert_eq!(table.acquire_dynamic().unwrap().0, 1);
    }

    #[test]
    fn test_reservations_add_up() {
        let mut table = table(1);
        assert_eq!(table.reserve_deficit(1), 1);
        table.grow(vec![Arc::new(Block::new(5))]);
        table.reserved += 1;

        assert_eq!(table.reserve_deficit(1), 1);
        table.grow(vec![Arc::new(Block::new(5))]);
        table.reserved += 1;

        table.acquire_dynamic().unwrap();
        assert_eq!(table.reserved, 1);
        assert_eq!(table.reserve_deficit(0), 0);
        table.acquire_dynamic().unwrap();
        assert_eq!(table.reserved, 0);
        assert_eq!(table.reserve_deficit(1), 1);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut table = table(1);
        table.grow(vec![Arc::new(Block::new(5))]);
        assert_eq!(
            table.bind_static(1).err(),
            Some(CounterError::SlotKindMismatch(1))
        );
        table.bind_static(0).unwrap();
        assert_eq!(
            table.release(0, SlotKind::Dynamic).err(),
            Some(CounterError::SlotKindMismatch(0))
        );
    }

    #[test]
    fn test_accumulate_selectors() {
        let mut table = table(2);
        let live = table.bind_static(0).unwrap();
        live.local_add(1, 1);
        table.slots[1].block.local_add(1, 100);
        table.dead.atomic_add(1, 10);
        table.shared.atomic_add(1, 1000);

        let mut out = vec![0; 5];
        table.accumulate(&mut out, ThreadSelector::All);
        assert_eq!(out[1], 1011);

        let mut out = vec![0; 5];
        table.accumulate(&mut out, ThreadSelector::Slot(0));
        assert_eq!(out[1], 1);

        let mut out = vec![0; 5];
        table.accumulate(&mut out, ThreadSelector::Shared);
        assert_eq!(out[1], 1000);
    }

    #[test]
    fn test_state_display() {
        let state = SlotState {
            kind: SlotKind::Dynamic,
            in_use: true,
        };
        assert_eq!(state.to_string(), "DYNAMIC|IN_USE");
        assert_eq!(SlotState::FREE.to_string(), "FREE");
    }
}
