//! Fixed-capacity arrays of 64-bit counters.
//!
//! A [`Block`] holds one cell per counter handle. Cells are grouped eight to
//! a cache line and every line is wrapped in [`CachePadded`], so blocks
//! owned by different threads never share a cache line.
//!
//! Two families of updates are offered:
//!
//! - `local_*`: a relaxed load followed by a relaxed store. Only correct when
//!   a single thread writes the block (a bound slot), and as cheap as plain
//!   arithmetic on every mainstream target.
//! - `atomic_*`: sequentially consistent read-modify-write, used for the
//!   shared block and the dead-thread accumulator, which any thread may hit.
//!
//! All arithmetic wraps modulo 2^64.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

const LANES: usize = 8;

type Line = CachePadded<[AtomicU64; LANES]>;

pub(crate) struct Block {
    lines: Box<[Line]>,
    len: usize,
}

impl Block {
    /// Creates a zeroed block with `len` cells.
    pub(crate) fn new(len: usize) -> Self {
        let lines: Box<[Line]> = (0..len.div_ceil(LANES))
            .map(|_| CachePadded::new(std::array::from_fn(|_| AtomicU64::new(0))))
            .collect();
        Block { lines, len }
    }

    #[inline]
    fn cell(&self, idx: usize) -> Option<&AtomicU64> {
        if idx < self.len {
            Some(&self.lines[idx / LANES][idx % LANES])
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn load(&self, idx: usize) -> u64 {
        self.cell(idx).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn local_add(&self, idx: usize, delta: u64) {
        if let Some(c) = self.cell(idx) {
            c.store(c.load(Ordering::Relaxed).wrapping_add(delta), Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn local_sub(&self, idx: usize, delta: u64) {
        if let Some(c) = self.cell(idx) {
            c.store(c.load(Ordering::Relaxed).wrapping_sub(delta), Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn local_set(&self, idx: usize, value: u64) {
        if let Some(c) = self.cell(idx) {
            c.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn atomic_add(&self, idx: usize, delta: u64) {
        if let Some(c) = self.cell(idx) {
            c.fetch_add(delta, Ordering::SeqCst);
        }
    }

    #[inline]
    pub(crate) fn atomic_sub(&self, idx: usize, delta: u64) {
        if let Some(c) = self.cell(idx) {
            c.fetch_sub(delta, Ordering::SeqCst);
        }
    }

    fn cells(&self) -> impl Iterator<Item = &AtomicU64> {
        self.lines.iter().flat_map(|line| line.iter()).take(self.len)
    }

    /// Adds every cell into `out`, cell `i` into `out[i]`.
    pub(crate) fn accumulate_into(&self, out: &mut [u64]) {
        for (dst, c) in out.iter_mut().zip(self.cells()) {
            *dst = dst.wrapping_add(c.load(Ordering::Relaxed));
        }
    }

    /// Moves every cell into `target` and leaves this block zeroed.
    ///
    /// Must only be called by the thread owning this block.
    pub(crate) fn fold_into(&self, target: &Block) {
        for (idx, c) in self.cells().enumerate() {
            let value = c.swap(0, Ordering::Relaxed);
            if value != 0 {
                target.atomic_add(idx, value);
            }
        }
    }
}

impl std::fmt::Debug for Block {
    /// Output format: `{ [idx]:value [idx]:value ... }`, non-zero cells only.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.cells().enumerate() {
            let val = c.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
