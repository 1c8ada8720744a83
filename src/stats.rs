//! Allocation statistics.
//!
//! All counters use `Relaxed` ordering, a [`Stats`] snapshot taken while other
//! threads are allocating may be transiently inconsistent across fields.
//! They are meant for reporting, not for allocation decisions.

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters owned by an allocator.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pages_mapped: AtomicUsize,
    pages_unmapped: AtomicUsize,
    chunks_allocated: AtomicUsize,
    chunks_freed: AtomicUsize,
    large_mapped: AtomicUsize,
    large_unmapped: AtomicUsize,
}

#[inline(always)]
fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) const fn new() -> Self {
        Counters {
            pages_mapped: AtomicUsize::new(0),
            pages_unmapped: AtomicUsize::new(0),
            chunks_allocated: AtomicUsize::new(0),
            chunks_freed: AtomicUsize::new(0),
            large_mapped: AtomicUsize::new(0),
            large_unmapped: AtomicUsize::new(0),
        }
    }

    /// Records a page-path allocation, `new_page` tells whether a page had to be mapped for it.
    #[inline]
    pub(crate) fn block_allocated(&self, new_page: bool) {
        if new_page {
            bump(&self.pages_mapped);
        }
        bump(&self.chunks_allocated);
    }

    /// Records a page-path free, `reclaimed` tells whether the page was unmapped.
    #[inline]
    pub(crate) fn block_freed(&self, reclaimed: bool) {
        if reclaimed {
            bump(&self.pages_unmapped);
        }
        bump(&self.chunks_freed);
    }

    #[inline]
    pub(crate) fn large_allocated(&self) {
        bump(&self.large_mapped);
        bump(&self.chunks_allocated);
    }

    #[inline]
    pub(crate) fn large_freed(&self) {
        bump(&self.large_unmapped);
        bump(&self.chunks_freed);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            pages_mapped: self.pages_mapped.load(Ordering::Relaxed),
            pages_unmapped: self.pages_unmapped.load(Ordering::Relaxed),
            chunks_allocated: self.chunks_allocated.load(Ordering::Relaxed),
            chunks_freed: self.chunks_freed.load(Ordering::Relaxed),
            large_mapped: self.large_mapped.load(Ordering::Relaxed),
            large_unmapped: self.large_unmapped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of an allocator's counters.
///
/// Chunk counts include both page-path blocks and large objects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub pages_mapped: usize,
    pub pages_unmapped: usize,
    pub chunks_allocated: usize,
    pub chunks_freed: usize,
    pub large_mapped: usize,
    pub large_unmapped: usize,
}

impl Stats {
    /// Pages currently mapped by the page path.
    pub fn live_pages(&self) -> usize {
        self.pages_mapped.saturating_sub(self.pages_unmapped)
    }

    /// Allocations not yet freed.
    pub fn live_chunks(&self) -> usize {
        self.chunks_allocated.saturating_sub(self.chunks_freed)
    }

    /// Large regions currently mapped.
    pub fn live_large(&self) -> usize {
        self.large_mapped.saturating_sub(self.large_unmapped)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== shard malloc stats ==")?;
        writeln!(f, "Mapped:   {}", self.pages_mapped)?;
        writeln!(f, "Unmapped: {}", self.pages_unmapped)?;
        writeln!(f, "Allocs:   {}", self.chunks_allocated)?;
        writeln!(f, "Frees:    {}", self.chunks_freed)?;
        writeln!(f, "Large:    {}", self.large_mapped)?;
        write!(f, "LargeRet: {}", self.large_unmapped)
    }
}

/// Occupancy of one bin, i.e. the chain of pages of one size class in one shard.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BinStats {
    /// Pages in the chain.
    pub pages: usize,
    /// Occupied blocks across those pages.
    pub occupied: usize,
    /// Total blocks across those pages.
    pub capacity: usize,
}
