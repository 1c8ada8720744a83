//! Utility functions specific to the [`ShardMalloc`](super::ShardMalloc) allocator.

use core::alloc::Layout;
use core::cell::RefCell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::error;

use crate::size_class::{SizeClass, CLASS_ALIGN, CLASS_SIZES};

/// Where a request is served from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Page(SizeClass),
    Large,
}

/// Picks the path serving `size` bytes aligned to `align`.
///
/// Blocks are [`CLASS_ALIGN`]-aligned, except those of the smallest class
/// which are only aligned to their own size. Stricter alignments are left to the large path.
#[inline]
pub(crate) fn route(size: usize, align: usize) -> Route {
    if align > CLASS_ALIGN {
        return Route::Large;
    }
    let size = if align > CLASS_SIZES[0] { size.max(align) } else { size };
    match SizeClass::of(size) {
        Some(class) => Route::Page(class),
        None => Route::Large,
    }
}

// Relies on native TLS. On targets that emulate thread locals through OS keys the slot
// is boxed on first access, which would re-enter the global allocator from `draw_shard`.
thread_local! {
    // SmallRng has no destructor, so the slot stays usable during thread teardown.
    static SHARD_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

/// Draws a shard index uniformly from `0..count`.
#[inline]
pub(crate) fn draw_shard(count: usize) -> usize {
    if count == 1 {
        return 0;
    }
    SHARD_RNG
        .try_with(|rng| rng.borrow_mut().gen_range(0..count))
        .unwrap_or(0)
}

/// Reports a failed mapping of `size` bytes and aborts the process.
#[cold]
pub(crate) fn out_of_memory(size: usize) -> ! {
    error!(size, "Out of memory.");
    std::alloc::handle_alloc_error(failed_layout(size))
}

/// Layout reported for a failed request of `size` bytes.
/// Sizes no `Layout` can hold are clamped to `isize::MAX`.
#[inline]
fn failed_layout(size: usize) -> Layout {
    Layout::from_size_align(size.min(isize::MAX as usize), 1).unwrap_or(Layout::new::<u8>())
}
