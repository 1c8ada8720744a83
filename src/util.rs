//! Utility functions.

use core::ptr::{null_mut, NonNull};

use crate::page::PAGE_SIZE;

/// Returns the offset of `ptr` from the start of the [`PAGE_SIZE`]-aligned page containing it.
#[inline(always)]
pub(crate) fn page_offset(ptr: *const u8) -> usize {
    ptr as usize & (PAGE_SIZE - 1)
}

/// Rounds `ptr` down to the start of the [`PAGE_SIZE`]-aligned page containing it.
/// The returned pointer keeps the provenance of `ptr`.
#[inline(always)]
pub(crate) fn page_base(ptr: *mut u8) -> *mut u8 {
    ptr.wrapping_sub(page_offset(ptr))
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}

/// Returns `size + extra` or `None` if the sum is not a valid allocation size,
/// i.e. it overflows or exceeds `isize::MAX`.
#[inline(always)]
pub(crate) fn checked_total(size: usize, extra: usize) -> Option<usize> {
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    size.checked_add(extra).filter(|&total| total <= isize::MAX as usize)
}
