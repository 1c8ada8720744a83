//! The large-object path: one dedicated mapping per request.
//!
//! Requests above [`MAX_CLASS_SIZE`](crate::size_class::MAX_CLASS_SIZE), or with an
//! alignment the page path can't honor, get their own region. A [`LargeHeader`]
//! is written right before the pointer handed out:
//!
//! ```text
//! header lead:  | LargeHeader | object ...            (align <= LARGE_HEADER_SIZE)
//!               ^ base        ^ base + 16
//! page lead:    | unused ... LargeHeader | object ... (align <= PAGE_SIZE)
//!               ^ base                   ^ base + PAGE_SIZE
//! ```
//!
//! # Recognition
//! Objects start at offset [`LARGE_HEADER_SIZE`] or 0 within their page.
//! Blocks of the page path start at [`PAGE_HEADER_SIZE`] or later, so the offset alone
//! tells the two paths apart. The header still carries [`LARGE_TAG`], which is checked in
//! debug builds to catch pointers that never came from this allocator.

use core::mem::size_of;
use core::ptr::NonNull;

use static_assertions::const_assert;

use crate::mappers::Mapper;
use crate::page::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::size_class::CLASS_ALIGN;
use crate::util::{checked_total, page_offset};

pub(crate) const LARGE_HEADER_SIZE: usize = size_of::<LargeHeader>();

/// Marks a header as belonging to the large path.
pub(crate) const LARGE_TAG: usize = 0x5348_4152_444D_414C;

const_assert!(LARGE_HEADER_SIZE < PAGE_HEADER_SIZE);
const_assert!(LARGE_HEADER_SIZE >= CLASS_ALIGN);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C, align(16))]
pub(crate) struct LargeHeader {
    /// Length of the whole mapping, lead included.
    pub(crate) mapped: usize,
    pub(crate) tag: usize,
}

impl LargeHeader {
    #[inline(always)]
    pub(crate) fn is_tagged(&self) -> bool {
        self.tag == LARGE_TAG
    }
}

/// Returns the distance between the mapping base and the object for a given alignment,
/// or `None` if the alignment can't be honored.
#[inline]
fn lead_for(align: usize) -> Option<usize> {
    if align <= LARGE_HEADER_SIZE {
        Some(LARGE_HEADER_SIZE)
    } else if align <= PAGE_SIZE {
        Some(PAGE_SIZE)
    } else {
        None
    }
}

/// Returns the distance between the mapping base and a large object.
#[inline]
fn lead_of(obj: NonNull<u8>) -> usize {
    match page_offset(obj.as_ptr()) {
        0 => PAGE_SIZE,
        _ => LARGE_HEADER_SIZE,
    }
}

/// Returns whether `obj` was handed out by the large path.
///
/// # Safety
/// `obj` must have been handed out by the allocator and not freed yet.
#[inline]
pub(crate) unsafe fn is_large(obj: NonNull<u8>) -> bool {
    let large = matches!(page_offset(obj.as_ptr()), 0 | LARGE_HEADER_SIZE);
    debug_assert!(
        !large || header(obj).is_tagged(),
        "Large objects must be preceded by a tagged header."
    );
    large
}

/// # Safety
/// `obj` must be a live large object.
#[inline(always)]
unsafe fn header(obj: NonNull<u8>) -> LargeHeader {
    obj.cast::<LargeHeader>().sub(1).read()
}

/// Maps a region for an object of `size` bytes aligned to `align`
/// and returns a pointer to the object, or `Err(())` if that's impossible.
///
/// # Safety
/// `mapper` must return [`PAGE_SIZE`]-aligned regions.
pub(crate) unsafe fn map<M: Mapper + ?Sized>(
    size: usize,
    align: usize,
    mapper: &M,
) -> Result<NonNull<u8>, ()> {
    let lead = lead_for(align).ok_or(())?;
    let mapped = checked_total(size, lead).ok_or(())?;
    let base = mapper.map(mapped)?;
    debug_assert_eq!(page_offset(base.as_ptr()), 0, "Mappings must be page-aligned.");
    let obj = base.add(lead);
    obj.cast::<LargeHeader>().sub(1).write(LargeHeader {
        mapped,
        tag: LARGE_TAG,
    });
    Ok(obj)
}

/// Returns the number of bytes usable at `obj`.
///
/// # Safety
/// `obj` must be a live large object.
#[inline]
pub(crate) unsafe fn usable_size(obj: NonNull<u8>) -> usize {
    header(obj).mapped - lead_of(obj)
}

/// Returns the whole mapping holding `obj` to `mapper`.
///
/// # Safety
/// `obj` must be a live large object mapped by `mapper`. It is dangling afterwards.
pub(crate) unsafe fn unmap<M: Mapper + ?Sized>(obj: NonNull<u8>, mapper: &M) {
    let header = header(obj);
    debug_assert!(header.is_tagged());
    let base = obj.sub(lead_of(obj));
    mapper.unmap(base, header.mapped);
}
