//! The size-class table.
//!
//! Every request served by the page path is rounded up to one of the canonical
//! sizes in [`CLASS_SIZES`]. Requests larger than [`MAX_CLASS_SIZE`] bypass the
//! table and go to the large-object path.

use static_assertions::const_assert;

use crate::bitmap::BITMAP_BITS;
use crate::page::{PAGE_HEADER_SIZE, PAGE_SIZE};

pub const CLASS_COUNT: usize = 16;

/// Alignment of every block of a class that is at least this large.
pub const CLASS_ALIGN: usize = 16;

/// Canonical block sizes in ascending order.
///
/// Past 512 bytes the sizes are the largest multiples of [`CLASS_ALIGN`]
/// that fit 5, 4, 3, 2 and 1 blocks into a page.
pub const CLASS_SIZES: [usize; CLASS_COUNT] = [
    8,
    16,
    32,
    48,
    64,
    96,
    128,
    192,
    256,
    384,
    512,
    768,
    992,
    1328,
    1984,
    PAGE_SIZE - PAGE_HEADER_SIZE,
];

/// Largest request served by the page path.
pub const MAX_CLASS_SIZE: usize = CLASS_SIZES[CLASS_COUNT - 1];

const fn table_is_well_formed() -> bool {
    let mut i = 1;
    while i < CLASS_COUNT {
        if CLASS_SIZES[i] <= CLASS_SIZES[i - 1] || CLASS_SIZES[i] % CLASS_ALIGN != 0 {
            return false;
        }
        i += 1;
    }
    CLASS_SIZES[0] % 8 == 0
}

const_assert!(table_is_well_formed());
const_assert!(CLASS_SIZES[0] < CLASS_ALIGN);
const_assert!(PAGE_HEADER_SIZE % CLASS_ALIGN == 0);
// The bitmap must cover the densest page.
const_assert!((PAGE_SIZE - PAGE_HEADER_SIZE) / CLASS_SIZES[0] <= BITMAP_BITS);
const_assert!(CLASS_COUNT <= u8::MAX as usize);

/// An index into [`CLASS_SIZES`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SizeClass(u8);

impl SizeClass {
    pub const SMALLEST: SizeClass = SizeClass(0);
    pub const LARGEST: SizeClass = SizeClass(CLASS_COUNT as u8 - 1);

    /// Returns the smallest class whose size is at least `bytes`
    /// or `None` if `bytes` exceeds [`MAX_CLASS_SIZE`].
    /// A request of 0 bytes maps to the smallest class.
    #[inline]
    pub fn of(bytes: usize) -> Option<SizeClass> {
        let index = CLASS_SIZES.partition_point(|&size| size < bytes);
        (index < CLASS_COUNT).then_some(SizeClass(index as u8))
    }

    #[inline]
    pub const fn from_index(index: usize) -> Option<SizeClass> {
        if index < CLASS_COUNT {
            Some(SizeClass(index as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Block size in bytes.
    #[inline(always)]
    pub const fn size(self) -> usize {
        CLASS_SIZES[self.0 as usize]
    }

    /// Number of blocks of this class that fit in one page.
    #[inline(always)]
    pub const fn blocks_per_page(self) -> usize {
        (PAGE_SIZE - PAGE_HEADER_SIZE) / self.size()
    }

    /// All classes in ascending order.
    pub fn all() -> impl Iterator<Item = SizeClass> {
        (0..CLASS_COUNT as u8).map(SizeClass)
    }
}

/// Shorthand for [`SizeClass::of`].
#[inline]
pub fn class_of(bytes: usize) -> Option<SizeClass> {
    SizeClass::of(bytes)
}
