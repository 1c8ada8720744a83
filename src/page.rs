//! Defines the [`PageHeader`] layout and the [`Page`] handle used to operate on it.
//!
//! A page is a [`PAGE_SIZE`]-byte region mapped from the OS and split into equal
//! blocks of one size class. The header sits at the very start of the region:
//!
//! ```text
//! | PageHeader | block 0 | block 1 | ... | block n-1 | slack |
//! ^ page base (PAGE_SIZE aligned)
//! ```
//!
//! Since pages are [`PAGE_SIZE`]-aligned, the header of the page owning a block
//! is found by rounding the block's address down.

use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut, null_mut, NonNull};

use crate::bitmap::Bitmap;
use crate::mappers::Mapper;
use crate::size_class::SizeClass;
use crate::util::{page_base, page_offset};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = size_of::<PageHeader>();

/// Metadata at the start of every page.
///
/// `block_size`, `class` and `shard` never change after the page is mapped and may be
/// read without synchronization. `prev`, `next` and `bitmap` belong to the shard
/// recorded in `shard` and may only be touched while holding that shard's lock.
#[derive(Debug)]
#[repr(C, align(16))]
pub(crate) struct PageHeader {
    pub(crate) block_size: usize,
    pub(crate) class: SizeClass,
    pub(crate) shard: usize,
    pub(crate) prev: *mut PageHeader,
    pub(crate) next: *mut PageHeader,
    pub(crate) bitmap: Bitmap,
}

impl PageHeader {
    pub(crate) const fn new(class: SizeClass, shard: usize) -> Self {
        PageHeader {
            block_size: class.size(),
            class,
            shard,
            prev: null_mut(),
            next: null_mut(),
            bitmap: Bitmap::new(class.blocks_per_page()),
        }
    }
}

/// A handle to a live page.
///
/// Holding a `Page` asserts that it points to an initialized [`PageHeader`]
/// at the start of a mapped page. The handle never creates references to the
/// whole header, fields are reached through raw places so that lock-free reads
/// of the immutable fields don't alias the locked mutations of the others.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Page(NonNull<PageHeader>);

impl Page {
    /// # Safety
    /// `header` must point to an initialized [`PageHeader`] that outlives the handle.
    #[inline(always)]
    pub(crate) const unsafe fn from_raw(header: NonNull<PageHeader>) -> Page {
        Page(header)
    }

    #[inline(always)]
    pub(crate) const fn as_ptr(self) -> *mut PageHeader {
        self.0.as_ptr()
    }

    /// Returns the page that contains the block at `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been handed out by the page path and not freed yet.
    #[inline]
    pub(crate) unsafe fn containing(ptr: NonNull<u8>) -> Page {
        debug_assert!(
            page_offset(ptr.as_ptr()) >= PAGE_HEADER_SIZE,
            "Page blocks never overlap the page header."
        );
        Page(NonNull::new_unchecked(page_base(ptr.as_ptr())).cast())
    }

    /// Maps a fresh page for `class` owned by `shard`.
    /// The page is not linked into any chain.
    ///
    /// # Safety
    /// `mapper` must return [`PAGE_SIZE`]-aligned regions.
    pub(crate) unsafe fn map<M: Mapper + ?Sized>(
        class: SizeClass,
        shard: usize,
        mapper: &M,
    ) -> Result<Page, ()> {
        let base = mapper.map(PAGE_SIZE)?;
        debug_assert_eq!(page_offset(base.as_ptr()), 0, "Pages must be page-aligned.");
        let header: NonNull<PageHeader> = base.cast();
        header.as_ptr().write(PageHeader::new(class, shard));
        Ok(Page(header))
    }

    /// Returns the page's memory to `mapper`. The handle is dangling afterwards.
    ///
    /// # Safety
    /// The page must not be linked into a chain and must not hold any live blocks.
    pub(crate) unsafe fn unmap<M: Mapper + ?Sized>(self, mapper: &M) {
        mapper.unmap(self.0.cast(), PAGE_SIZE);
    }

    #[inline(always)]
    pub(crate) fn shard(self) -> usize {
        unsafe { addr_of!((*self.as_ptr()).shard).read() }
    }

    #[inline(always)]
    pub(crate) fn class(self) -> SizeClass {
        unsafe { addr_of!((*self.as_ptr()).class).read() }
    }

    #[inline(always)]
    pub(crate) fn block_size(self) -> usize {
        unsafe { addr_of!((*self.as_ptr()).block_size).read() }
    }

    #[inline(always)]
    pub(crate) fn capacity(self) -> usize {
        self.class().blocks_per_page()
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline(always)]
    unsafe fn bitmap<'a>(self) -> &'a mut Bitmap {
        &mut *addr_of_mut!((*self.as_ptr()).bitmap)
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline]
    pub(crate) unsafe fn is_full(self) -> bool {
        self.bitmap().is_fully_occupied()
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline]
    pub(crate) unsafe fn is_empty(self) -> bool {
        self.bitmap().is_clear(self.capacity())
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline]
    pub(crate) unsafe fn occupied(self) -> usize {
        self.bitmap().occupied(self.capacity())
    }

    /// Marks the lowest free block occupied and returns its index,
    /// or `None` if the page is full.
    ///
    /// # Safety
    /// The caller must hold the lock of the page's shard.
    pub(crate) unsafe fn take_block(self) -> Option<usize> {
        let bitmap = self.bitmap();
        let index = bitmap.first_free(self.capacity())?;
        bitmap.toggle(index);
        Some(index)
    }

    /// Marks block `index` free.
    ///
    /// # Safety
    /// The caller must hold the lock of the page's shard
    /// and block `index` must currently be occupied.
    pub(crate) unsafe fn release_block(self, index: usize) {
        debug_assert!(index < self.capacity(), "Padding bits are never released.");
        let bitmap = self.bitmap();
        debug_assert!(bitmap.is_set(index), "Block {index} is already free.");
        bitmap.toggle(index);
    }

    /// Returns a pointer to block `index`.
    #[inline]
    pub(crate) fn block(self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity());
        let offset = PAGE_HEADER_SIZE + index * self.block_size();
        unsafe { self.0.cast::<u8>().add(offset) }
    }

    /// Returns the index of the block starting at `ptr`.
    #[inline]
    pub(crate) fn index_of(self, ptr: NonNull<u8>) -> usize {
        let offset = ptr.as_ptr() as usize - self.as_ptr() as usize - PAGE_HEADER_SIZE;
        debug_assert_eq!(
            offset % self.block_size(),
            0,
            "Pointer doesn't start a block."
        );
        offset / self.block_size()
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline(always)]
    pub(crate) unsafe fn next(self) -> *mut PageHeader {
        addr_of!((*self.as_ptr()).next).read()
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline(always)]
    pub(crate) unsafe fn prev(self) -> *mut PageHeader {
        addr_of!((*self.as_ptr()).prev).read()
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline(always)]
    pub(crate) unsafe fn set_next(self, next: *mut PageHeader) {
        addr_of_mut!((*self.as_ptr()).next).write(next)
    }

    /// # Safety
    /// The caller must hold the lock of the page's shard.
    #[inline(always)]
    pub(crate) unsafe fn set_prev(self, prev: *mut PageHeader) {
        addr_of_mut!((*self.as_ptr()).prev).write(prev)
    }
}
