//! A multithreaded, sharded memory allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Locking
// Each shard is a `Mutex<Shard>`. Allocation draws a shard at random and keeps its lock
// only while a block is picked (and a page created, if needed). Free never draws:
// the shard is read from the header of the page owning the block, since the page's
// bitmap and links are protected by that shard's lock and no other.
// The large path doesn't lock at all, mappers are required to be thread safe.
//
// ## Errors
// The private `__`-prefixed functions report mapping failures as `Err(())`.
// The trait front-ends turn those into null pointers or `AllocError`,
// the inherent `malloc`/`resize` treat them as fatal.

use self::util::{draw_shard, out_of_memory, route, Route};
use super::shard::Shard;
use crate::large;
use crate::mappers::{Mapper, Mmap};
use crate::page::Page;
use crate::size_class::SizeClass;
use crate::stats::{BinStats, Counters, Stats};
use crate::util::raw_ptr;

use core::alloc::{AllocError, Allocator, GlobalAlloc, Layout};
use core::fmt::{self, Debug};
use core::mem::align_of;
use core::ptr::{copy_nonoverlapping, NonNull};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument, Level};

mod util;

/// Number of shards used by [`ShardMalloc::new`].
pub const DEFAULT_SHARDS: usize = 4;

/// Alignment requested by [`ShardMalloc::malloc`] and [`ShardMalloc::resize`].
const MALLOC_ALIGN: usize = align_of::<usize>();

/// A multithreaded memory allocator with `SHARDS` independent lock domains.
///
/// Each shard owns one chain of pages per size class. Every page stays bound to the
/// shard that created it for its whole life.
pub struct ShardMalloc<M: Mapper = Mmap, const SHARDS: usize = DEFAULT_SHARDS> {
    shards: [Mutex<Shard>; SHARDS],
    mapper: M,
    counters: Counters,
}

impl ShardMalloc {
    /// Creates an allocator with [`DEFAULT_SHARDS`] shards that maps memory with [`Mmap`].
    /// Nothing is mapped until the first allocation.
    pub const fn new() -> Self {
        Self::with_mapper(Mmap)
    }
}

impl Default for ShardMalloc {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Mapper, const SHARDS: usize> ShardMalloc<M, SHARDS> {
    /// Creates an allocator that takes its memory from `mapper`.
    /// All chains start empty and all shards unlocked.
    ///
    /// # Panics
    /// Panics if `SHARDS` is 0.
    pub const fn with_mapper(mapper: M) -> Self {
        assert!(SHARDS > 0, "ShardMalloc needs at least one shard.");
        const EMPTY: Mutex<Shard> = Mutex::new(Shard::new());
        ShardMalloc {
            shards: [EMPTY; SHARDS],
            mapper,
            counters: Counters::new(),
        }
    }

    /// Allocates at least `size` bytes and returns a pointer to them.
    ///
    /// The pointer is aligned to 16 bytes, or to 8 bytes for requests of 8 bytes or less.
    /// A request of 0 bytes is served from the smallest size class and yields
    /// a unique pointer that must be freed like any other.
    ///
    /// If the system can't provide the memory the process is aborted
    /// through [`handle_alloc_error`](std::alloc::handle_alloc_error).
    pub fn malloc(&self, size: usize) -> NonNull<u8> {
        self.__alloc(size, MALLOC_ALIGN)
            .unwrap_or_else(|()| out_of_memory(size))
    }

    /// Frees the allocation at `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`malloc`](Self::malloc), [`resize`](Self::resize)
    /// or one of the trait front-ends of this same allocator, and not freed since.
    /// Nothing is done to detect invalid or double frees outside of debug builds.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        self.__free(ptr)
    }

    /// Moves the allocation at `ptr` into a fresh allocation of at least `new_size` bytes
    /// and returns it. The first `min(old size, new_size)` bytes are preserved, where the
    /// old size is the usable size of the old allocation. `None` behaves as [`malloc`](Self::malloc).
    ///
    /// The contents are always moved, even when the new size falls into the same size class.
    /// Aborts the process if the new allocation can't be made.
    ///
    /// # Safety
    /// Same as [`free`](Self::free) for `ptr`.
    pub unsafe fn resize(&self, ptr: Option<NonNull<u8>>, new_size: usize) -> NonNull<u8> {
        self.__resize(ptr, new_size, MALLOC_ALIGN)
            .unwrap_or_else(|()| out_of_memory(new_size))
    }

    /// Returns the number of bytes usable at `ptr`: the block size of its class,
    /// or the mapped length minus the header for large objects.
    ///
    /// # Safety
    /// Same as [`free`](Self::free) for `ptr`.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        if large::is_large(ptr) {
            large::usable_size(ptr)
        } else {
            Page::containing(ptr).block_size()
        }
    }

    /// Returns a snapshot of the allocator's counters.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Returns the occupancy of the chain for `class` in shard `shard`.
    /// Blocks until that shard's lock is available.
    ///
    /// # Panics
    /// Panics if `shard` is not less than `SHARDS`.
    pub fn bin_stats(&self, class: SizeClass, shard: usize) -> BinStats {
        self.lock(shard).bin_stats(class)
    }

    /// Returns the number of shards.
    pub const fn shards(&self) -> usize {
        SHARDS
    }

    #[inline]
    fn lock(&self, shard: usize) -> MutexGuard<'_, Shard> {
        // A panic while holding the lock can only come from a debug assertion
        // between bitmap edits, the chains stay well formed.
        self.shards[shard]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    fn __alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, ()> {
        match route(size, align) {
            Route::Page(class) => {
                let shard = draw_shard(SHARDS);
                debug!(?class, shard, "Serving from the page path.");
                let (ptr, new_page) =
                    unsafe { self.lock(shard).alloc_block(class, shard, &self.mapper)? };
                self.counters.block_allocated(new_page);
                Ok(ptr)
            }
            Route::Large => {
                let ptr = unsafe { large::map(size, align, &self.mapper)? };
                debug!(?ptr, "Mapped large object.");
                self.counters.large_allocated();
                Ok(ptr)
            }
        }
    }

    /// # Safety
    /// Same as [`free`](Self::free).
    #[instrument(level = "info", skip(self))]
    unsafe fn __free(&self, ptr: NonNull<u8>) {
        if large::is_large(ptr) {
            large::unmap(ptr, &self.mapper);
            debug!("Unmapped large object.");
            self.counters.large_freed();
            return;
        }

        let page = Page::containing(ptr);
        let shard = page.shard();
        debug_assert!(shard < SHARDS, "Page claims shard {shard} out of {SHARDS}.");
        let reclaimed = self.lock(shard).free_block(page, ptr, &self.mapper);
        self.counters.block_freed(reclaimed);
    }

    /// # Safety
    /// Same as [`resize`](Self::resize).
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    unsafe fn __resize(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, ()> {
        let Some(old) = ptr else {
            return self.__alloc(new_size, align);
        };
        let old_size = self.usable_size(old);
        let new = self.__alloc(new_size, align)?;
        copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(new_size));
        self.__free(old);
        Ok(new)
    }

    /// Converts an allocation to a fat pointer covering all of its usable bytes.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this allocator.
    #[inline]
    unsafe fn to_nonnull_slice(&self, ptr: NonNull<u8>) -> NonNull<[u8]> {
        NonNull::slice_from_raw_parts(ptr, self.usable_size(ptr))
    }
}

impl<M: Mapper, const SHARDS: usize> Debug for ShardMalloc<M, SHARDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardMalloc")
            .field("shards", &SHARDS)
            .field("stats", &self.stats())
            .finish()
    }
}

//---------------impl Allocator for ShardMalloc---------------//

unsafe impl<M: Mapper, const SHARDS: usize> Allocator for ShardMalloc<M, SHARDS> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let ptr = self
            .__alloc(layout.size(), layout.align())
            .map_err(|()| AllocError)?;
        unsafe { Ok(self.to_nonnull_slice(ptr)) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.__free(ptr)
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(old_layout.size() <= new_layout.size());
        let ptr = self
            .__resize(Some(ptr), new_layout.size(), new_layout.align())
            .map_err(|()| AllocError)?;
        Ok(self.to_nonnull_slice(ptr))
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(old_layout.size() >= new_layout.size());
        let ptr = self
            .__resize(Some(ptr), new_layout.size(), new_layout.align())
            .map_err(|()| AllocError)?;
        Ok(self.to_nonnull_slice(ptr))
    }
}

//---------------impl GlobalAlloc for ShardMalloc---------------//

unsafe impl<M: Mapper, const SHARDS: usize> GlobalAlloc for ShardMalloc<M, SHARDS> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        raw_ptr(self.__alloc(layout.size(), layout.align()).ok())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        debug_assert!(!ptr.is_null());
        if let Some(ptr) = NonNull::new(ptr) {
            self.__free(ptr)
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        raw_ptr(self.__resize(NonNull::new(ptr), new_size, layout.align()).ok())
    }
}

impl<M: Mapper, const SHARDS: usize> PartialEq for ShardMalloc<M, SHARDS> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl<M: Mapper, const SHARDS: usize> Eq for ShardMalloc<M, SHARDS> {}

#[cfg(test)]
mod tests;
