//! [`Mapper`] trait and structures that implement it.
//!
//! The [`Mapper`] trait lets users change where [`ShardMalloc`](crate::ShardMalloc)
//! gets its pages and large regions from. The default, [`Mmap`], asks the kernel
//! for anonymous private mappings.

use core::ptr::{null_mut, NonNull};

use tracing::error;

/// A source of page-aligned memory regions.
///
/// # Safety
/// * [`map`](Mapper::map) must return regions aligned to at least
///   [`PAGE_SIZE`](crate::PAGE_SIZE), readable and writable for `len` bytes,
///   and not overlapping any region that is still mapped.
/// * Implementors must be safe to call from several threads at once,
///   the allocator calls them without holding any lock.
pub unsafe trait Mapper {
    /// Maps a region of at least `len` bytes.
    /// Returns the start of the region or `Err(())` if no memory is available.
    ///
    /// # Safety
    /// `len` must be nonzero.
    unsafe fn map(&self, len: usize) -> Result<NonNull<u8>, ()>;

    /// Returns a region obtained from [`map`](Mapper::map) to the system.
    ///
    /// # Safety
    /// `ptr` and `len` must be exactly those of a region previously returned by
    /// [`map`](Mapper::map) on the same mapper, and nothing may use the region afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize);
}

/// A mapper that uses [`libc::mmap`] and [`libc::munmap`] directly.
#[derive(Copy, Clone, Debug, Default)]
pub struct Mmap;

unsafe impl Mapper for Mmap {
    unsafe fn map(&self, len: usize) -> Result<NonNull<u8>, ()> {
        debug_assert_ne!(len, 0);
        let protection = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        match libc::mmap(null_mut(), len, protection, flags, -1, 0) {
            libc::MAP_FAILED => {
                error!(len, "mmap failed.");
                Err(())
            }
            address => Ok(NonNull::new_unchecked(address.cast())),
        }
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        if libc::munmap(ptr.as_ptr().cast(), len) != 0 {
            // The region stays mapped, there is nothing better to do than leak it.
            error!(?ptr, len, "munmap failed.");
        }
    }
}

unsafe impl<T: Mapper + ?Sized> Mapper for &T {
    unsafe fn map(&self, len: usize) -> Result<NonNull<u8>, ()> {
        (**self).map(len)
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        (**self).unmap(ptr, len)
    }
}
