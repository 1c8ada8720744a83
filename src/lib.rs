//! A sharded, segregated-fit memory allocator built directly on top of `mmap`.
//!
//! The allocator splits small requests into a fixed set of size classes, carves
//! fixed-size pages into equally sized blocks of one class, and tracks which blocks are taken
//! with a bitmap in the page's header. To keep threads from fighting over a single lock the
//! page chains are spread over several independent shards.
//!
//! # Usage
//! Add `shard_malloc` as a dependency in your project's `Cargo.toml`.
//! The crate needs a nightly toolchain since it implements the unstable [`Allocator`] trait.
//! ```toml
//! [dependencies]
//! shard_malloc = "0.1"
//! ```
//!
//! ```
//! use shard_malloc::ShardMalloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: ShardMalloc = ShardMalloc::new();
//!
//! fn main() {
//!     let v: Vec<u32> = vec![1, 2, 3];
//!     println!("Pages are cool {:?}", v);
//! }
//! ```
//!
//! The allocator can just as well be used locally, either through the C-like
//! [`malloc`](ShardMalloc::malloc), [`free`](ShardMalloc::free) and
//! [`resize`](ShardMalloc::resize) functions or as an [`Allocator`]:
//! ```
//! #![feature(allocator_api)]
//! use shard_malloc::ShardMalloc;
//!
//! let allocator: ShardMalloc = ShardMalloc::new();
//! let mut v = Vec::with_capacity_in(8, &allocator);
//! v.extend([1_u64, 2, 3]);
//! assert_eq!(allocator.stats().live_chunks(), 1);
//! ```
//!
//! # Mode of operation
//! - An allocation request is first mapped to the smallest [size class](#size-classes)
//!   that fits it. Requests that fit no class go to the [large path](#large-objects).
//! - A [shard](#shards) is drawn at random and its lock taken. The shard's chain of
//!   [pages](#pages) for the class is walked from the head, and the first page
//!   with a free block hands out its lowest free block. If every page is full a
//!   new page is mapped and appended to the chain.
//! - On free the owning page is found by rounding the pointer down to the page boundary.
//!   Its header names the shard it belongs to, so that shard's lock is taken and the block's
//!   [bitmap](#bitmaps) bit cleared. A page left without occupied blocks is unlinked and
//!   returned to the system right away.
//!
//! Below are the abstractions the allocator is built from:
//!
//! ## Size classes
//! There are [`CLASS_COUNT`](size_class::CLASS_COUNT) classes, from 8 bytes up to
//! [`MAX_CLASS_SIZE`](size_class::MAX_CLASS_SIZE), which is a whole page minus its header.
//! The table is geometric-ish so that internal fragmentation stays bounded.
//! See [`size_class`] for the exact values.
//!
//! ## Pages
//! A page is a [`PAGE_SIZE`] region aligned to [`PAGE_SIZE`]. It starts with a header holding
//! the block size, the class, the owning shard, the chain links and the bitmap.
//! The blocks follow the header back to back. Since every page is aligned, the header of the
//! page owning any block is found with a single mask of the block's address.
//!
//! ## Bitmaps
//! Each header holds 512 bits, one per block. Bits beyond the page's block count are set when
//! the page is created, so the search for a free block never has to know the capacity:
//! it skips whole 64-bit words that are fully set and picks the lowest clear bit of the first
//! word that isn't.
//!
//! ## Shards
//! [`ShardMalloc`] is generic over its shard count and defaults to [`DEFAULT_SHARDS`].
//! Every shard owns one chain per class behind its own mutex, and a page stays with the shard
//! that created it until it is unmapped. Picking the shard at random keeps concurrent threads
//! mostly out of each other's way without any per-thread state beyond a small RNG.
//!
//! ## Large objects
//! Requests above [`MAX_CLASS_SIZE`](size_class::MAX_CLASS_SIZE), or asking for alignment above
//! 16 bytes, get a dedicated mapping with a small tagged header right before the object.
//! Freeing one unmaps the whole region. Large objects never start where a page-path block
//! could, which is how the two are told apart on free.
//!
//! ## Mappers
//! Memory is obtained through the [`Mapper`](mappers::Mapper) trait. [`Mmap`](mappers::Mmap),
//! an anonymous private `mmap`, is the default. Any other source handing out page-aligned
//! regions can be plugged in with [`ShardMalloc::with_mapper`].
//!
//! ## Statistics
//! Every allocator counts mapped and unmapped pages, allocations, frees and large mappings.
//! [`ShardMalloc::stats`] returns a [`Stats`](stats::Stats) snapshot and
//! [`ShardMalloc::bin_stats`] reports the occupancy of a single chain.
//!
//! # Logging
//! Entry points are instrumented with [`tracing`]. Nothing is emitted unless a subscriber is
//! installed, and a subscriber must not be installed while the allocator is the global one,
//! since formatting events allocates.
//!
//! [`Allocator`]: core::alloc::Allocator
#![feature(allocator_api)]

pub use crate::allocators::{ShardMalloc, DEFAULT_SHARDS};
pub use crate::page::PAGE_SIZE;

pub mod allocators;
mod bitmap;
mod large;
pub mod mappers;
mod page;
mod page_list;
pub mod size_class;
pub mod stats;
mod util;
