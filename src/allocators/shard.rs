//! A single lock domain: one row of the bin directory.
//!
//! A [`Shard`] holds one [`PageList`] per size class and implements the page
//! lifecycle on top of it. It does no locking itself, [`ShardMalloc`] keeps every
//! shard behind its own mutex and only calls in while holding it.
//!
//! [`ShardMalloc`]: super::ShardMalloc

use core::ptr::NonNull;

use tracing::{debug, error, instrument, Level};

use crate::mappers::Mapper;
use crate::page::Page;
use crate::page_list::PageList;
use crate::size_class::{SizeClass, CLASS_COUNT};
use crate::stats::BinStats;

pub(crate) struct Shard {
    bins: [PageList; CLASS_COUNT],
}

// Pages are only reached through the shard's lock, whichever thread holds it.
unsafe impl Send for Shard {}

impl Shard {
    pub(crate) const fn new() -> Self {
        const EMPTY: PageList = PageList::new();
        Shard {
            bins: [EMPTY; CLASS_COUNT],
        }
    }

    /// Hands out a block of `class`, mapping a new page owned by shard `index`
    /// if every page in the chain is full.
    /// Returns the block and whether a page was mapped for it, or `Err(())`
    /// if the mapper is out of memory.
    ///
    /// # Safety
    /// `index` must be the index of this shard in its allocator and
    /// `mapper` must return page-aligned regions.
    #[instrument(level = "debug", skip(self, mapper), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    pub(crate) unsafe fn alloc_block<M: Mapper + ?Sized>(
        &mut self,
        class: SizeClass,
        index: usize,
        mapper: &M,
    ) -> Result<(NonNull<u8>, bool), ()> {
        let mut tail = None;
        let mut usable = None;
        for page in self.bins[class.index()].iter() {
            if !page.is_full() {
                usable = Some(page);
                break;
            }
            tail = Some(page);
        }

        let (page, mapped) = match usable {
            Some(page) => (page, false),
            None => {
                debug!("Every page in the chain is full, creating a new one.");
                (self.create_page(class, index, tail, mapper)?, true)
            }
        };

        let Some(block) = page.take_block() else {
            error!(?page, "Page with room has no free block.");
            return Err(());
        };
        Ok((page.block(block), mapped))
    }

    /// Frees the block at `ptr` in `page` and reclaims the page if it became empty.
    /// Returns whether the page was reclaimed.
    ///
    /// # Safety
    /// `page` must belong to this shard and `ptr` must be a live block of it
    /// that was mapped by `mapper`.
    #[instrument(level = "debug", skip(self, mapper), ret(level = Level::DEBUG))]
    pub(crate) unsafe fn free_block<M: Mapper + ?Sized>(
        &mut self,
        page: Page,
        ptr: NonNull<u8>,
        mapper: &M,
    ) -> bool {
        page.release_block(page.index_of(ptr));
        self.remove_if_empty(page, mapper)
    }

    /// Maps a page for `class` owned by shard `index` and links it into the chain
    /// right after `after`, or as the head if `after` is `None`.
    /// The page is fully initialized before it becomes reachable from the chain.
    ///
    /// # Safety
    /// `after`, if any, must be a page of this shard's chain for `class`.
    pub(crate) unsafe fn create_page<M: Mapper + ?Sized>(
        &mut self,
        class: SizeClass,
        index: usize,
        after: Option<Page>,
        mapper: &M,
    ) -> Result<Page, ()> {
        let page = Page::map(class, index, mapper)
            .inspect_err(|_| error!(?class, "Couldn't map a page."))?;
        self.bins[class.index()].insert_after(page, after);
        debug!(?page, ?class, shard = index, "Created page.");
        Ok(page)
    }

    /// Unlinks and unmaps `page` if none of its blocks is occupied.
    /// Returns whether the page was reclaimed.
    ///
    /// # Safety
    /// `page` must belong to this shard and have been mapped by `mapper`.
    pub(crate) unsafe fn remove_if_empty<M: Mapper + ?Sized>(
        &mut self,
        page: Page,
        mapper: &M,
    ) -> bool {
        if !page.is_empty() {
            return false;
        }
        let class = page.class();
        self.bins[class.index()].remove(page);
        page.unmap(mapper);
        debug!(?page, ?class, "Reclaimed empty page.");
        true
    }

    /// Occupancy of the chain for `class`.
    pub(crate) fn bin_stats(&self, class: SizeClass) -> BinStats {
        self.bins[class.index()]
            .iter()
            .fold(BinStats::default(), |acc, page| BinStats {
                pages: acc.pages + 1,
                occupied: acc.occupied + unsafe { page.occupied() },
                capacity: acc.capacity + page.capacity(),
            })
    }

    #[cfg(test)]
    pub(crate) fn chain(&self, class: SizeClass) -> &PageList {
        &self.bins[class.index()]
    }
}
