//! Defines the [`PageList`] struct, the chain of pages of one size class in one shard.

use core::marker::PhantomData;
use core::ptr::{null_mut, NonNull};

use crate::page::{Page, PageHeader};

/// A doubly-linked list threaded through the `prev`/`next` fields of page headers.
///
/// The list doesn't own its pages, the [`Shard`](crate::allocators::shard::Shard)
/// holding it does. All operations assume the caller holds that shard's lock.
#[derive(Debug)]
pub(crate) struct PageList {
    head: *mut PageHeader,
}

impl PageList {
    /// Creates an empty list.
    #[inline]
    pub(crate) const fn new() -> Self {
        PageList { head: null_mut() }
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub(crate) fn head(&self) -> Option<Page> {
        NonNull::new(self.head).map(|p| unsafe { Page::from_raw(p) })
    }

    /// Links `page` right after `after`, or makes it the new head if `after` is `None`.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `page` must not be part of any list and `after`, if any, must be part of this one.
    pub(crate) unsafe fn insert_after(&mut self, page: Page, after: Option<Page>) {
        match after {
            None => {
                page.set_prev(null_mut());
                page.set_next(self.head);
                if let Some(head) = self.head() {
                    head.set_prev(page.as_ptr());
                }
                self.head = page.as_ptr();
            }
            Some(after) => {
                let next = after.next();
                page.set_prev(after.as_ptr());
                page.set_next(next);
                if let Some(next) = NonNull::new(next) {
                    Page::from_raw(next).set_prev(page.as_ptr());
                }
                after.set_next(page.as_ptr());
            }
        }
    }

    /// Unlinks `page` from the list.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `page` must be part of this list.
    pub(crate) unsafe fn remove(&mut self, page: Page) {
        let prev = page.prev();
        let next = page.next();
        match NonNull::new(prev) {
            None => {
                debug_assert_eq!(self.head, page.as_ptr(), "Only the head has no predecessor.");
                self.head = next;
            }
            Some(prev) => Page::from_raw(prev).set_next(next),
        }
        if let Some(next) = NonNull::new(next) {
            Page::from_raw(next).set_prev(prev);
        }
        page.set_prev(null_mut());
        page.set_next(null_mut());
    }

    /// Iterates the pages from head to tail.
    #[inline]
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            cur: self.head,
            _list: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

pub(crate) struct Iter<'a> {
    cur: *mut PageHeader,
    _list: PhantomData<&'a PageList>,
}

impl Iterator for Iter<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        let page = unsafe { Page::from_raw(NonNull::new(self.cur)?) };
        self.cur = unsafe { page.next() };
        Some(page)
    }
}
