//! Reference-counted pages shared between TPS entries.
//!
//! A [`Page`] pairs a [`Region`] with the number of TPS entries pointing at it. Pages live in a
//! [`PageArena`] and are referenced by [`PageId`]; the arena's generation check makes a
//! reference to a released page fail cleanly instead of reaching a recycled slot.
//!
//! - [`PageArena::allocate`] maps a fresh page with refcount 1
//! - [`PageArena::acquire`] adds a reference (clone)
//! - [`PageArena::release`] drops a reference and unmaps the page when it was the last one

use log::debug;

use crate::{
    tps::region::Region,
    utils::{Arena, ArenaId},
    Error, Result,
};

/// Reference to a page in a [`PageArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PageId(ArenaId);

pub(crate) struct Page {
    pub(crate) region: Region,
    refcount: usize,
}

impl Page {
    pub(crate) fn refcount(&self) -> usize {
        self.refcount
    }
}

#[derive(Default)]
pub(crate) struct PageArena {
    pages: Arena<Page>,
}

impl PageArena {
    /// Stores `region` as a new page with a single reference.
    pub(crate) fn insert(&mut self, region: Region) -> Result<PageId> {
        let base = region.base();
        let id = self
            .pages
            .insert(Page {
                region,
                refcount: 1,
            })
            .ok_or_else(|| Error::AllocationFailure {
                message: "page arena is full".to_string(),
            })?;

        debug!("page {:?} mapped at {:#x}", id, base);
        Ok(PageId(id))
    }

    /// Maps a new zero-filled page with a single reference.
    pub(crate) fn allocate(&mut self) -> Result<PageId> {
        self.insert(Region::allocate()?)
    }

    pub(crate) fn get(&self, id: PageId) -> Option<&Page> {
        self.pages.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.pages.get_mut(id.0)
    }

    /// Adds a reference to `id` and returns the new count.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the page has been released.
    pub(crate) fn acquire(&mut self, id: PageId) -> Result<usize> {
        let page = self.pages.get_mut(id.0).ok_or(Error::NotFound)?;
        page.refcount += 1;
        Ok(page.refcount)
    }

    /// Drops a reference to `id` and returns the remaining count; the page is unmapped when
    /// it reaches zero.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the page has already been released.
    pub(crate) fn release(&mut self, id: PageId) -> Result<usize> {
        let page = self.pages.get_mut(id.0).ok_or(Error::NotFound)?;
        page.refcount -= 1;

        let remaining = page.refcount;
        if remaining == 0 {
            // Dropping the region unpublishes and unmaps it
            self.pages.remove(id.0);
            debug!("page {:?} released", id);
        }

        Ok(remaining)
    }

    /// Number of mapped pages.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }
}
