//! Per-process book-keeping for user pages.
//!
//! A paging process keeps two fixed-size tables: one for pages held in
//! physical frames and one for pages written out to its swap file. A page is
//! tracked by at most one of them.

use super::offsets::SwapOffset;
use crate::config::MAX_RESIDENT_PAGES;
use crate::error::{PagingError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    Unused,
    Resident,
    Evicted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageDescriptor {
    pub virtual_page: usize,
    pub state: PageState,
    /// Tick at which the page entered its table. Later pages have larger ticks.
    pub load_time: u64,
    /// Where the page's contents sit in the swap file, if anywhere yet.
    pub backing_offset: Option<SwapOffset>,
}

impl PageDescriptor {
    const UNUSED: Self = Self {
        virtual_page: 0,
        state: PageState::Unused,
        load_time: 0,
        backing_offset: None,
    };

    pub fn is_used(&self) -> bool {
        self.state != PageState::Unused
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorTable {
    kind: PageState,
    slots: [PageDescriptor; MAX_RESIDENT_PAGES],
}

impl DescriptorTable {
    pub const fn resident() -> Self {
        Self::with_kind(PageState::Resident)
    }

    pub const fn evicted() -> Self {
        Self::with_kind(PageState::Evicted)
    }

    const fn with_kind(kind: PageState) -> Self {
        Self {
            kind,
            slots: [PageDescriptor::UNUSED; MAX_RESIDENT_PAGES],
        }
    }

    pub fn kind(&self) -> PageState {
        self.kind
    }

    pub fn find(&self, va: usize) -> Option<&PageDescriptor> {
        self.iter().find(|page| page.virtual_page == va)
    }

    pub(crate) fn find_mut(&mut self, va: usize) -> Option<&mut PageDescriptor> {
        self.iter_mut().find(|page| page.virtual_page == va)
    }

    /// Records `va` in the first unused slot, stamped with `load_time`.
    /// Returns the next tick to hand out.
    pub fn insert(&mut self, va: usize, load_time: u64) -> Result<u64> {
        if self.find(va).is_some() {
            return Err(PagingError::AlreadyMapped(va));
        }
        let kind = self.kind;
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| !slot.is_used())
            .ok_or(PagingError::CapacityExceeded)?;

        *slot = PageDescriptor {
            virtual_page: va,
            state: kind,
            load_time,
            backing_offset: None,
        };
        Ok(load_time + 1)
    }

    pub fn assign_offset(&mut self, va: usize, offset: Option<SwapOffset>) -> Result<()> {
        let page = self.find_mut(va).ok_or(PagingError::NoDescriptor(va))?;
        page.backing_offset = offset;
        Ok(())
    }

    pub fn remove(&mut self, va: usize) -> Result<PageDescriptor> {
        let page = self.find_mut(va).ok_or(PagingError::NoDescriptor(va))?;
        Ok(core::mem::replace(page, PageDescriptor::UNUSED))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.slots.iter().filter(|page| page.is_used())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PageDescriptor> {
        self.slots.iter_mut().filter(|page| page.is_used())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAX_RESIDENT_PAGES
    }
}
