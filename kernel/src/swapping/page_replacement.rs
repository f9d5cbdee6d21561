use super::descriptors::DescriptorTable;
use crate::error::{PagingError, Result};
use crate::paging::PageManager;
use demandpage_shared::paging::PageFlag;

/// Chooses which resident page leaves memory when a process is at its frame
/// limit.
pub trait PageReplacementPolicy {
    /// Whether processes running under this policy page at all.
    const PAGING: bool = true;

    /// Removes the victim's descriptor from `resident` and returns its
    /// address. The page's mapping and frame are left alone.
    fn evict_page(
        resident: &mut DescriptorTable,
        pages: &mut PageManager,
        load_counter: &mut u64,
    ) -> Result<usize>;
}

/// Evicts the page that arrived most recently.
pub struct Lifo;

/// FIFO that spares a page once if it has been used since its last look.
pub struct SecondChance;

/// Every page gets a frame of its own; nothing is ever evicted.
pub struct NoPaging;

impl PageReplacementPolicy for Lifo {
    fn evict_page(
        resident: &mut DescriptorTable,
        _pages: &mut PageManager,
        _load_counter: &mut u64,
    ) -> Result<usize> {
        let victim = resident
            .iter()
            .max_by_key(|page| page.load_time)
            .ok_or(PagingError::NoVictim)?
            .virtual_page;
        resident.remove(victim)?;
        Ok(victim)
    }
}

impl PageReplacementPolicy for SecondChance {
    fn evict_page(
        resident: &mut DescriptorTable,
        pages: &mut PageManager,
        load_counter: &mut u64,
    ) -> Result<usize> {
        // Each pass either clears an accessed bit or returns, so this ends.
        loop {
            let oldest = resident
                .iter()
                .min_by_key(|page| page.load_time)
                .ok_or(PagingError::NoVictim)?
                .virtual_page;

            if !pages.test_flag(PageFlag::Accessed, oldest)? {
                resident.remove(oldest)?;
                return Ok(oldest);
            }

            pages.clear_flag(PageFlag::Accessed, oldest)?;
            let page = resident
                .find_mut(oldest)
                .ok_or(PagingError::NoDescriptor(oldest))?;
            page.load_time = *load_counter;
            *load_counter += 1;
        }
    }
}

impl PageReplacementPolicy for NoPaging {
    const PAGING: bool = false;

    fn evict_page(
        _resident: &mut DescriptorTable,
        _pages: &mut PageManager,
        _load_counter: &mut u64,
    ) -> Result<usize> {
        Err(PagingError::NoVictim)
    }
}
