//! Growing and shrinking the user heap.

use super::page_replacement::PageReplacementPolicy;
use super::AddressSpace;
use crate::error::{PagingError, Result};
use demandpage_shared::mem::{page_round_up, OFFSET, PAGE_FRAME_SIZE};

impl<P: PageReplacementPolicy> AddressSpace<P> {
    /// Extends the address space by `n` bytes and returns the new size. If any
    /// page cannot be added, every page added by this call is released again.
    pub fn grow(&mut self, n: usize) -> Result<usize> {
        let new_size = self
            .size
            .checked_add(n)
            .filter(|&size| size <= OFFSET)
            .ok_or(PagingError::AddressOutOfRange)?;
        self.allocate_range(self.size, new_size)?;
        self.size = new_size;
        Ok(new_size)
    }

    /// Cuts `n` bytes off the end of the address space and returns the new
    /// size.
    pub fn shrink(&mut self, n: usize) -> Result<usize> {
        let new_size = self
            .size
            .checked_sub(n)
            .ok_or(PagingError::AddressOutOfRange)?;
        self.deallocate_range(self.size, new_size)?;
        self.size = new_size;
        Ok(new_size)
    }

    /// Maps every page between `old_size` and `new_size`.
    pub(super) fn allocate_range(&mut self, old_size: usize, new_size: usize) -> Result<()> {
        let mut va = page_round_up(old_size);
        while va < new_size {
            if let Err(err) = self.allocate_page(va) {
                self.deallocate_range(va, old_size)?;
                return Err(err);
            }
            va += PAGE_FRAME_SIZE;
        }
        Ok(())
    }

    /// Unmaps every page between `new_size` and `old_size`.
    pub(super) fn deallocate_range(&mut self, old_size: usize, new_size: usize) -> Result<()> {
        let mut va = page_round_up(new_size);
        while va < old_size {
            self.release_page(va)?;
            va += PAGE_FRAME_SIZE;
        }
        self.pages.reload_if_active();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::page_replacement::{Lifo, NoPaging, SecondChance};
    use super::super::test::{
        check_invariants, check_stamp, context, faulty_context, stamp, PAGE,
    };
    use super::super::Privilege;
    use super::*;
    use crate::config::{MAX_RESIDENT_PAGES, MAX_TOTAL_PAGES};
    use core::sync::atomic::Ordering;

    type Space = AddressSpace<SecondChance>;

    #[test]
    fn grow_within_frame_limit_stays_resident() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        assert_eq!(space.grow(3 * PAGE), Ok(3 * PAGE));
        assert_eq!(space.resident().len(), 3);
        assert!(space.evicted().is_empty());
        assert_eq!(space.load_counter(), 3);
        check_invariants(&space);
    }

    #[test]
    fn partial_pages_round_up() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(10).unwrap();
        assert_eq!(space.resident().len(), 1);
        space.grow(PAGE).unwrap();
        assert_eq!(space.size(), PAGE + 10);
        assert_eq!(space.resident().len(), 2);

        // Still inside the second page.
        space.shrink(5).unwrap();
        assert_eq!(space.resident().len(), 2);
        space.shrink(PAGE).unwrap();
        assert_eq!(space.resident().len(), 1);
    }

    #[test]
    fn one_past_the_limit_evicts_one_older_page() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(MAX_RESIDENT_PAGES * PAGE).unwrap();
        for i in 0..MAX_RESIDENT_PAGES {
            stamp(&mut space, i);
        }

        space.grow(PAGE).unwrap();
        assert_eq!(space.resident().len(), MAX_RESIDENT_PAGES);
        assert_eq!(space.evicted().len(), 1);
        let victim = space.evicted().iter().next().unwrap().virtual_page;
        assert!(victim < MAX_RESIDENT_PAGES * PAGE);
        assert!(space.resident().find(MAX_RESIDENT_PAGES * PAGE).is_some());
        assert_eq!(space.stats().paged_out, 1);
        check_invariants(&space);

        for i in 0..MAX_RESIDENT_PAGES {
            check_stamp(&mut space, i);
        }
        check_invariants(&space);
    }

    #[test]
    fn grow_to_the_page_quota() {
        let (ctx, swap_fs) = context(128);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(MAX_TOTAL_PAGES * PAGE).unwrap();
        assert_eq!(space.resident().len(), MAX_RESIDENT_PAGES);
        assert_eq!(space.evicted().len(), MAX_RESIDENT_PAGES);
        assert_eq!(space.overflow_page(), None);
        check_invariants(&space);

        let free = ctx.memory.free_frames();
        assert_eq!(space.grow(PAGE), Err(PagingError::CapacityExceeded));
        assert_eq!(space.size(), MAX_TOTAL_PAGES * PAGE);
        assert_eq!(ctx.memory.free_frames(), free);
        check_invariants(&space);

        drop(space);
        assert_eq!(ctx.memory.free_frames(), 128);
        assert_eq!(swap_fs.live_files(), 0);
    }

    #[test]
    fn shrink_returns_frames_and_slots() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        let baseline = ctx.memory.free_frames();

        space.grow((MAX_RESIDENT_PAGES + 4) * PAGE).unwrap();
        assert_eq!(space.evicted().len(), 4);
        space.shrink((MAX_RESIDENT_PAGES + 4) * PAGE).unwrap();
        assert!(space.resident().is_empty());
        assert!(space.evicted().is_empty());
        assert_eq!(space.min_free_offset().slot(), 0);
        assert!(space.page_manager().mapped_pages().is_empty());

        // Only the page tables stay behind.
        let tables = ctx.memory.page_table_frames() - 1;
        assert_eq!(ctx.memory.free_frames(), baseline - tables);

        // Everything can be handed out again.
        space.grow((MAX_RESIDENT_PAGES + 4) * PAGE).unwrap();
        assert_eq!(space.evicted().len(), 4);
        check_invariants(&space);
    }

    #[test]
    fn shrink_below_zero_is_rejected() {
        let (ctx, _) = context(16);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(PAGE).unwrap();
        assert_eq!(space.shrink(2 * PAGE), Err(PagingError::AddressOutOfRange));
        assert_eq!(space.size(), PAGE);
        assert_eq!(space.grow(OFFSET), Err(PagingError::AddressOutOfRange));
    }

    #[test]
    fn failed_grow_releases_its_pages() {
        // Directory, one page table, then room for three pages.
        let (ctx, _) = context(5);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(PAGE).unwrap();
        let free = ctx.memory.free_frames();

        assert_eq!(space.grow(5 * PAGE), Err(PagingError::FrameExhausted));
        assert_eq!(space.size(), PAGE);
        assert_eq!(space.resident().len(), 1);
        assert_eq!(ctx.memory.free_frames(), free);
        assert_eq!(space.page_manager().mapped_pages().len(), 1);
        check_invariants(&space);
    }

    #[test]
    fn failed_eviction_write_rolls_back_grow() {
        let (ctx, switches) = faulty_context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(MAX_RESIDENT_PAGES * PAGE).unwrap();
        let free = ctx.memory.free_frames();

        switches.fail_writes.store(true, Ordering::SeqCst);
        assert_eq!(space.grow(2 * PAGE), Err(PagingError::BackingStoreFailure));
        assert_eq!(space.size(), MAX_RESIDENT_PAGES * PAGE);
        assert_eq!(space.resident().len(), MAX_RESIDENT_PAGES);
        assert!(space.evicted().is_empty());
        assert_eq!(ctx.memory.free_frames(), free);
        check_invariants(&space);

        switches.fail_writes.store(false, Ordering::SeqCst);
        space.grow(2 * PAGE).unwrap();
        assert_eq!(space.evicted().len(), 2);
    }

    #[test]
    fn lifo_evicts_the_newest_page() {
        let (ctx, _) = context(64);
        let mut space = AddressSpace::<Lifo>::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(MAX_RESIDENT_PAGES * PAGE).unwrap();
        space.grow(PAGE).unwrap();
        let victim = space.evicted().iter().next().unwrap().virtual_page;
        assert_eq!(victim, (MAX_RESIDENT_PAGES - 1) * PAGE);
        check_invariants(&space);
    }

    #[test]
    fn direct_mapping_without_paging() {
        let (ctx, swap_fs) = context(64);
        let mut space = AddressSpace::<NoPaging>::new(&ctx, 3, Privilege::User).unwrap();
        assert!(!space.has_swap_file());
        assert_eq!(swap_fs.live_files(), 0);

        space.grow((MAX_RESIDENT_PAGES + 8) * PAGE).unwrap();
        assert!(space.resident().is_empty());
        assert_eq!(space.page_manager().mapped_pages().len(), MAX_RESIDENT_PAGES + 8);
        assert_eq!(space.report().allocated_pages, MAX_RESIDENT_PAGES + 8);
        assert_eq!(
            space.handle_fault(0),
            Err(PagingError::SegmentationFault(0))
        );

        space.shrink(8 * PAGE).unwrap();
        assert_eq!(space.page_manager().mapped_pages().len(), MAX_RESIDENT_PAGES);
    }

    #[test]
    fn system_processes_map_directly() {
        let (ctx, swap_fs) = context(64);
        let mut space = Space::new(&ctx, 1, Privilege::System).unwrap();
        assert_eq!(swap_fs.live_files(), 0);
        space.grow((MAX_RESIDENT_PAGES + 2) * PAGE).unwrap();
        assert!(space.resident().is_empty());
        assert!(space.evicted().is_empty());
        assert_eq!(space.stats().paged_out, 0);
    }
}
