//! Moving pages between frames and the swap file.

use super::offsets::SwapOffset;
use super::page_replacement::PageReplacementPolicy;
use super::{AddressSpace, OverflowPage};
use crate::error::{PagingError, Result};
use crate::mem::FrameNumber;
use crate::paging::{Access, MapFlags};
use demandpage_shared::mem::{page_round_down, OFFSET, PAGE_FRAME_SIZE};

impl<P: PageReplacementPolicy> AddressSpace<P> {
    /// Services a page fault at `va`.
    pub fn handle_fault(&mut self, va: usize) -> Result<()> {
        self.stats.page_faults += 1;

        if va >= OFFSET || !P::PAGING {
            return Err(PagingError::SegmentationFault(va));
        }
        let page = page_round_down(va);
        match self.pages.lookup(page) {
            None => Err(PagingError::SegmentationFault(va)),
            Some(entry) if entry.present() => Err(PagingError::NotEvicted(page)),
            Some(_) if self.overflow_page() == Some(page) => self.reclaim_overflow(page),
            Some(_) => self.swap_in(page),
        }
    }

    /// Resolves an access to `va` to the frame holding it, faulting the page
    /// in if it lives in the swap file.
    pub(crate) fn access(&mut self, va: usize, access: Access, user: bool) -> Result<FrameNumber> {
        match self.pages.translate(va, access, user) {
            Err(PagingError::NotPresent(_)) => {
                self.handle_fault(va)?;
                self.pages.translate(va, access, user)
            }
            result => result,
        }
    }

    fn write_page(&mut self, frame: FrameNumber, offset: SwapOffset) -> Result<()> {
        let file = self
            .swap_file
            .as_mut()
            .ok_or(PagingError::BackingStoreFailure)?;
        let data = self.context.memory.frame(frame);
        match file.write(&data.0, offset.byte_offset()) {
            Ok(PAGE_FRAME_SIZE) => Ok(()),
            _ => Err(PagingError::BackingStoreFailure),
        }
    }

    fn read_page(&mut self, offset: SwapOffset, frame: FrameNumber) -> Result<()> {
        let file = self
            .swap_file
            .as_mut()
            .ok_or(PagingError::BackingStoreFailure)?;
        let mut data = self.context.memory.frame(frame);
        match file.read(&mut data.0, offset.byte_offset()) {
            Ok(PAGE_FRAME_SIZE) => Ok(()),
            _ => Err(PagingError::BackingStoreFailure),
        }
    }

    /// Puts a page that was unmapped for eviction back into residency with
    /// its old frame.
    fn restore_resident(&mut self, va: usize, frame: FrameNumber) -> Result<()> {
        self.pages.frame_in(va, frame)?;
        self.load_counter = self.resident.insert(va, self.load_counter)?;
        Ok(())
    }

    /// Evicts one resident page chosen by the policy. Its contents go to a
    /// fresh swap slot, or are held as the overflow page if the evicted table
    /// is full.
    pub(super) fn swap_out(&mut self) -> Result<()> {
        if self.swap_file.is_none() {
            return Err(PagingError::BackingStoreFailure);
        }
        if self.evicted.is_full() && self.overflow.is_some() {
            return Err(PagingError::DoubleOverflow);
        }

        let va = P::evict_page(&mut self.resident, &mut self.pages, &mut self.load_counter)?;
        let frame = self.pages.frame_out(va)?;

        if self.evicted.is_full() {
            self.overflow = Some(OverflowPage { va, frame });
        } else {
            let offset = self.offsets.next_free_offset(&self.evicted);
            if let Err(err) = self.write_page(frame, offset) {
                self.offsets.release(Some(offset));
                self.restore_resident(va, frame)?;
                return Err(err);
            }
            self.load_counter = self.evicted.insert(va, self.load_counter)?;
            self.evicted.assign_offset(va, Some(offset))?;
            self.context.memory.free_frame(frame);
            self.stats.paged_out += 1;
        }

        self.pages.reload_if_active();
        Ok(())
    }

    /// Writes the overflow page to `target`, or to a fresh slot, and records
    /// it as evicted. On failure the overflow page stays pending.
    fn flush_overflow(&mut self, target: Option<SwapOffset>) -> Result<()> {
        let Some(overflow) = self.overflow else {
            return Ok(());
        };
        if self.evicted.is_full() {
            return Err(PagingError::CapacityExceeded);
        }

        let (offset, fresh) = match target {
            Some(offset) => (offset, false),
            None => (self.offsets.next_free_offset(&self.evicted), true),
        };
        if let Err(err) = self.write_page(overflow.frame, offset) {
            if fresh {
                self.offsets.release(Some(offset));
            }
            return Err(err);
        }

        self.load_counter = self.evicted.insert(overflow.va, self.load_counter)?;
        self.evicted.assign_offset(overflow.va, Some(offset))?;
        self.context.memory.free_frame(overflow.frame);
        self.overflow = None;
        self.stats.paged_out += 1;
        Ok(())
    }

    /// Undoes an overflow eviction that the current fault could not finish.
    fn undo_overflow(&mut self) -> Result<()> {
        match self.overflow {
            Some(overflow) if self.has_resident_room() => {
                self.overflow = None;
                self.restore_resident(overflow.va, overflow.frame)
            }
            _ => Ok(()),
        }
    }

    /// A fault on the overflow page itself. Its contents never left the
    /// frame, so with room in the resident table it only has to be mapped
    /// again. Otherwise it is written out and faulted in like any other page.
    fn reclaim_overflow(&mut self, va: usize) -> Result<()> {
        if self.has_resident_room() {
            self.undo_overflow()?;
            self.pages.reload_if_active();
            return Ok(());
        }
        self.flush_overflow(None)?;
        self.swap_in(va)
    }

    /// Brings the evicted page at `va` back into a frame.
    pub(super) fn swap_in(&mut self, va: usize) -> Result<()> {
        let offset = self
            .evicted
            .find(va)
            .ok_or(PagingError::NoDescriptor(va))?
            .backing_offset;

        // A leftover from an earlier failed flush goes out first if it can.
        if self.overflow.is_some() && !self.evicted.is_full() {
            self.flush_overflow(None)?;
        }

        if !self.has_resident_room() {
            self.swap_out()?;
        }

        let frame = match self.context.memory.alloc_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.undo_overflow()?;
                return Err(err);
            }
        };
        if let Some(offset) = offset {
            if let Err(err) = self.read_page(offset, frame) {
                self.context.memory.free_frame(frame);
                self.undo_overflow()?;
                return Err(err);
            }
        }

        if let Err(err) = self.pages.frame_in(va, frame) {
            self.context.memory.free_frame(frame);
            self.undo_overflow()?;
            return Err(err);
        }
        let page = self.evicted.remove(va)?;
        self.load_counter = self.resident.insert(va, self.load_counter)?;

        // The overflow page takes over the slot this page just vacated.
        let had_overflow = self.overflow.is_some();
        let flushed = if had_overflow {
            self.flush_overflow(page.backing_offset)
        } else {
            Ok(())
        };
        if !had_overflow || self.overflow.is_some() {
            self.offsets.release(page.backing_offset);
        }

        self.pages.reload_if_active();
        flushed
    }

    /// Maps a brand new page at `va`, zero-filled.
    pub(super) fn allocate_page(&mut self, va: usize) -> Result<()> {
        if !self.can_page() || self.has_resident_room() {
            let frame = self.context.memory.alloc_frame()?;
            if let Err(err) = self.pages.map(va, Some(frame), MapFlags::USER_RW) {
                self.context.memory.free_frame(frame);
                return Err(err);
            }
            if self.can_page() {
                match self.resident.insert(va, self.load_counter) {
                    Ok(next) => self.load_counter = next,
                    Err(err) => {
                        self.pages.unmap(va)?;
                        self.context.memory.free_frame(frame);
                        return Err(err);
                    }
                }
            }
            return Ok(());
        }

        // At the frame limit: the page starts life in the swap file with no
        // slot of its own and is faulted in straight away.
        self.load_counter = self.evicted.insert(va, self.load_counter)?;
        if let Err(err) = self.pages.map(va, None, MapFlags::USER_RW) {
            self.evicted.remove(va)?;
            return Err(err);
        }
        if let Err(err) = self.swap_in(va) {
            self.release_page(va)?;
            return Err(err);
        }
        Ok(())
    }

    /// Returns the page at `va` and whatever holds its contents. Addresses
    /// with no page are ignored.
    pub(super) fn release_page(&mut self, va: usize) -> Result<()> {
        let Some(entry) = self.pages.lookup(va) else {
            return Ok(());
        };

        if entry.present() {
            if self.can_page() {
                self.resident.remove(va)?;
            }
            let frame = FrameNumber::from_phys_addr(entry.frame_address());
            self.pages.unmap(va)?;
            self.context.memory.free_frame(frame);
        } else if let Some(overflow) = self.overflow.filter(|page| page.va == va) {
            self.pages.unmap(va)?;
            self.context.memory.free_frame(overflow.frame);
            self.overflow = None;
        } else {
            let page = self.evicted.remove(va)?;
            self.pages.unmap(va)?;
            self.offsets.release(page.backing_offset);
        }
        Ok(())
    }
}
