//! Slot allocation inside a process's swap file.
//!
//! Slots are page-sized. The allocator only remembers the lowest slot known to
//! be free; everything else is recomputed from the evicted-page table, which
//! is the single record of which slots hold data.

use super::descriptors::DescriptorTable;
use demandpage_shared::mem::PAGE_FRAME_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapOffset(u32);

impl SwapOffset {
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    pub const fn slot(self) -> u32 {
        self.0
    }

    pub const fn byte_offset(self) -> usize {
        self.0 as usize * PAGE_FRAME_SIZE
    }
}

fn is_live(evicted: &DescriptorTable, offset: SwapOffset) -> bool {
    evicted
        .iter()
        .any(|page| page.backing_offset == Some(offset))
}

#[derive(Clone, Debug, Default)]
pub struct OffsetAllocator {
    min_free: u32,
}

impl OffsetAllocator {
    /// Hands out the lowest free slot and moves the cursor to the next slot
    /// above it that no evicted page holds.
    ///
    /// This scans the evicted table once per skipped slot, so a long run of
    /// occupied slots above the cursor costs quadratic time in the table size.
    pub fn next_free_offset(&mut self, evicted: &DescriptorTable) -> SwapOffset {
        let taken = SwapOffset(self.min_free);
        debug_assert!(
            !is_live(evicted, taken),
            "swap slot {} handed out twice",
            taken.0
        );

        let mut candidate = self.min_free + 1;
        while is_live(evicted, SwapOffset(candidate)) {
            candidate += 1;
        }
        self.min_free = candidate;
        taken
    }

    /// Returns a slot whose page has left the swap file. Slots that were never
    /// assigned are ignored.
    pub fn release(&mut self, offset: Option<SwapOffset>) {
        if let Some(offset) = offset {
            self.min_free = self.min_free.min(offset.0);
        }
    }

    pub fn min_free(&self) -> SwapOffset {
        SwapOffset(self.min_free)
    }
}
