mod placement_algorithms;

pub use self::placement_algorithms::{FirstFit, NextFit, PlacementAlgorithm};

use crate::error::{PagingError, Result};
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use core::ops::Range;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    page_table: bool,
    // The following frame belongs to the same allocation.
    #[bit(2, rw)]
    next: bool,
}

/// Book-keeping for a pool of physical frames, one [`CoreMapEntry`] per frame.
pub struct FrameAllocator<A: PlacementAlgorithm = NextFit> {
    core_map: Box<[CoreMapEntry]>,
    placement: A,
    frames_allocated: usize,
}

impl<A: PlacementAlgorithm> FrameAllocator<A> {
    pub fn new(total_frames: usize) -> Self {
        Self {
            core_map: vec![CoreMapEntry::DEFAULT; total_frames].into_boxed_slice(),
            placement: A::default(),
            frames_allocated: 0,
        }
    }

    /// Reserves `frames_requested` contiguous frames and returns their
    /// numbers.
    pub fn alloc(&mut self, frames_requested: usize, page_table: bool) -> Result<Range<usize>> {
        if frames_requested == 0 || self.frames_allocated + frames_requested > self.core_map.len()
        {
            return Err(PagingError::FrameExhausted);
        }

        let range = self
            .placement
            .place(&self.core_map, frames_requested)
            .ok_or(PagingError::FrameExhausted)?;

        for i in range.clone() {
            debug_assert!(!self.core_map[i].allocated());
            self.core_map[i] = CoreMapEntry::DEFAULT
                .with_allocated(true)
                .with_page_table(page_table)
                .with_next(i + 1 < range.end);
        }

        self.frames_allocated += frames_requested;
        Ok(range)
    }

    /// Releases the allocation starting at `start`. Returns how many frames
    /// were freed, which is zero if `start` was not allocated.
    pub fn dealloc(&mut self, start: usize) -> usize {
        let mut frame = start;
        let mut frames_freed = 0;

        while frame < self.core_map.len() && self.core_map[frame].allocated() {
            let continues = self.core_map[frame].next();
            self.core_map[frame] = CoreMapEntry::DEFAULT;
            frames_freed += 1;
            frame += 1;

            if !continues {
                break;
            }
        }

        self.frames_allocated -= frames_freed;
        frames_freed
    }

    pub fn is_allocated(&self, frame: usize) -> bool {
        self.core_map.get(frame).is_some_and(|entry| entry.allocated())
    }

    pub fn page_table_frames(&self) -> usize {
        self.core_map
            .iter()
            .filter(|entry| entry.allocated() && entry.page_table())
            .count()
    }

    pub fn total_frames(&self) -> usize {
        self.core_map.len()
    }

    pub fn free_frames(&self) -> usize {
        self.core_map.len() - self.frames_allocated
    }
}
