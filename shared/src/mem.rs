use crate::sizes::{KB, MB, SECTOR_SIZE};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / SECTOR_SIZE;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

// Frames handed out by the frame pool start above the first megabyte.
pub const PHYS_BASE: usize = MB;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    page_round_down(addr + PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}
