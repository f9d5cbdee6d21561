pub mod frame_allocator;
pub mod user;

use crate::error::{PagingError, Result};
use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};
use demandpage_shared::mem::{PAGE_FRAME_SIZE, PHYS_BASE};
use demandpage_shared::paging::PAGE_TABLE_LEN;
use frame_allocator::{FrameAllocator, NextFit};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Index of a physical frame in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(usize);

impl FrameNumber {
    pub const fn index(self) -> usize {
        self.0
    }

    pub const fn phys_addr(self) -> usize {
        PHYS_BASE + self.0 * PAGE_FRAME_SIZE
    }

    pub const fn from_phys_addr(addr: usize) -> Self {
        Self((addr - PHYS_BASE) / PAGE_FRAME_SIZE)
    }
}

#[derive(FromZeroes, FromBytes, AsBytes)]
#[repr(C, align(4096))]
pub struct Frame(pub [u8; PAGE_FRAME_SIZE]);

impl Frame {
    /// The frame viewed as a page directory or page table.
    pub fn entries(&self) -> &[u32; PAGE_TABLE_LEN] {
        zerocopy::transmute_ref!(self)
    }

    pub fn entries_mut(&mut self) -> &mut [u32; PAGE_TABLE_LEN] {
        zerocopy::transmute_mut!(self)
    }
}

const NO_ROOT: usize = usize::MAX;

/// The machine's physical memory: a fixed pool of frames, the core map that
/// tracks them, and the register holding the active page directory.
///
/// A single lock guards allocation. Frame contents have their own locks so
/// copying a page never holds up another process's allocation.
pub struct PhysicalMemory {
    allocator: Mutex<FrameAllocator<NextFit>>,
    frames: Box<[Mutex<Box<Frame>>]>,
    active_root: AtomicUsize,
    tlb_reloads: AtomicUsize,
}

impl PhysicalMemory {
    pub fn new(frame_count: usize) -> Self {
        Self {
            allocator: Mutex::new(FrameAllocator::new(frame_count)),
            frames: (0..frame_count)
                .map(|_| Mutex::new(Box::new(Frame::new_zeroed())))
                .collect(),
            active_root: AtomicUsize::new(NO_ROOT),
            tlb_reloads: AtomicUsize::new(0),
        }
    }

    fn allocate(&self, page_table: bool) -> Option<FrameNumber> {
        let range = self.allocator.lock().alloc(1, page_table).ok()?;
        let frame = FrameNumber(range.start);
        self.frame(frame).0.fill(0);
        Some(frame)
    }

    /// Takes a zeroed frame for a user page.
    pub fn alloc_frame(&self) -> Result<FrameNumber> {
        self.allocate(false).ok_or(PagingError::FrameExhausted)
    }

    /// Takes a zeroed frame for a page directory or page table.
    pub fn alloc_page_table(&self) -> Result<FrameNumber> {
        self.allocate(true).ok_or(PagingError::OutOfMemory)
    }

    pub fn free_frame(&self, frame: FrameNumber) {
        let freed = self.allocator.lock().dealloc(frame.0);
        debug_assert_eq!(freed, 1, "double free of frame {}", frame.0);
    }

    pub fn frame(&self, frame: FrameNumber) -> MutexGuard<Box<Frame>> {
        self.frames[frame.0].lock()
    }

    pub fn copy_frame(&self, src: FrameNumber, dst: FrameNumber) {
        debug_assert_ne!(src, dst);
        let src = self.frame(src);
        self.frame(dst).0.copy_from_slice(&src.0);
    }

    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.allocator.lock().is_allocated(frame.0)
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frames(&self) -> usize {
        self.allocator.lock().free_frames()
    }

    pub fn page_table_frames(&self) -> usize {
        self.allocator.lock().page_table_frames()
    }

    /// Makes `root` the page directory used for translation.
    pub fn load(&self, root: FrameNumber) {
        self.active_root.store(root.0, Ordering::SeqCst);
    }

    /// Stops translating through `root` if it is the active directory.
    pub fn unload(&self, root: FrameNumber) {
        let _ = self.active_root.compare_exchange(
            root.0,
            NO_ROOT,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn active_root(&self) -> Option<FrameNumber> {
        match self.active_root.load(Ordering::SeqCst) {
            NO_ROOT => None,
            root => Some(FrameNumber(root)),
        }
    }

    /// Flushes cached translations if `root` is the active directory. Returns
    /// whether a flush happened.
    pub fn reload(&self, root: FrameNumber) -> bool {
        if self.active_root() != Some(root) {
            return false;
        }
        self.tlb_reloads.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn tlb_reloads(&self) -> usize {
        self.tlb_reloads.load(Ordering::SeqCst)
    }
}
