//! User address spaces with demand paging.
//!
//! An [`AddressSpace`] owns a page table, the descriptors of every user page,
//! and a swap file. Once [`MAX_RESIDENT_PAGES`] pages are in frames, bringing
//! another one in first pushes a victim out to the swap file.
//!
//! The operations are split by concern:
//! - `fault`: eviction and swap-in, including the overflow page
//! - `resize`: growing and shrinking the heap
//! - `lifecycle`: fork and exec
//! - `protection`: user-requested write protection

pub mod descriptors;
mod fault;
mod lifecycle;
pub mod offsets;
pub mod page_replacement;
mod protection;
mod resize;
pub mod swap_file;

pub use self::lifecycle::ImageSegment;

use self::descriptors::DescriptorTable;
use self::offsets::{OffsetAllocator, SwapOffset};
use self::page_replacement::PageReplacementPolicy;
use self::swap_file::{SwapFile, SwapFileSystem};
use crate::config::{SelectedPolicy, MAX_RESIDENT_PAGES};
use crate::error::{PagingError, Result};
use crate::mem::{FrameNumber, PhysicalMemory};
use crate::paging::PageManager;
use crate::threading::process::Pid;
use alloc::{boxed::Box, sync::Arc};
use core::{fmt, marker::PhantomData};
use demandpage_shared::eprintln;
use demandpage_shared::mem::PAGE_FRAME_SIZE;

/// What every address space needs from the rest of the machine.
#[derive(Clone)]
pub struct PagingContext {
    pub memory: Arc<PhysicalMemory>,
    pub swap_fs: Arc<dyn SwapFileSystem>,
}

impl PagingContext {
    pub fn new(memory: Arc<PhysicalMemory>, swap_fs: Arc<dyn SwapFileSystem>) -> Self {
        Self { memory, swap_fs }
    }
}

/// System processes (init and the shell) never get a swap file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Privilege {
    System,
    User,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagingStats {
    pub page_faults: usize,
    pub paged_out: usize,
}

/// A victim that was unmapped while the evicted table was full. It keeps its
/// frame until a slot opens up in the table.
#[derive(Clone, Copy, Debug)]
struct OverflowPage {
    va: usize,
    frame: FrameNumber,
}

/// One line of the process listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagingReport {
    pub pid: Pid,
    pub allocated_pages: usize,
    pub paged_out_pages: usize,
    pub protected_pages: usize,
    pub page_faults: usize,
    pub paged_out_total: usize,
}

impl fmt::Display for PagingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.pid,
            self.allocated_pages,
            self.paged_out_pages,
            self.protected_pages,
            self.page_faults,
            self.paged_out_total
        )
    }
}

pub struct AddressSpace<P: PageReplacementPolicy = SelectedPolicy> {
    pid: Pid,
    privilege: Privilege,
    context: PagingContext,
    pages: PageManager,
    resident: DescriptorTable,
    evicted: DescriptorTable,
    offsets: OffsetAllocator,
    load_counter: u64,
    swap_file: Option<Box<dyn SwapFile>>,
    overflow: Option<OverflowPage>,
    size: usize,
    stats: PagingStats,
    _policy: PhantomData<fn() -> P>,
}

impl<P: PageReplacementPolicy> AddressSpace<P> {
    pub fn new(context: &PagingContext, pid: Pid, privilege: Privilege) -> Result<Self> {
        let pages = PageManager::new(context.memory.clone())?;

        let swap_file = if privilege == Privilege::User && P::PAGING {
            let file = context.swap_fs.create(pid).map_err(|err| {
                eprintln!("pid {pid}: cannot create swap file: {err}");
                PagingError::BackingStoreFailure
            })?;
            Some(file)
        } else {
            None
        };

        Ok(Self {
            pid,
            privilege,
            context: context.clone(),
            pages,
            resident: DescriptorTable::resident(),
            evicted: DescriptorTable::evicted(),
            offsets: OffsetAllocator::default(),
            load_counter: 0,
            swap_file,
            overflow: None,
            size: 0,
            stats: PagingStats::default(),
            _policy: PhantomData,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// Bytes of user memory, starting at address zero.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn resident(&self) -> &DescriptorTable {
        &self.resident
    }

    pub fn evicted(&self) -> &DescriptorTable {
        &self.evicted
    }

    pub fn load_counter(&self) -> u64 {
        self.load_counter
    }

    pub fn min_free_offset(&self) -> SwapOffset {
        self.offsets.min_free()
    }

    /// Address of the page waiting for a free evicted-table slot, if any.
    pub fn overflow_page(&self) -> Option<usize> {
        self.overflow.map(|page| page.va)
    }

    pub fn stats(&self) -> PagingStats {
        self.stats
    }

    pub fn has_swap_file(&self) -> bool {
        self.swap_file.is_some()
    }

    pub fn page_manager(&self) -> &PageManager {
        &self.pages
    }

    /// Makes this the address space the MMU translates through.
    pub fn activate(&self) {
        self.pages.load();
    }

    pub fn is_active(&self) -> bool {
        self.pages.is_active()
    }

    pub fn report(&self) -> PagingReport {
        let mapped = self.pages.mapped_pages();
        PagingReport {
            pid: self.pid,
            allocated_pages: mapped.len(),
            paged_out_pages: self.evicted.len() + usize::from(self.overflow.is_some()),
            protected_pages: mapped
                .iter()
                .filter(|(_, entry)| entry.user_protected())
                .count(),
            page_faults: self.stats.page_faults,
            paged_out_total: self.stats.paged_out,
        }
    }

    /// Number of user pages the address space covers.
    fn page_count(&self) -> usize {
        self.size.div_ceil(PAGE_FRAME_SIZE)
    }

    fn can_page(&self) -> bool {
        P::PAGING && self.swap_file.is_some()
    }

    fn has_resident_room(&self) -> bool {
        self.resident.len() < MAX_RESIDENT_PAGES
    }
}

impl<P: PageReplacementPolicy> Drop for AddressSpace<P> {
    fn drop(&mut self) {
        // The overflow frame is unmapped, so the page table does not own it.
        if let Some(overflow) = self.overflow.take() {
            self.context.memory.free_frame(overflow.frame);
        }
        if let Some(file) = self.swap_file.take() {
            self.context.swap_fs.remove(file);
        }
    }
}
