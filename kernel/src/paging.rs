//! Two-level x86 page tables for one address space.

use crate::error::{PagingError, Result};
use crate::mem::{FrameNumber, PhysicalMemory};
use alloc::{sync::Arc, vec::Vec};
use demandpage_shared::mem::{page_round_down, OFFSET, PAGE_FRAME_SIZE};
use demandpage_shared::paging::{
    PageDirectoryEntry, PageFlag, PageTableEntry, VirtualAddress, PAGE_DIRECTORY_LEN,
    PAGE_TABLE_LEN,
};

/// Permission bits for a new mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapFlags {
    pub writable: bool,
    pub user: bool,
    pub user_protected: bool,
}

impl MapFlags {
    pub const USER_RW: Self = Self {
        writable: true,
        user: true,
        user_protected: false,
    };

    /// The permission bits carried by an existing entry.
    pub fn of(entry: PageTableEntry) -> Self {
        Self {
            writable: entry.read_write(),
            user: entry.user_supervisor(),
            user_protected: entry.user_protected(),
        }
    }

    fn apply(self, entry: PageTableEntry) -> PageTableEntry {
        entry
            .with_read_write(self.writable)
            .with_user_supervisor(self.user)
            .with_user_protected(self.user_protected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Owns a page directory and the page tables hanging off it. All of them, and
/// every frame mapped present, live in frames taken from `memory` and are
/// returned there on drop.
pub struct PageManager {
    memory: Arc<PhysicalMemory>,
    root: FrameNumber,
}

impl PageManager {
    pub fn new(memory: Arc<PhysicalMemory>) -> Result<Self> {
        let root = memory.alloc_page_table()?;
        Ok(Self { memory, root })
    }

    pub fn root(&self) -> FrameNumber {
        self.root
    }

    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    fn directory_entry(&self, va: VirtualAddress) -> PageDirectoryEntry {
        let raw = self.memory.frame(self.root).entries()[va.directory_index()];
        PageDirectoryEntry::new_with_raw_value(raw)
    }

    /// The frame holding the page table for `va`, creating it if `create` is
    /// set.
    fn page_table(&self, va: VirtualAddress, create: bool) -> Result<Option<FrameNumber>> {
        let pde = self.directory_entry(va);
        if pde.present() {
            return Ok(Some(FrameNumber::from_phys_addr(pde.table_address())));
        }
        if !create {
            return Ok(None);
        }

        let table = self.memory.alloc_page_table()?;
        // Permissions are enforced per page, so the directory grants everything.
        let pde = PageDirectoryEntry::DEFAULT
            .with_present(true)
            .with_read_write(true)
            .with_user_supervisor(true)
            .with_table_address(table.phys_addr());
        self.memory.frame(self.root).entries_mut()[va.directory_index()] = pde.raw_value();
        Ok(Some(table))
    }

    fn read_entry(&self, va: usize) -> Option<PageTableEntry> {
        let va = VirtualAddress::new(va);
        let table = self.page_table(va, false).ok()??;
        let raw = self.memory.frame(table).entries()[va.table_index()];
        Some(PageTableEntry::new_with_raw_value(raw))
    }

    fn write_entry(&mut self, va: usize, entry: PageTableEntry) -> Result<()> {
        let va = VirtualAddress::new(va);
        let table = self
            .page_table(va, true)?
            .ok_or(PagingError::OutOfMemory)?;
        self.memory.frame(table).entries_mut()[va.table_index()] = entry.raw_value();
        Ok(())
    }

    fn mapped_entry(&self, va: usize) -> Result<PageTableEntry> {
        self.lookup(va).ok_or(PagingError::NotMapped(va))
    }

    /// Installs a translation for the page at `va`. With a frame the page is
    /// present; without one it is marked as living in the swap file.
    pub fn map(&mut self, va: usize, frame: Option<FrameNumber>, flags: MapFlags) -> Result<()> {
        let va = page_round_down(va);
        if va >= OFFSET {
            return Err(PagingError::AddressOutOfRange);
        }
        if self.lookup(va).is_some() {
            return Err(PagingError::AlreadyMapped(va));
        }

        let entry = flags.apply(PageTableEntry::DEFAULT);
        let entry = match frame {
            Some(frame) => entry
                .with_present(true)
                .with_frame_address(frame.phys_addr()),
            None => entry.with_evicted(true),
        };
        self.write_entry(va, entry)
    }

    /// Removes the translation for `va` and returns what it was. The frame it
    /// pointed at, if any, is not freed.
    pub fn unmap(&mut self, va: usize) -> Result<PageTableEntry> {
        let va = page_round_down(va);
        let entry = self.mapped_entry(va)?;
        self.write_entry(va, PageTableEntry::DEFAULT)?;
        Ok(entry)
    }

    /// The entry for `va` if it is present or marked evicted.
    pub fn lookup(&self, va: usize) -> Option<PageTableEntry> {
        self.read_entry(page_round_down(va))
            .filter(|entry| entry.is_mapped())
    }

    /// The frame backing `va` if it is present.
    pub fn frame_of(&self, va: usize) -> Option<FrameNumber> {
        self.lookup(va)
            .filter(|entry| entry.present())
            .map(|entry| FrameNumber::from_phys_addr(entry.frame_address()))
    }

    fn update_flag(&mut self, flag: PageFlag, va: usize, value: bool) -> Result<()> {
        if matches!(flag, PageFlag::Present | PageFlag::Evicted) {
            return Err(PagingError::InvalidFlag(flag));
        }
        let va = page_round_down(va);
        let entry = self.mapped_entry(va)?;
        self.write_entry(va, entry.with_flag(flag, value))
    }

    pub fn set_flag(&mut self, flag: PageFlag, va: usize) -> Result<()> {
        self.update_flag(flag, va, true)
    }

    pub fn clear_flag(&mut self, flag: PageFlag, va: usize) -> Result<()> {
        self.update_flag(flag, va, false)
    }

    pub fn test_flag(&self, flag: PageFlag, va: usize) -> Result<bool> {
        Ok(self.mapped_entry(va)?.flag(flag))
    }

    /// Points an evicted entry at `frame` and marks it present, keeping its
    /// permission bits.
    pub fn frame_in(&mut self, va: usize, frame: FrameNumber) -> Result<()> {
        let va = page_round_down(va);
        let entry = self.mapped_entry(va)?;
        if entry.present() {
            return Err(PagingError::AlreadyMapped(va));
        }
        let entry = entry
            .with_evicted(false)
            .with_accessed(false)
            .with_dirty(false)
            .with_present(true)
            .with_frame_address(frame.phys_addr());
        self.write_entry(va, entry)
    }

    /// Marks a present entry as evicted and returns the frame it used to point
    /// at. The frame is not freed.
    pub fn frame_out(&mut self, va: usize) -> Result<FrameNumber> {
        let va = page_round_down(va);
        let entry = self.mapped_entry(va)?;
        if !entry.present() {
            return Err(PagingError::NotPresent(va));
        }
        let frame = FrameNumber::from_phys_addr(entry.frame_address());
        let entry = entry
            .with_present(false)
            .with_evicted(true)
            .with_frame_address(0);
        self.write_entry(va, entry)?;
        Ok(frame)
    }

    /// Walks the tables the way the MMU would for an access to `va`, setting
    /// the accessed and dirty bits on success.
    pub fn translate(&mut self, va: usize, access: Access, user: bool) -> Result<FrameNumber> {
        let page = page_round_down(va);
        let entry = self
            .lookup(page)
            .ok_or(PagingError::SegmentationFault(va))?;
        if !entry.present() {
            return Err(PagingError::NotPresent(va));
        }
        if user && !entry.user_supervisor() {
            return Err(PagingError::ProtectionFault(va));
        }
        if user && access == Access::Write && !entry.read_write() {
            return Err(PagingError::ProtectionFault(va));
        }

        let entry = entry
            .with_accessed(true)
            .with_dirty(entry.dirty() || access == Access::Write);
        self.write_entry(page, entry)?;
        Ok(FrameNumber::from_phys_addr(entry.frame_address()))
    }

    /// Every present or evicted user page, in address order.
    pub fn mapped_pages(&self) -> Vec<(usize, PageTableEntry)> {
        let mut pages = Vec::new();
        let directory = *self.memory.frame(self.root).entries();
        for (pdi, &raw) in directory.iter().enumerate().take(OFFSET >> 22) {
            let pde = PageDirectoryEntry::new_with_raw_value(raw);
            if !pde.present() {
                continue;
            }
            let table = FrameNumber::from_phys_addr(pde.table_address());
            let entries = *self.memory.frame(table).entries();
            pages.extend(
                entries
                    .iter()
                    .enumerate()
                    .map(|(pti, &raw)| {
                        let va = (pdi * PAGE_TABLE_LEN + pti) * PAGE_FRAME_SIZE;
                        (va, PageTableEntry::new_with_raw_value(raw))
                    })
                    .filter(|(_, entry)| entry.is_mapped()),
            );
        }
        pages
    }

    pub fn load(&self) {
        self.memory.load(self.root);
    }

    pub fn is_active(&self) -> bool {
        self.memory.active_root() == Some(self.root)
    }

    /// Flushes stale translations if this is the active address space.
    pub fn reload_if_active(&self) -> bool {
        self.memory.reload(self.root)
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        self.memory.unload(self.root);

        for (_, entry) in self.mapped_pages() {
            if entry.present() {
                self.memory
                    .free_frame(FrameNumber::from_phys_addr(entry.frame_address()));
            }
        }

        let directory = *self.memory.frame(self.root).entries();
        for &raw in directory.iter().take(PAGE_DIRECTORY_LEN) {
            let pde = PageDirectoryEntry::new_with_raw_value(raw);
            if pde.present() {
                self.memory
                    .free_frame(FrameNumber::from_phys_addr(pde.table_address()));
            }
        }
        self.memory.free_frame(self.root);
    }
}
