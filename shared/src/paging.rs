// https://wiki.osdev.org/Paging
// https://wiki.osdev.org/Setting_Up_Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;
use core::{fmt, mem::size_of};

pub const PAGE_DIRECTORY_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageDirectoryEntry>();
pub const PAGE_TABLE_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageTableEntry>();

#[bitfield(u32, default = 0)]
pub struct PageDirectoryEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(7, rw)]
    page_size: bool,
    #[bits(12..=31, rw)]
    page_table_address: u20,
}

/// A hardware page table entry.
///
/// Bits 9 and 10 are ignored by the MMU and are free for the kernel to use.
/// Bit 9 marks a page whose contents live in the backing store, bit 10 marks
/// a page the owning process has asked to be able to write-protect.
#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bit(9, rw)]
    evicted: bool,
    #[bit(10, rw)]
    user_protected: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

/// The entry bits the paging subsystem reads and writes by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageFlag {
    Present,
    Writable,
    User,
    Accessed,
    Evicted,
    UserProtected,
}

impl fmt::Display for PageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Writable => write!(f, "writable"),
            Self::User => write!(f, "user"),
            Self::Accessed => write!(f, "accessed"),
            Self::Evicted => write!(f, "evicted"),
            Self::UserProtected => write!(f, "user-protected"),
        }
    }
}

impl PageTableEntry {
    pub fn flag(self, flag: PageFlag) -> bool {
        match flag {
            PageFlag::Present => self.present(),
            PageFlag::Writable => self.read_write(),
            PageFlag::User => self.user_supervisor(),
            PageFlag::Accessed => self.accessed(),
            PageFlag::Evicted => self.evicted(),
            PageFlag::UserProtected => self.user_protected(),
        }
    }

    pub fn with_flag(self, flag: PageFlag, value: bool) -> Self {
        match flag {
            PageFlag::Present => self.with_present(value),
            PageFlag::Writable => self.with_read_write(value),
            PageFlag::User => self.with_user_supervisor(value),
            PageFlag::Accessed => self.with_accessed(value),
            PageFlag::Evicted => self.with_evicted(value),
            PageFlag::UserProtected => self.with_user_protected(value),
        }
    }

    /// Whether the entry describes a page at all, either in a frame or in the
    /// backing store.
    pub fn is_mapped(self) -> bool {
        self.present() || self.evicted()
    }

    /// Physical address of the frame the entry points at.
    pub fn frame_address(self) -> usize {
        (self.page_frame_address().value() as usize) << 12
    }

    pub fn with_frame_address(self, addr: usize) -> Self {
        self.with_page_frame_address(u20::new((addr >> 12) as u32))
    }
}

impl PageDirectoryEntry {
    pub fn table_address(self) -> usize {
        (self.page_table_address().value() as usize) << 12
    }

    pub fn with_table_address(self, addr: usize) -> Self {
        self.with_page_table_address(u20::new((addr >> 12) as u32))
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

impl VirtualAddress {
    pub fn new(addr: usize) -> Self {
        Self::new_with_raw_value(addr as u32)
    }

    pub fn directory_index(self) -> usize {
        self.page_directory_index().value() as usize
    }

    pub fn table_index(self) -> usize {
        self.page_table_index().value() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_split() {
        let va = VirtualAddress::new(0x0040_3123);
        assert_eq!(va.directory_index(), 1);
        assert_eq!(va.table_index(), 3);
        assert_eq!(va.offset().value(), 0x123);
    }

    #[test]
    fn entry_flags() {
        let entry = PageTableEntry::default()
            .with_flag(PageFlag::Evicted, true)
            .with_flag(PageFlag::Writable, true)
            .with_frame_address(0x0012_3000);
        assert!(entry.is_mapped());
        assert!(!entry.flag(PageFlag::Present));
        assert!(entry.flag(PageFlag::Writable));
        assert_eq!(entry.raw_value() & (1 << 9), 1 << 9);
        assert_eq!(entry.frame_address(), 0x0012_3000);
        assert!(!PageTableEntry::default().is_mapped());
    }
}
