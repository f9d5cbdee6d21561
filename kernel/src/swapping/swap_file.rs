//! Per-process swap files.
//!
//! The paging code reads and writes whole pages at page-aligned offsets. The
//! in-memory implementation stores them sector by sector, the way a block
//! device would.

use crate::threading::process::Pid;
use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use demandpage_shared::sizes::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapIoError {
    /// The file would grow past its limit
    NoSpace,
    /// The offset is not sector-aligned
    Misaligned,
    /// The device reported an error
    Device,
}

impl core::fmt::Display for SwapIoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no space left in swap file"),
            Self::Misaligned => write!(f, "unaligned swap file access"),
            Self::Device => write!(f, "swap device error"),
        }
    }
}

impl core::error::Error for SwapIoError {}

pub trait SwapFile: Send {
    /// Reads into `buf` starting at byte `offset`. Returns how many bytes were
    /// read, which is short at the end of the file.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<usize, SwapIoError>;

    /// Writes `buf` at byte `offset`, growing the file as needed. Returns how
    /// many bytes were written.
    fn write(&mut self, buf: &[u8], offset: usize) -> Result<usize, SwapIoError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait SwapFileSystem: Send + Sync {
    fn create(&self, pid: Pid) -> Result<Box<dyn SwapFile>, SwapIoError>;

    fn remove(&self, file: Box<dyn SwapFile>);
}

type Sector = [u8; SECTOR_SIZE];

struct TempSwapFile {
    sectors: Vec<Sector>,
    max_sectors: usize,
}

impl SwapFile for TempSwapFile {
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<usize, SwapIoError> {
        if offset % SECTOR_SIZE != 0 {
            return Err(SwapIoError::Misaligned);
        }

        let first = offset / SECTOR_SIZE;
        let mut read = 0;
        for (chunk, sector) in buf
            .chunks_mut(SECTOR_SIZE)
            .zip(self.sectors.iter().skip(first))
        {
            chunk.copy_from_slice(&sector[..chunk.len()]);
            read += chunk.len();
        }
        Ok(read)
    }

    fn write(&mut self, buf: &[u8], offset: usize) -> Result<usize, SwapIoError> {
        if offset % SECTOR_SIZE != 0 {
            return Err(SwapIoError::Misaligned);
        }

        let first = offset / SECTOR_SIZE;
        let end = first + buf.len().div_ceil(SECTOR_SIZE);
        if end > self.max_sectors {
            return Err(SwapIoError::NoSpace);
        }
        if self.sectors.len() < end {
            self.sectors.resize(end, [0; SECTOR_SIZE]);
        }

        for (chunk, sector) in buf.chunks(SECTOR_SIZE).zip(&mut self.sectors[first..end]) {
            sector[..chunk.len()].copy_from_slice(chunk);
        }
        Ok(buf.len())
    }

    fn len(&self) -> usize {
        self.sectors.len() * SECTOR_SIZE
    }
}

/// Swap files kept in kernel memory.
pub struct TempSwapFs {
    max_sectors: usize,
    live_files: AtomicUsize,
}

impl TempSwapFs {
    /// Every file this creates holds at most `max_sectors` sectors.
    pub fn new(max_sectors: usize) -> Self {
        Self {
            max_sectors,
            live_files: AtomicUsize::new(0),
        }
    }

    /// Files created and not yet removed.
    pub fn live_files(&self) -> usize {
        self.live_files.load(Ordering::SeqCst)
    }
}

impl SwapFileSystem for TempSwapFs {
    fn create(&self, _pid: Pid) -> Result<Box<dyn SwapFile>, SwapIoError> {
        self.live_files.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TempSwapFile {
            sectors: Vec::new(),
            max_sectors: self.max_sectors,
        }))
    }

    fn remove(&self, file: Box<dyn SwapFile>) {
        drop(file);
        self.live_files.fetch_sub(1, Ordering::SeqCst);
    }
}
