//! Memory system calls.
//!
//! Each call works on the running process and returns a non-negative result
//! or a negated errno.

use crate::error::PagingError;
use crate::swapping::ImageSegment;
use crate::system::{running_process, unwrap_system};
use crate::threading::process::{Process, ProcessTable};
use alloc::vec::Vec;
use demandpage_shared::mem::PAGE_FRAME_SIZE;

pub const EIO: isize = 5;
pub const EAGAIN: isize = 11;
pub const ENOMEM: isize = 12;
pub const EFAULT: isize = 14;
pub const EINVAL: isize = 22;

impl PagingError {
    pub fn errno(self) -> isize {
        match self {
            Self::BackingStoreFailure => EIO,
            Self::NoProcessSlot => EAGAIN,
            Self::CapacityExceeded
            | Self::FrameExhausted
            | Self::OutOfMemory
            | Self::DoubleOverflow
            | Self::NoVictim => ENOMEM,
            Self::SegmentationFault(_)
            | Self::ProtectionFault(_)
            | Self::NotMapped(_)
            | Self::NotPresent(_)
            | Self::AddressOutOfRange => EFAULT,
            Self::AlreadyMapped(_)
            | Self::InvalidFlag(_)
            | Self::NoDescriptor(_)
            | Self::NotEvicted(_)
            | Self::Misaligned(_)
            | Self::ImageLoad => EINVAL,
        }
    }
}

fn to_syscall_result(result: crate::Result<usize>) -> isize {
    match result {
        Ok(value) => isize::try_from(value).unwrap_or(-EINVAL),
        Err(err) => -err.errno(),
    }
}

fn with_running<F>(f: F) -> isize
where
    F: FnOnce(&Process) -> crate::Result<usize>,
{
    match running_process() {
        Some(process) => to_syscall_result(f(&process)),
        None => -EFAULT,
    }
}

pub(crate) fn fork(table: &ProcessTable, parent: &Process) -> isize {
    to_syscall_result(table.fork(parent).map(|child| usize::from(child.pid)))
}

pub(crate) fn exec(process: &Process, segments: Vec<ImageSegment>) -> isize {
    to_syscall_result(process.exec(segments.into_iter().map(Ok)).map(|_| 0))
}

/// Grows or shrinks the heap by `delta` bytes and returns the old break.
pub fn sys_sbrk(delta: isize) -> isize {
    with_running(|process| process.sbrk(delta))
}

/// Returns the child's pid.
pub fn sys_fork() -> isize {
    let (Some(system), Some(parent)) = (unwrap_system(), running_process()) else {
        return -EFAULT;
    };
    fork(&system.processes, &parent)
}

/// Replaces the running program with the segments handed over by the
/// executable loader.
pub fn sys_exec(segments: Vec<ImageSegment>) -> isize {
    match running_process() {
        Some(process) => exec(&process, segments),
        None => -EFAULT,
    }
}

fn pmalloc(process: &Process) -> crate::Result<usize> {
    let mut space = process.space();
    let size = space.size();
    let va = size.next_multiple_of(PAGE_FRAME_SIZE);
    space.grow(va + PAGE_FRAME_SIZE - size)?;
    space.mark_protected(va)?;
    Ok(va)
}

/// Adds a page to the heap for the user-level page allocator and marks it as
/// one that may later be protected. Returns its address.
pub fn sys_pmalloc() -> isize {
    with_running(pmalloc)
}

pub fn sys_protect_page(va: usize) -> isize {
    with_running(|process| process.space().protect_page(va).map(|()| 0))
}

pub fn sys_pfree(va: usize) -> isize {
    with_running(|process| process.space().release_protected(va).map(|()| 0))
}
