//! Fork and exec.

use super::page_replacement::PageReplacementPolicy;
use super::{AddressSpace, OverflowPage};
use crate::config::USER_STACK_PAGES;
use crate::error::{PagingError, Result};
use crate::mem::{user, FrameNumber};
use crate::paging::MapFlags;
use alloc::vec::Vec;
use demandpage_shared::mem::{is_page_aligned, page_round_up, OFFSET, PAGE_FRAME_SIZE};
use demandpage_shared::paging::PageFlag;

/// One loadable piece of an executable: `data` goes at `vaddr`, and the rest
/// of `mem_size` is zero-filled.
#[derive(Clone, Debug, Default)]
pub struct ImageSegment {
    pub vaddr: usize,
    pub mem_size: usize,
    pub data: Vec<u8>,
}

impl<P: PageReplacementPolicy> AddressSpace<P> {
    /// Copies this address space into `child`, which must be freshly created.
    /// Frames are duplicated, evicted pages stay evicted, and the swap file is
    /// copied so the child's slots hold the same data as the parent's.
    pub fn duplicate_into(&mut self, child: &mut AddressSpace<P>) -> Result<()> {
        if child.size != 0 || !child.pages.mapped_pages().is_empty() {
            return Err(PagingError::AlreadyMapped(0));
        }
        let memory = self.context.memory.clone();

        for (va, entry) in self.pages.mapped_pages() {
            let flags = MapFlags::of(entry);
            if !entry.present() {
                child.pages.map(va, None, flags)?;
                continue;
            }

            let frame = memory.alloc_frame()?;
            memory.copy_frame(FrameNumber::from_phys_addr(entry.frame_address()), frame);
            if let Err(err) = child.pages.map(va, Some(frame), flags) {
                memory.free_frame(frame);
                return Err(err);
            }
        }

        if let Some(overflow) = self.overflow {
            let frame = memory.alloc_frame()?;
            memory.copy_frame(overflow.frame, frame);
            child.overflow = Some(OverflowPage {
                va: overflow.va,
                frame,
            });
        }

        self.copy_swap_file(child)?;

        child.resident = self.resident.clone();
        child.evicted = self.evicted.clone();
        child.offsets = self.offsets.clone();
        child.load_counter = self.load_counter;
        child.size = self.size;
        Ok(())
    }

    fn copy_swap_file(&mut self, child: &mut AddressSpace<P>) -> Result<()> {
        let Some(src) = self.swap_file.as_mut() else {
            return Ok(());
        };
        let Some(dst) = child.swap_file.as_mut() else {
            return if self.evicted.is_empty() {
                Ok(())
            } else {
                Err(PagingError::BackingStoreFailure)
            };
        };

        let mut buf = alloc::vec![0; PAGE_FRAME_SIZE];
        let mut offset = 0;
        while offset < src.len() {
            let read = src
                .read(&mut buf, offset)
                .map_err(|_| PagingError::BackingStoreFailure)?;
            if read == 0 {
                break;
            }
            if dst.write(&buf[..read], offset) != Ok(read) {
                return Err(PagingError::BackingStoreFailure);
            }
            offset += read;
        }
        Ok(())
    }

    /// Replaces the contents of this address space with a new image followed
    /// by a guard page and a stack page, and returns the new size.
    ///
    /// The image is built in a separate address space with its own swap file.
    /// Only when all of it is in place does it take over, so a failure at any
    /// point leaves the old image exactly as it was.
    pub fn replace_image<I>(&mut self, segments: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<ImageSegment>>,
    {
        let mut image = Self::new(&self.context, self.pid, self.privilege)?;
        image.load_image(segments)?;
        image.stats = self.stats;

        let was_active = self.is_active();
        let old = core::mem::replace(self, image);
        if was_active {
            self.activate();
        }
        drop(old);

        Ok(self.size)
    }

    fn load_image<I>(&mut self, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<ImageSegment>>,
    {
        for segment in segments {
            let segment = segment?;
            if !is_page_aligned(segment.vaddr) {
                return Err(PagingError::Misaligned(segment.vaddr));
            }
            if segment.data.len() > segment.mem_size {
                return Err(PagingError::ImageLoad);
            }
            let end = segment
                .vaddr
                .checked_add(segment.mem_size)
                .filter(|&end| end <= OFFSET)
                .ok_or(PagingError::AddressOutOfRange)?;

            if end > self.size {
                self.allocate_range(self.size, end)?;
                self.size = end;
            }
            self.load_bytes(segment.vaddr, &segment.data)?;
        }

        let guard = page_round_up(self.size);
        let top = guard + USER_STACK_PAGES * PAGE_FRAME_SIZE;
        if top > OFFSET {
            return Err(PagingError::AddressOutOfRange);
        }
        self.allocate_range(self.size, top)?;
        self.size = top;
        self.pages.clear_flag(PageFlag::User, guard)
    }

    /// Writes `data` at `va` with kernel privileges, faulting pages in as
    /// needed.
    pub fn load_bytes(&mut self, va: usize, data: &[u8]) -> Result<()> {
        user::write_bytes(self, va, data, false)
    }
}

#[cfg(test)]
mod tests {
    use super::super::page_replacement::SecondChance;
    use super::super::test::{
        check_invariants, check_stamp, context, faulty_context, pattern, stamp, PAGE,
    };
    use super::super::Privilege;
    use super::*;
    use crate::config::{MAX_RESIDENT_PAGES, MAX_TOTAL_PAGES};
    use crate::mem::user::{copy_from_user, copy_to_user};
    use core::sync::atomic::Ordering;

    type Space = AddressSpace<SecondChance>;

    fn page_segment(index: usize) -> Result<ImageSegment> {
        Ok(ImageSegment {
            vaddr: index * PAGE,
            mem_size: PAGE,
            data: pattern(index),
        })
    }

    #[test]
    fn fork_copies_every_page() {
        let (ctx, swap_fs) = context(128);
        let mut parent = Space::new(&ctx, 3, Privilege::User).unwrap();
        parent.grow(20 * PAGE).unwrap();
        for i in 0..20 {
            stamp(&mut parent, i);
        }

        let mut child = Space::new(&ctx, 4, Privilege::User).unwrap();
        parent.duplicate_into(&mut child).unwrap();
        assert_eq!(swap_fs.live_files(), 2);
        assert_eq!(child.size(), parent.size());
        assert_eq!(child.load_counter(), parent.load_counter());
        assert_eq!(child.min_free_offset(), parent.min_free_offset());
        for page in parent.evicted().iter() {
            assert_eq!(child.evicted().find(page.virtual_page), Some(page));
        }
        for page in parent.resident().iter() {
            assert_eq!(child.resident().find(page.virtual_page), Some(page));
        }
        check_invariants(&child);

        for i in 0..20 {
            check_stamp(&mut child, i);
        }
        check_invariants(&child);
    }

    #[test]
    fn fork_children_are_isolated() {
        let (ctx, _) = context(128);
        let mut parent = Space::new(&ctx, 3, Privilege::User).unwrap();
        parent.grow(20 * PAGE).unwrap();
        for i in 0..20 {
            stamp(&mut parent, i);
        }
        let evicted_page = parent.evicted().iter().next().unwrap().virtual_page;

        let mut child = Space::new(&ctx, 4, Privilege::User).unwrap();
        parent.duplicate_into(&mut child).unwrap();
        let resident: Vec<_> = parent.resident().iter().copied().collect();
        let evicted: Vec<_> = parent.evicted().iter().copied().collect();
        let min_free = parent.min_free_offset();
        let load_counter = parent.load_counter();
        let stats = parent.stats();

        copy_to_user(&mut child, 0, &[0xEE; 64]).unwrap();
        copy_to_user(&mut child, evicted_page, &[0xDD; 64]).unwrap();
        for i in (1..20).rev().filter(|&i| i * PAGE != evicted_page) {
            check_stamp(&mut child, i);
        }
        assert!(child.stats().paged_out > 0);

        assert!(parent.resident().iter().copied().eq(resident));
        assert!(parent.evicted().iter().copied().eq(evicted));
        assert_eq!(parent.min_free_offset(), min_free);
        assert_eq!(parent.load_counter(), load_counter);
        assert_eq!(parent.stats(), stats);

        for i in 0..20 {
            check_stamp(&mut parent, i);
        }
        let mut buf = [0; 64];
        copy_from_user(&mut child, evicted_page, &mut buf).unwrap();
        assert_eq!(buf, [0xDD; 64]);
        check_invariants(&parent);
        check_invariants(&child);

        drop(child);
        for i in 0..20 {
            check_stamp(&mut parent, i);
        }
    }

    #[test]
    fn fork_into_used_space_is_rejected() {
        let (ctx, _) = context(32);
        let mut parent = Space::new(&ctx, 3, Privilege::User).unwrap();
        parent.grow(PAGE).unwrap();
        let mut child = Space::new(&ctx, 4, Privilege::User).unwrap();
        child.grow(PAGE).unwrap();
        assert_eq!(
            parent.duplicate_into(&mut child),
            Err(PagingError::AlreadyMapped(0))
        );
    }

    #[test]
    fn failed_fork_leaks_nothing() {
        let (ctx, _) = context(24);
        let mut parent = Space::new(&ctx, 3, Privilege::User).unwrap();
        parent.grow(12 * PAGE).unwrap();
        let free = ctx.memory.free_frames();

        let mut child = Space::new(&ctx, 4, Privilege::User).unwrap();
        assert_eq!(
            parent.duplicate_into(&mut child),
            Err(PagingError::FrameExhausted)
        );
        drop(child);
        assert_eq!(ctx.memory.free_frames(), free);
    }

    #[test]
    fn pending_overflow_survives_fork_and_teardown() {
        let (ctx, switches) = faulty_context(128);
        let mut parent = Space::new(&ctx, 3, Privilege::User).unwrap();
        parent.grow(MAX_TOTAL_PAGES * PAGE).unwrap();
        for i in 0..MAX_TOTAL_PAGES {
            stamp(&mut parent, i);
        }
        let target = parent.evicted().iter().next().unwrap().virtual_page;

        // The victim cannot be written out, but the faulting page still
        // comes in.
        switches.fail_writes.store(true, Ordering::SeqCst);
        assert_eq!(
            parent.handle_fault(target),
            Err(PagingError::BackingStoreFailure)
        );
        assert!(parent.resident().find(target).is_some());
        let overflow = parent.overflow_page().unwrap();
        check_invariants(&parent);
        assert_eq!(parent.report().paged_out_pages, MAX_RESIDENT_PAGES);

        switches.fail_writes.store(false, Ordering::SeqCst);
        let mut child = Space::new(&ctx, 4, Privilege::User).unwrap();
        parent.duplicate_into(&mut child).unwrap();
        assert_eq!(child.overflow_page(), Some(overflow));

        // Touching the overflow page in the child writes it out properly and
        // faults it back in.
        check_stamp(&mut child, overflow / PAGE);
        assert_eq!(child.overflow_page(), None);
        check_invariants(&child);
        for i in 0..MAX_TOTAL_PAGES {
            check_stamp(&mut child, i);
        }

        drop(child);
        drop(parent);
        assert_eq!(ctx.memory.free_frames(), 128);
        assert_eq!(switches.live_files.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exec_replaces_image() {
        let (ctx, swap_fs) = context(128);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(3 * PAGE).unwrap();
        space.activate();

        let segments = (0..2).map(page_segment);
        assert_eq!(space.replace_image(segments), Ok(4 * PAGE));
        assert!(space.is_active());
        assert_eq!(swap_fs.live_files(), 1);

        check_stamp(&mut space, 0);
        check_stamp(&mut space, 1);
        let mut buf = [0; 8];
        assert_eq!(
            copy_from_user(&mut space, 2 * PAGE, &mut buf),
            Err(PagingError::ProtectionFault(2 * PAGE))
        );
        copy_to_user(&mut space, 3 * PAGE + 100, &[1; 8]).unwrap();
        check_invariants(&space);

        // Directory, page table and four pages.
        assert_eq!(ctx.memory.free_frames(), 128 - 6);
    }

    #[test]
    fn exec_larger_than_frame_limit() {
        let (ctx, _) = context(128);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        let pages = MAX_RESIDENT_PAGES + 6;
        space
            .replace_image((0..pages).map(page_segment))
            .unwrap();
        assert_eq!(space.size(), (pages + USER_STACK_PAGES) * PAGE);
        assert!(!space.evicted().is_empty());
        for i in 0..pages {
            check_stamp(&mut space, i);
        }
        check_invariants(&space);
    }

    #[test]
    fn failed_exec_keeps_old_image() {
        let (ctx, swap_fs) = context(128);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(3 * PAGE).unwrap();
        for i in 0..3 {
            stamp(&mut space, i);
        }
        let resident: Vec<_> = space.resident().iter().copied().collect();
        let free = ctx.memory.free_frames();

        let segments = (0..20).map(|i| {
            if i == 14 {
                Err(PagingError::ImageLoad)
            } else {
                page_segment(i)
            }
        });
        assert_eq!(space.replace_image(segments), Err(PagingError::ImageLoad));

        assert_eq!(space.size(), 3 * PAGE);
        let after: Vec<_> = space.resident().iter().copied().collect();
        assert_eq!(after, resident);
        assert_eq!(ctx.memory.free_frames(), free);
        assert_eq!(swap_fs.live_files(), 1);
        for i in 0..3 {
            check_stamp(&mut space, i);
        }
    }

    #[test]
    fn exec_rejects_bad_segments() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        let misaligned = ImageSegment {
            vaddr: 10,
            mem_size: PAGE,
            data: Vec::new(),
        };
        assert_eq!(
            space.replace_image([Ok(misaligned)]),
            Err(PagingError::Misaligned(10))
        );
        let oversized = ImageSegment {
            vaddr: 0,
            mem_size: 4,
            data: alloc::vec![0; 8],
        };
        assert_eq!(
            space.replace_image([Ok(oversized)]),
            Err(PagingError::ImageLoad)
        );
        assert_eq!(space.size(), 0);
    }
}
