//! Moving bytes between kernel buffers and a user address space.
//!
//! Every page touched goes through the same translation a user access would,
//! so evicted pages are faulted in and permissions are enforced.

use crate::error::{PagingError, Result};
use crate::paging::Access;
use crate::swapping::page_replacement::PageReplacementPolicy;
use crate::swapping::AddressSpace;
use core::ops::Range;
use demandpage_shared::mem::{OFFSET, PAGE_FRAME_SIZE};

/// Calls `f` once per page overlapped by `len` bytes at `va`, with the frame
/// contents and the byte ranges of the page and of the caller's buffer.
fn for_each_page<P, F>(
    space: &mut AddressSpace<P>,
    va: usize,
    len: usize,
    access: Access,
    user: bool,
    mut f: F,
) -> Result<()>
where
    P: PageReplacementPolicy,
    F: FnMut(&mut [u8], Range<usize>, Range<usize>),
{
    // Trying to reach kernel memory.
    if va.checked_add(len).map_or(true, |end| end > OFFSET) {
        return Err(PagingError::AddressOutOfRange);
    }

    let mut done = 0;
    while done < len {
        let addr = va + done;
        let offset = addr % PAGE_FRAME_SIZE;
        let chunk = (PAGE_FRAME_SIZE - offset).min(len - done);

        let frame = space.access(addr, access, user)?;
        let mut contents = space.page_manager().memory().frame(frame);
        f(&mut contents.0, offset..offset + chunk, done..done + chunk);
        done += chunk;
    }
    Ok(())
}

pub(crate) fn write_bytes<P: PageReplacementPolicy>(
    space: &mut AddressSpace<P>,
    va: usize,
    data: &[u8],
    user: bool,
) -> Result<()> {
    for_each_page(space, va, data.len(), Access::Write, user, |page, at, from| {
        page[at].copy_from_slice(&data[from]);
    })
}

/// Writes `data` into user memory at `va` as the process itself would.
pub fn copy_to_user<P: PageReplacementPolicy>(
    space: &mut AddressSpace<P>,
    va: usize,
    data: &[u8],
) -> Result<()> {
    write_bytes(space, va, data, true)
}

/// Fills `buf` from user memory at `va` as the process itself would.
pub fn copy_from_user<P: PageReplacementPolicy>(
    space: &mut AddressSpace<P>,
    va: usize,
    buf: &mut [u8],
) -> Result<()> {
    let len = buf.len();
    for_each_page(space, va, len, Access::Read, true, |page, at, into| {
        buf[into].copy_from_slice(&page[at]);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapping::page_replacement::SecondChance;
    use crate::swapping::test::{context, PAGE};
    use crate::swapping::Privilege;

    type Space = AddressSpace<SecondChance>;

    #[test]
    fn copies_across_page_boundaries() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(3 * PAGE).unwrap();

        let data: alloc::vec::Vec<u8> = (0..PAGE + 200).map(|i| i as u8).collect();
        copy_to_user(&mut space, PAGE - 100, &data).unwrap();
        let mut back = alloc::vec![0; data.len()];
        copy_from_user(&mut space, PAGE - 100, &mut back).unwrap();
        assert_eq!(back, data);

        let mut head = [0xFF; 4];
        copy_from_user(&mut space, 0, &mut head).unwrap();
        assert_eq!(head, [0; 4]);
    }

    #[test]
    fn rejects_unmapped_and_kernel_addresses() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(PAGE).unwrap();

        let mut buf = [0; 8];
        assert_eq!(
            copy_from_user(&mut space, PAGE + 4, &mut buf),
            Err(PagingError::SegmentationFault(PAGE + 4))
        );
        assert_eq!(
            copy_to_user(&mut space, PAGE - 4, &buf),
            Err(PagingError::SegmentationFault(PAGE))
        );
        assert_eq!(
            copy_to_user(&mut space, OFFSET - 4, &buf),
            Err(PagingError::AddressOutOfRange)
        );
        assert_eq!(
            copy_from_user(&mut space, usize::MAX - 2, &mut buf),
            Err(PagingError::AddressOutOfRange)
        );
        copy_to_user(&mut space, PAGE, &[]).unwrap();
    }

    #[test]
    fn kernel_writes_ignore_user_permissions() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(PAGE).unwrap();
        space.mark_protected(0).unwrap();
        space.protect_page(0).unwrap();

        assert_eq!(
            copy_to_user(&mut space, 16, &[1, 2]),
            Err(PagingError::ProtectionFault(16))
        );
        space.load_bytes(16, &[1, 2]).unwrap();
        let mut buf = [0; 2];
        copy_from_user(&mut space, 16, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }
}
