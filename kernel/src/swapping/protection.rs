//! Pages a process has asked to make read-only.
//!
//! A page is first marked as user-protected, typically when it is handed out
//! by the user-level page allocator. Only marked pages may then be switched to
//! read-only, and releasing one makes it writable again. The bits live in the
//! page table entry, so they survive eviction and fork.

use super::page_replacement::PageReplacementPolicy;
use super::AddressSpace;
use crate::error::{PagingError, Result};
use demandpage_shared::mem::is_page_aligned;
use demandpage_shared::paging::PageFlag;

impl<P: PageReplacementPolicy> AddressSpace<P> {
    fn check_protectable(&self, va: usize) -> Result<()> {
        if !is_page_aligned(va) {
            return Err(PagingError::Misaligned(va));
        }
        if self.pages.lookup(va).is_none() {
            return Err(PagingError::NotMapped(va));
        }
        Ok(())
    }

    fn require_marked(&self, va: usize) -> Result<()> {
        self.check_protectable(va)?;
        if !self.pages.test_flag(PageFlag::UserProtected, va)? {
            return Err(PagingError::InvalidFlag(PageFlag::UserProtected));
        }
        Ok(())
    }

    pub fn mark_protected(&mut self, va: usize) -> Result<()> {
        self.check_protectable(va)?;
        self.pages.set_flag(PageFlag::UserProtected, va)?;
        self.pages.reload_if_active();
        Ok(())
    }

    pub fn protect_page(&mut self, va: usize) -> Result<()> {
        self.require_marked(va)?;
        self.pages.clear_flag(PageFlag::Writable, va)?;
        self.pages.reload_if_active();
        Ok(())
    }

    pub fn release_protected(&mut self, va: usize) -> Result<()> {
        self.require_marked(va)?;
        self.pages.clear_flag(PageFlag::UserProtected, va)?;
        self.pages.set_flag(PageFlag::Writable, va)?;
        self.pages.reload_if_active();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::page_replacement::SecondChance;
    use super::super::test::{check_stamp, context, stamp, PAGE};
    use super::super::Privilege;
    use super::*;
    use crate::config::MAX_RESIDENT_PAGES;
    use crate::mem::user::copy_to_user;

    type Space = AddressSpace<SecondChance>;

    #[test]
    fn protect_needs_a_mark() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(2 * PAGE).unwrap();

        assert_eq!(space.mark_protected(PAGE + 1), Err(PagingError::Misaligned(PAGE + 1)));
        assert_eq!(
            space.mark_protected(4 * PAGE),
            Err(PagingError::NotMapped(4 * PAGE))
        );
        assert_eq!(
            space.protect_page(PAGE),
            Err(PagingError::InvalidFlag(PageFlag::UserProtected))
        );
        assert_eq!(
            space.release_protected(PAGE),
            Err(PagingError::InvalidFlag(PageFlag::UserProtected))
        );

        space.mark_protected(PAGE).unwrap();
        copy_to_user(&mut space, PAGE, &[7]).unwrap();
        space.protect_page(PAGE).unwrap();
        assert_eq!(
            copy_to_user(&mut space, PAGE + 8, &[7]),
            Err(PagingError::ProtectionFault(PAGE + 8))
        );
        assert_eq!(space.report().protected_pages, 1);

        space.release_protected(PAGE).unwrap();
        copy_to_user(&mut space, PAGE + 8, &[7]).unwrap();
        assert_eq!(space.report().protected_pages, 0);
    }

    #[test]
    fn protection_survives_eviction() {
        let (ctx, _) = context(128);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        let pages = MAX_RESIDENT_PAGES + 4;
        space.grow(pages * PAGE).unwrap();
        for i in 0..pages {
            stamp(&mut space, i);
        }

        let victim = space.evicted().iter().next().unwrap().virtual_page;
        space.mark_protected(victim).unwrap();
        space.protect_page(victim).unwrap();
        assert!(space.evicted().find(victim).is_some());

        check_stamp(&mut space, victim / PAGE);
        assert!(space.resident().find(victim).is_some());
        assert_eq!(
            copy_to_user(&mut space, victim, &[1]),
            Err(PagingError::ProtectionFault(victim))
        );
        assert_eq!(space.report().protected_pages, 1);
    }

    #[test]
    fn changes_reload_active_space() {
        let (ctx, _) = context(64);
        let mut space = Space::new(&ctx, 3, Privilege::User).unwrap();
        space.grow(PAGE).unwrap();
        space.activate();

        let before = ctx.memory.tlb_reloads();
        space.mark_protected(0).unwrap();
        space.protect_page(0).unwrap();
        space.release_protected(0).unwrap();
        assert_eq!(ctx.memory.tlb_reloads(), before + 3);
    }
}
