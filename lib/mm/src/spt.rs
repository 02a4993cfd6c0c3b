//! Supplemental page table.
//!
//! Each address space keeps one [`SupplementalPageTable`] mapping every
//! registered user page to its [`Page`], whether or not the page is
//! resident. The page-fault handler consults it to learn how to bring a page
//! in; teardown walks it to release frames and swap slots.

use alloc::{sync::Arc, vec::Vec};

use hashbrown::HashMap;
use systype::{SysError, SysResult};

use crate::{
    SpinLock,
    address::{VirtAddr, VirtPageNum},
    frame::FrameOwner,
    page::{Page, PageCtx, PageState},
};

pub type PageRef = Arc<SpinLock<Page>>;

#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPageNum, PageRef>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the page containing `va`.
    pub fn find(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.get(&va.page_number()).cloned()
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.pages.contains_key(&va.page_number())
    }

    /// Registers `page`.
    ///
    /// # Errors
    /// Returns [`SysError::EEXIST`] if a page is already registered at the
    /// same address. The existing page is left untouched.
    pub fn insert(&mut self, page: Page) -> SysResult<PageRef> {
        let vpn = page.vpn();
        if self.pages.contains_key(&vpn) {
            return Err(SysError::EEXIST);
        }
        let page = Arc::new(SpinLock::new(page));
        self.pages.insert(vpn, page.clone());
        Ok(page)
    }

    /// Unlinks the page containing `va` and destroys it.
    ///
    /// Returns whether a page was found.
    pub fn remove(&mut self, va: VirtAddr, ctx: &PageCtx<'_>) -> bool {
        match self.pages.remove(&va.page_number()) {
            Some(page) => {
                page.lock().destroy(ctx);
                true
            }
            None => false,
        }
    }

    /// Destroys every page. The table is empty afterwards.
    pub fn destroy_all(&mut self, ctx: &PageCtx<'_>) {
        let pages: Vec<PageRef> = self.pages.drain().map(|(_, page)| page).collect();
        for page in pages {
            page.lock().destroy(ctx);
        }
    }

    /// Fills this empty table with copies of every page in `src`.
    ///
    /// Resident pages and swapped-out anonymous pages get their own frame in
    /// the new address space, filled with the same bytes. Everything else is
    /// copied lazily. On failure every copy made so far is destroyed and this
    /// table stays empty.
    ///
    /// # Errors
    /// Returns [`SysError::EBUSY`] if this table is not empty, or the error
    /// that stopped the copy.
    pub fn copy_from(
        &mut self,
        src: &SupplementalPageTable,
        src_ctx: &PageCtx<'_>,
        dst_ctx: &PageCtx<'_>,
    ) -> SysResult<()> {
        if !self.is_empty() {
            return Err(SysError::EBUSY);
        }
        let mut copied = SupplementalPageTable::new();
        for (&vpn, page) in src.pages.iter() {
            match duplicate_page(page, src_ctx, dst_ctx) {
                Ok(copy) => {
                    copied.pages.insert(vpn, copy);
                }
                Err(err) => {
                    log::warn!("[spt] copy of {vpn:?} failed: {err}");
                    copied.destroy_all(dst_ctx);
                    return Err(err);
                }
            }
        }
        self.pages = copied.pages;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VirtPageNum, &PageRef)> {
        self.pages.iter()
    }
}

fn duplicate_page(
    page: &PageRef,
    src_ctx: &PageCtx<'_>,
    dst_ctx: &PageCtx<'_>,
) -> SysResult<PageRef> {
    let src = page.lock();
    let vpn = src.vpn();
    let copy = Arc::new(SpinLock::new(Page::with_state(
        vpn,
        src.writable(),
        src.duplicate_state()?,
    )));
    let slot = match src.state() {
        PageState::Anon(anon) => anon.slot(),
        _ => None,
    };
    if src.frame().is_none() && slot.is_none() {
        return Ok(copy);
    }

    let frames = dst_ctx.vm.frames();
    let mut dst = copy.lock();
    let frame = frames.acquire(dst_ctx.vm.swap())?;
    frames.attach(frame, FrameOwner::new(&copy, dst_ctx.page_table, vpn), &mut dst);
    let filled = {
        let mut bytes = frames.bytes(frame);
        match src.frame() {
            Some(src_frame) => {
                bytes.copy_from_slice(&src_ctx.vm.frames().bytes(src_frame));
                Ok(src_ctx.page_table.lock().is_dirty(vpn))
            }
            None => slot
                .map_or(Ok(()), |slot| src_ctx.vm.swap().read_slot(slot, &mut bytes))
                .map(|()| false),
        }
    };
    let mapped = filled.and_then(|dirty| {
        let mut page_table = dst_ctx.page_table.lock();
        page_table.map_page(vpn, frame, dst.writable())?;
        page_table.set_dirty(vpn, dirty);
        Ok(())
    });
    if let Err(err) = mapped {
        frames.detach(&mut dst);
        frames.release(frame);
        return Err(err);
    }
    frames.unpin(frame);
    drop(dst);
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{page::ContentSource, page::PageKind, test_util::test_vm, vm::page_table::PageTable};

    fn anon(va: usize) -> Page {
        Page::new_uninit(VirtAddr::new(va), true, PageKind::Anon, ContentSource::ZeroFill).unwrap()
    }

    #[test]
    fn insert_then_find_by_any_address_in_the_page() {
        let mut spt = SupplementalPageTable::new();
        let page = spt.insert(anon(0x5000)).unwrap();
        let found = spt.find(VirtAddr::new(0x5fff)).unwrap();
        assert!(Arc::ptr_eq(&page, &found));
        assert!(spt.find(VirtAddr::new(0x6000)).is_none());
        assert_eq!(spt.insert(anon(0x5800)).err(), Some(SysError::EEXIST));
        assert!(Arc::ptr_eq(&spt.find(VirtAddr::new(0x5000)).unwrap(), &page));
    }

    #[test]
    fn remove_and_destroy_all_empty_the_table() {
        let vm = test_vm(2, 2);
        let page_table = Arc::new(SpinLock::new(PageTable::build()));
        let ctx = PageCtx {
            vm: &vm,
            page_table: &page_table,
        };
        let mut spt = SupplementalPageTable::new();
        for i in 1..4 {
            spt.insert(anon(i * 0x1000)).unwrap();
        }
        assert!(spt.remove(VirtAddr::new(0x2000), &ctx));
        assert!(!spt.remove(VirtAddr::new(0x2000), &ctx));
        assert_eq!(spt.len(), 2);
        spt.destroy_all(&ctx);
        assert!(spt.is_empty());
        spt.destroy_all(&ctx);
    }
}
