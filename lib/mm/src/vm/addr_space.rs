//! Module for managing virtual address spaces.
//!
//! An address space is the user half of a process's memory, managed by an
//! [`AddrSpace`] struct. It consists of a supplemental page table, which
//! records every page the process may touch and where its contents come
//! from, and a page table, which maps the pages currently resident in a
//! frame. Pages are registered lazily and brought in by the page-fault
//! handler on first access.
//!
//! When a process is created, the kernel builds an empty address space for
//! it and registers its segments and first stack page. A forked process gets
//! a deep copy of its parent's address space. When the process exits, the
//! address space releases every frame and swap slot it holds.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use config::mm::{PAGE_SIZE, USER_STACK_TOP};
use systype::{SysError, SysResult};

use crate::{
    SpinLock, Vm,
    address::VirtAddr,
    frame::FrameOwner,
    page::{ContentSource, Page, PageCtx, PageKind},
    spt::{PageRef, SupplementalPageTable},
};

use super::page_table::PageTable;

/// A user virtual address space.
///
/// See the module-level documentation for more information.
pub struct AddrSpace {
    vm: Arc<Vm>,
    /// Every registered page of the address space.
    pub(super) spt: SpinLock<SupplementalPageTable>,
    /// Translations of the resident pages.
    page_table: Arc<SpinLock<PageTable>>,
    /// Lowest address of the stack grown so far.
    stack_bottom: AtomicUsize,
}

impl AddrSpace {
    /// Creates an empty address space for a user process.
    pub fn build_user(vm: Arc<Vm>) -> Self {
        AddrSpace {
            vm,
            spt: SpinLock::new(SupplementalPageTable::new()),
            page_table: Arc::new(SpinLock::new(PageTable::build())),
            stack_bottom: AtomicUsize::new(USER_STACK_TOP),
        }
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn page_table(&self) -> &Arc<SpinLock<PageTable>> {
        &self.page_table
    }

    pub(crate) fn ctx(&self) -> PageCtx<'_> {
        PageCtx {
            vm: &self.vm,
            page_table: &self.page_table,
        }
    }

    /// Registers a page at `va` whose contents are produced by `source` on
    /// first access.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] if `va` is not a user address or the
    /// kind and source do not fit together, and [`SysError::EEXIST`] if a
    /// page is already registered at `va`.
    pub fn alloc_page(
        &self,
        kind: PageKind,
        va: VirtAddr,
        writable: bool,
        source: ContentSource,
    ) -> SysResult<()> {
        if va.is_null() || !va.in_user_space() {
            return Err(SysError::EINVAL);
        }
        let page = Page::new_uninit(va, writable, kind, source)?;
        self.spt.lock().insert(page)?;
        log::trace!("[addr_space] registered {kind:?} page at {:?}", va.round_down());
        Ok(())
    }

    /// Finds the page containing `va`.
    pub fn find_page(&self, va: VirtAddr) -> Option<PageRef> {
        self.spt.lock().find(va)
    }

    /// Number of registered pages.
    pub fn page_count(&self) -> usize {
        self.spt.lock().len()
    }

    /// Brings the page containing `va` into a frame now.
    ///
    /// # Errors
    /// Returns [`SysError::EFAULT`] if no page is registered at `va`, or the
    /// error that kept the page from being brought in.
    pub fn claim_page(&self, va: VirtAddr) -> SysResult<()> {
        let spt = self.spt.lock();
        let page_ref = spt.find(va).ok_or(SysError::EFAULT)?;
        let mut page = page_ref.lock();
        self.claim_locked(&page_ref, &mut page)
    }

    /// Brings a locked page into a frame and maps it.
    ///
    /// The supplemental page table must be locked by the caller, so the page
    /// cannot be unregistered meanwhile. On failure the page is left exactly
    /// as it was.
    pub(super) fn claim_locked(&self, page_ref: &PageRef, page: &mut Page) -> SysResult<()> {
        if page.is_resident() {
            return Ok(());
        }
        let frames = self.vm.frames();
        let vpn = page.vpn();
        let frame = frames.acquire(self.vm.swap())?;
        frames.attach(frame, FrameOwner::new(page_ref, &self.page_table, vpn), page);

        let mapped = self.page_table.lock().map_page(vpn, frame, page.writable());
        let result = mapped.and_then(|()| {
            let mut bytes = frames.bytes(frame);
            page.materialize(&mut bytes, self.vm.swap())
        });
        match result {
            Ok(()) => {
                frames.unpin(frame);
                log::debug!("[addr_space] {vpn:?} resident in {frame:?}");
                Ok(())
            }
            Err(err) => {
                self.page_table.lock().unmap_page(vpn);
                frames.detach(page);
                frames.release(frame);
                Err(err)
            }
        }
    }

    /// Unregisters and destroys the page containing `va`.
    pub fn remove_page(&self, va: VirtAddr) -> bool {
        self.spt.lock().remove(va, &self.ctx())
    }

    /// Lowest address of the stack.
    pub fn stack_bottom(&self) -> VirtAddr {
        VirtAddr::new(self.stack_bottom.load(Ordering::Relaxed))
    }

    pub(super) fn lower_stack_bottom(&self, va: VirtAddr) {
        self.stack_bottom.fetch_min(va.to_usize(), Ordering::Relaxed);
    }

    /// Registers the first stack page, right below [`USER_STACK_TOP`], and
    /// brings it in.
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&self) -> SysResult<VirtAddr> {
        let va = VirtAddr::new(USER_STACK_TOP - PAGE_SIZE);
        self.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill)?;
        if let Err(err) = self.claim_page(va) {
            self.remove_page(va);
            return Err(err);
        }
        self.lower_stack_bottom(va);
        Ok(VirtAddr::new(USER_STACK_TOP))
    }

    /// Makes this empty address space a copy of `src`.
    ///
    /// The copy shares no frame or swap slot with `src`. On failure this
    /// address space is left empty.
    ///
    /// # Errors
    /// Returns [`SysError::EBUSY`] if this address space already has pages,
    /// or the error that stopped the copy.
    pub fn copy_from(&self, src: &AddrSpace) -> SysResult<()> {
        if !self.spt.lock().is_empty() {
            return Err(SysError::EBUSY);
        }
        let mut copied = SupplementalPageTable::new();
        copied.copy_from(&src.spt.lock(), &src.ctx(), &self.ctx())?;

        let mut spt = self.spt.lock();
        if !spt.is_empty() {
            copied.destroy_all(&self.ctx());
            return Err(SysError::EBUSY);
        }
        *spt = copied;
        self.lower_stack_bottom(src.stack_bottom());
        log::debug!("[addr_space] copied {} pages", spt.len());
        Ok(())
    }

    /// Creates a copy of this address space for a child process.
    pub fn fork(&self) -> SysResult<AddrSpace> {
        let child = AddrSpace::build_user(self.vm.clone());
        child.copy_from(self)?;
        Ok(child)
    }

    /// Releases every page of the address space.
    ///
    /// Dirty file pages are written back. Calling this again does nothing.
    pub fn exit(&self) {
        self.spt.lock().destroy_all(&self.ctx());
    }
}

impl Drop for AddrSpace {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use std::vec;

    use super::*;
    use crate::{
        file::{File, MemFile},
        page::{FileSlice, PageState},
        test_util::test_vm,
    };

    const DATA: usize = 0x1000_0000;

    fn user_sp() -> usize {
        USER_STACK_TOP
    }

    #[test]
    fn registered_page_is_found_anywhere_inside() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        space
            .alloc_page(PageKind::Anon, VirtAddr::new(DATA), true, ContentSource::ZeroFill)
            .unwrap();
        let page = space.find_page(VirtAddr::new(DATA + 0x123)).unwrap();
        assert_eq!(page.lock().va(), VirtAddr::new(DATA));
        assert_eq!(page.lock().kind(), PageKind::Uninit);
        assert_eq!(page.lock().target_kind(), PageKind::Anon);
        assert!(space.find_page(VirtAddr::new(DATA + PAGE_SIZE)).is_none());
    }

    #[test]
    fn duplicate_registration_keeps_the_first_page() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let va = VirtAddr::new(DATA);
        space.alloc_page(PageKind::Anon, va, false, ContentSource::ZeroFill).unwrap();
        assert_eq!(
            space.alloc_page(PageKind::Anon, va + 8, true, ContentSource::ZeroFill),
            Err(SysError::EEXIST)
        );
        assert!(!space.find_page(va).unwrap().lock().writable());
        assert_eq!(space.page_count(), 1);
    }

    #[test]
    fn invalid_registrations_are_rejected() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let zero = ContentSource::ZeroFill;
        assert_eq!(
            space.alloc_page(PageKind::Anon, VirtAddr::new(0), true, zero.clone()),
            Err(SysError::EINVAL)
        );
        assert_eq!(
            space.alloc_page(PageKind::File, VirtAddr::new(DATA), true, zero.clone()),
            Err(SysError::EINVAL)
        );
        assert_eq!(
            space.alloc_page(PageKind::Uninit, VirtAddr::new(DATA), true, zero),
            Err(SysError::EINVAL)
        );
    }

    #[test]
    fn claim_turns_the_page_into_its_target() {
        let vm = test_vm(4, 4);
        let space = AddrSpace::build_user(vm.clone());
        let va = VirtAddr::new(DATA);
        space.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
        space.claim_page(va).unwrap();

        let page = space.find_page(va).unwrap();
        let frame = page.lock().frame().unwrap();
        assert_eq!(page.lock().kind(), PageKind::Anon);
        assert_eq!(vm.frames().owner_of(frame), Some(va.page_number()));
        assert!(!vm.frames().is_pinned(frame));
        assert_eq!(
            space.page_table().lock().find_entry(va.page_number()).map(|pte| pte.frame()),
            Some(frame)
        );
        assert_eq!(space.claim_page(VirtAddr::new(DATA + PAGE_SIZE)), Err(SysError::EFAULT));
    }

    #[test]
    fn failed_claim_leaves_the_page_uninit() {
        let vm = test_vm(4, 4);
        let space = AddrSpace::build_user(vm.clone());
        let va = VirtAddr::new(DATA);
        let file = MemFile::new(vec![1; 100]);
        let slice = FileSlice::new(file, 0, PAGE_SIZE, 0).unwrap();
        space
            .alloc_page(PageKind::Anon, va, false, ContentSource::FileSlice(slice))
            .unwrap();

        assert_eq!(space.claim_page(va), Err(SysError::EIO));
        let page = space.find_page(va).unwrap();
        assert_eq!(page.lock().kind(), PageKind::Uninit);
        assert!(!page.lock().is_resident());
        assert_eq!(vm.frames().frames_in_use(), 0);
        assert!(space.page_table().lock().is_empty());
    }

    #[test]
    fn memory_pressure_round_trips_through_swap() {
        let vm = test_vm(2, 8);
        let space = AddrSpace::build_user(vm.clone());
        for i in 0..5 {
            let va = VirtAddr::new(DATA + i * PAGE_SIZE);
            space.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
            space.copy_out(va, &[i as u8 + 1; PAGE_SIZE], user_sp()).unwrap();
        }
        assert_eq!(vm.frames().frames_in_use(), 2);
        assert_eq!(vm.swap().slots_in_use(), 3);

        for i in 0..5 {
            let mut buf = vec![0u8; PAGE_SIZE];
            space.copy_in(VirtAddr::new(DATA + i * PAGE_SIZE), &mut buf, user_sp()).unwrap();
            assert!(buf.iter().all(|&b| b == i as u8 + 1), "page {i} corrupted");
        }
    }

    #[test]
    fn exit_releases_frames_and_slots() {
        let vm = test_vm(1, 4);
        let space = AddrSpace::build_user(vm.clone());
        for i in 0..3 {
            let va = VirtAddr::new(DATA + i * PAGE_SIZE);
            space.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
            space.copy_out(va, &[7; 16], user_sp()).unwrap();
        }
        assert_eq!(vm.swap().slots_in_use(), 2);

        space.exit();
        assert_eq!(space.page_count(), 0);
        assert_eq!(vm.frames().frames_in_use(), 0);
        assert_eq!(vm.swap().slots_in_use(), 0);
        space.exit();
    }

    #[test]
    fn fork_copies_are_independent() {
        let vm = test_vm(8, 8);
        let parent = AddrSpace::build_user(vm.clone());
        let resident = VirtAddr::new(DATA);
        let lazy = VirtAddr::new(DATA + PAGE_SIZE);
        parent.alloc_page(PageKind::Anon, resident, true, ContentSource::ZeroFill).unwrap();
        parent.alloc_page(PageKind::Anon, lazy, true, ContentSource::ZeroFill).unwrap();
        parent.copy_out(resident, b"parent", user_sp()).unwrap();

        let child = parent.fork().unwrap();
        assert_eq!(child.page_count(), 2);
        assert_eq!(child.find_page(lazy).unwrap().lock().kind(), PageKind::Uninit);
        let parent_frame = parent.find_page(resident).unwrap().lock().frame();
        let child_frame = child.find_page(resident).unwrap().lock().frame();
        assert!(child_frame.is_some());
        assert_ne!(parent_frame, child_frame);
        assert!(child.page_table().lock().is_dirty(resident.page_number()));

        child.copy_out(resident, b"child!", user_sp()).unwrap();
        let mut buf = [0u8; 6];
        parent.copy_in(resident, &mut buf, user_sp()).unwrap();
        assert_eq!(&buf, b"parent");
        child.copy_in(resident, &mut buf, user_sp()).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn fork_copies_swapped_out_pages_without_sharing_slots() {
        let vm = test_vm(2, 8);
        let parent = AddrSpace::build_user(vm.clone());
        for i in 0..3 {
            let va = VirtAddr::new(DATA + i * PAGE_SIZE);
            parent.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
            parent.copy_out(va, &[0x40 + i as u8; 32], user_sp()).unwrap();
        }
        let swapped = (0..3)
            .map(|i| VirtAddr::new(DATA + i * PAGE_SIZE))
            .find(|&va| {
                matches!(parent.find_page(va).unwrap().lock().state(),
                    PageState::Anon(anon) if anon.slot().is_some())
            })
            .unwrap();
        let slots_before = vm.swap().slots_in_use();

        let child = parent.fork().unwrap();
        assert!(vm.swap().slots_in_use() >= slots_before);
        let mut buf = [0u8; 32];
        child.copy_in(swapped, &mut buf, user_sp()).unwrap();
        let expected = 0x40 + ((swapped - VirtAddr::new(DATA)) / PAGE_SIZE) as u8;
        assert!(buf.iter().all(|&b| b == expected));
        parent.copy_in(swapped, &mut buf, user_sp()).unwrap();
        assert!(buf.iter().all(|&b| b == expected));
    }

    #[test]
    fn failed_fork_leaves_the_child_empty() {
        // One frame and no swap: the resident parent page cannot be copied.
        let vm = Arc::new(Vm::new(crate::VmConfig { frames: 1 }, None));
        let parent = AddrSpace::build_user(vm.clone());
        let va = VirtAddr::new(DATA);
        parent.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
        parent.claim_page(va).unwrap();
        parent
            .alloc_page(PageKind::Anon, va + PAGE_SIZE, true, ContentSource::ZeroFill)
            .unwrap();

        let child = AddrSpace::build_user(vm.clone());
        assert!(child.copy_from(&parent).is_err());
        assert_eq!(child.page_count(), 0);
        assert!(child.page_table().lock().is_empty());
        assert_eq!(vm.frames().frames_in_use(), 1);
        assert!(parent.find_page(va).unwrap().lock().is_resident());
    }

    #[test]
    fn copy_into_a_populated_space_is_refused() {
        let vm = test_vm(4, 4);
        let parent = AddrSpace::build_user(vm.clone());
        let child = AddrSpace::build_user(vm.clone());
        for space in [&parent, &child] {
            space
                .alloc_page(PageKind::Anon, VirtAddr::new(DATA), true, ContentSource::ZeroFill)
                .unwrap();
            space.claim_page(VirtAddr::new(DATA)).unwrap();
        }
        child
            .alloc_page(PageKind::Anon, VirtAddr::new(DATA + PAGE_SIZE), true, ContentSource::ZeroFill)
            .unwrap();
        let frames = vm.frames().frames_in_use();

        assert_eq!(child.copy_from(&parent), Err(SysError::EBUSY));
        assert_eq!(child.page_count(), 2);
        assert!(child.find_page(VirtAddr::new(DATA)).unwrap().lock().is_resident());
        assert_eq!(vm.frames().frames_in_use(), frames);
    }

    #[test]
    fn child_outlives_the_parent() {
        let vm = test_vm(2, 8);
        let parent = AddrSpace::build_user(vm.clone());
        for i in 0..4 {
            let va = VirtAddr::new(DATA + i * PAGE_SIZE);
            parent.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
            parent.copy_out(va, &[0x10 + i as u8; PAGE_SIZE], user_sp()).unwrap();
        }
        assert!(vm.swap().slots_in_use() > 0);

        let child = parent.fork().unwrap();
        parent.exit();
        assert_eq!(parent.page_count(), 0);

        for i in 0..4 {
            let mut buf = vec![0u8; PAGE_SIZE];
            child.copy_in(VirtAddr::new(DATA + i * PAGE_SIZE), &mut buf, user_sp()).unwrap();
            assert!(buf.iter().all(|&b| b == 0x10 + i as u8), "page {i} lost with the parent");
        }

        child.exit();
        assert_eq!(vm.frames().frames_in_use(), 0);
        assert_eq!(vm.swap().slots_in_use(), 0);
    }

    #[test]
    fn setup_stack_maps_the_top_page() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let sp = space.setup_stack().unwrap();
        assert_eq!(sp, VirtAddr::new(USER_STACK_TOP));
        let top_page = VirtAddr::new(USER_STACK_TOP - PAGE_SIZE);
        assert!(space.find_page(top_page).unwrap().lock().is_resident());
        assert_eq!(space.stack_bottom(), top_page);
    }

    #[test]
    fn file_source_reads_through_reopened_handles() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let file: Arc<dyn File> = MemFile::new(vec![9; PAGE_SIZE]);
        let slice = FileSlice::new(file.clone(), 0, PAGE_SIZE, 0).unwrap();
        space
            .alloc_page(PageKind::Anon, VirtAddr::new(DATA), false, ContentSource::FileSlice(slice))
            .unwrap();
        let child = space.fork().unwrap();
        let mut buf = [0u8; 4];
        child.copy_in(VirtAddr::new(DATA), &mut buf, user_sp()).unwrap();
        assert_eq!(buf, [9; 4]);
        assert_eq!(file.pos(), 0);
    }
}
