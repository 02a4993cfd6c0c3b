//! Pages of a user address space.
//!
//! A [`Page`] describes one page-aligned slice of user memory: where its
//! contents come from, whether it may be written, and the frame holding it
//! while it is resident. Pages start out [`PageState::Uninit`] and turn into
//! anonymous or file-backed pages the first time they are brought in.
//!
//! Every variant knows how to bring its contents into a frame
//! ([`Page::materialize`]), how to give the frame up under memory pressure
//! ([`Page::swap_out`]) and how to release everything it holds
//! ([`Page::destroy`]).

mod anon;
mod file;
mod uninit;

use alloc::sync::Arc;

use systype::{SysError, SysResult};

pub use self::{
    anon::AnonPage,
    file::FilePage,
    uninit::{ContentSource, FileSlice, UninitPage},
};
use crate::{
    SpinLock, Vm,
    address::{VirtAddr, VirtPageNum},
    frame::FrameId,
    swap::SwapManager,
    vm::page_table::PageTable,
};

/// Type of a page, as reported to the rest of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Uninit,
    Anon,
    File,
}

pub enum PageState {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

/// What a page needs from its address space to release its resources.
pub struct PageCtx<'a> {
    pub vm: &'a Vm,
    pub page_table: &'a Arc<SpinLock<PageTable>>,
}

pub struct Page {
    vpn: VirtPageNum,
    writable: bool,
    frame: Option<FrameId>,
    state: PageState,
}

impl Page {
    /// Creates a page whose contents are produced by `source` on first access.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] if `target` is `Uninit`, or if a file
    /// page is asked to be filled with zeros.
    pub fn new_uninit(
        va: VirtAddr,
        writable: bool,
        target: PageKind,
        source: ContentSource,
    ) -> SysResult<Self> {
        let uninit = match (target, source) {
            (PageKind::Anon, source) => UninitPage::Anon(source),
            (PageKind::File, ContentSource::FileSlice(slice)) => UninitPage::File(slice),
            _ => return Err(SysError::EINVAL),
        };
        Ok(Self::with_state(va.page_number(), writable, PageState::Uninit(uninit)))
    }

    pub(crate) fn with_state(vpn: VirtPageNum, writable: bool, state: PageState) -> Self {
        Page {
            vpn,
            writable,
            frame: None,
            state,
        }
    }

    pub fn va(&self) -> VirtAddr {
        self.vpn.address()
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    /// Current type of the page.
    pub fn kind(&self) -> PageKind {
        match self.state {
            PageState::Uninit(_) => PageKind::Uninit,
            PageState::Anon(_) => PageKind::Anon,
            PageState::File(_) => PageKind::File,
        }
    }

    /// Type the page has or will have once brought in.
    pub fn target_kind(&self) -> PageKind {
        match &self.state {
            PageState::Uninit(uninit) => uninit.target(),
            _ => self.kind(),
        }
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        self.frame = frame;
    }

    /// Fills `bytes`, the contents of the frame just attached to this page.
    ///
    /// An uninitialized page becomes its target type only if this succeeds.
    pub(crate) fn materialize(&mut self, bytes: &mut [u8], swap: &SwapManager) -> SysResult<()> {
        log::trace!("[page] materialize {:?} ({:?})", self.vpn, self.kind());
        match &mut self.state {
            PageState::Uninit(uninit) => {
                uninit.fill(bytes)?;
                self.state = uninit.initialized();
                Ok(())
            }
            PageState::Anon(anon) => anon.materialize(bytes, swap),
            PageState::File(file) => file.materialize(bytes),
        }
    }

    /// Saves the contents in `bytes` and removes the page's mapping.
    ///
    /// On error the page is left resident and mapped.
    ///
    /// # Panics
    ///
    /// Panics on an uninitialized page, which never owns a frame.
    pub(crate) fn swap_out(
        &mut self,
        bytes: &[u8],
        page_table: &SpinLock<PageTable>,
        swap: &SwapManager,
    ) -> SysResult<()> {
        let vpn = self.vpn;
        match &mut self.state {
            PageState::Uninit(_) => panic!("[page] swap out of uninitialized page {vpn:?}"),
            PageState::Anon(anon) => anon.swap_out(bytes, swap)?,
            PageState::File(file) => {
                let dirty = page_table.lock().is_dirty(vpn);
                if dirty {
                    file.write_back(bytes)?;
                }
            }
        }
        page_table.lock().unmap_page(vpn);
        Ok(())
    }

    /// Releases the frame and swap slot of the page, writing dirty file
    /// contents back first.
    ///
    /// A page is destroyed once. It is unusable afterwards and only waits to
    /// be dropped.
    pub(crate) fn destroy(&mut self, ctx: &PageCtx<'_>) {
        let frames = ctx.vm.frames();
        if let Some(frame) = self.frame {
            let dirty = ctx
                .page_table
                .lock()
                .unmap_page(self.vpn)
                .is_some_and(|pte| pte.is_dirty());
            if let (PageState::File(file), true) = (&self.state, dirty) {
                if let Err(err) = file.write_back(&frames.bytes(frame)) {
                    log::error!("[page] write back of {:?} failed: {err}", self.vpn);
                }
            }
            frames.detach(self);
            frames.release(frame);
        }
        if let PageState::Anon(anon) = &mut self.state {
            anon.release(ctx.vm.swap());
        }
        log::trace!("[page] destroyed {:?}", self.vpn);
    }

    /// State for a copy of this page in another address space.
    ///
    /// The copy is not resident. File handles are reopened so the copy does
    /// not share a cursor with this page.
    pub(crate) fn duplicate_state(&self) -> SysResult<PageState> {
        Ok(match &self.state {
            PageState::Uninit(uninit) => PageState::Uninit(uninit.duplicate()?),
            PageState::Anon(_) => PageState::Anon(AnonPage::new()),
            PageState::File(file) => PageState::File(file.duplicate()?),
        })
    }
}
