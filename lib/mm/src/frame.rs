//! Module for managing frames (physical pages) handed to user pages.
//!
//! The frame pool is an arena of page-sized buffers. Free frames are tracked
//! by a [`VecIdAllocator`]; frames in use are described by the core map, which
//! records the page owning each frame and whether the frame is pinned. When
//! the pool runs dry, [`FrameTable::acquire`] evicts a resident page with a
//! clock (second chance) sweep over the core map.

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};

use config::mm::{FRAME_POOL_BASE, PAGE_SIZE};
use id_allocator::{IdAllocator, VecIdAllocator};
use spin::MutexGuard;
use systype::{SysError, SysResult};

use crate::{
    SpinLock,
    address::VirtPageNum,
    page::Page,
    swap::SwapManager,
    vm::page_table::PageTable,
};

/// Index of a frame in the frame pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub const fn new(index: usize) -> Self {
        FrameId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Kernel virtual address at which the frame is visible.
    pub const fn kva(self) -> usize {
        FRAME_POOL_BASE + self.0 * PAGE_SIZE
    }
}

/// The page a frame belongs to.
///
/// Both references are weak: the core map never keeps a page or an address
/// space alive.
pub struct FrameOwner {
    page: Weak<SpinLock<Page>>,
    page_table: Weak<SpinLock<PageTable>>,
    vpn: VirtPageNum,
}

impl FrameOwner {
    pub fn new(
        page: &Arc<SpinLock<Page>>,
        page_table: &Arc<SpinLock<PageTable>>,
        vpn: VirtPageNum,
    ) -> Self {
        FrameOwner {
            page: Arc::downgrade(page),
            page_table: Arc::downgrade(page_table),
            vpn,
        }
    }
}

#[derive(Default)]
struct CoreMapEntry {
    owner: Option<FrameOwner>,
    pinned: bool,
}

struct CoreMap {
    entries: Vec<CoreMapEntry>,
    /// Next entry the clock sweep looks at.
    hand: usize,
}

pub struct FrameTable {
    frames: Box<[SpinLock<Box<[u8]>>]>,
    pool: SpinLock<VecIdAllocator>,
    core_map: SpinLock<CoreMap>,
}

impl FrameTable {
    /// Creates a pool of `count` zeroed frames.
    pub fn new(count: usize) -> Self {
        let frames = (0..count)
            .map(|_| SpinLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();
        let entries = (0..count).map(|_| CoreMapEntry::default()).collect();
        log::info!(
            "[frame] user frame pool: {:#x} - {:#x}",
            FRAME_POOL_BASE,
            FRAME_POOL_BASE + count * PAGE_SIZE
        );
        FrameTable {
            frames,
            pool: SpinLock::new(VecIdAllocator::new(0, count)),
            core_map: SpinLock::new(CoreMap { entries, hand: 0 }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames taken out of the pool.
    pub fn frames_in_use(&self) -> usize {
        self.pool.lock().in_use()
    }

    /// Locks and returns the contents of `frame`.
    pub fn bytes(&self, frame: FrameId) -> MutexGuard<'_, Box<[u8]>> {
        self.frames[frame.0].lock()
    }

    /// Gets a frame for a page about to become resident.
    ///
    /// The returned frame is pinned and has no owner. The caller attaches it
    /// to its page and unpins it once the contents are in place.
    ///
    /// # Errors
    /// Returns [`SysError::ENOMEM`] if the pool is empty and no frame can be
    /// evicted, or the last swap-out error (such as [`SysError::ENOSPC`])
    /// when only victims that failed to swap out were found.
    pub fn acquire(&self, swap: &SwapManager) -> SysResult<FrameId> {
        let fresh = self.pool.lock().alloc();
        match fresh {
            Some(index) => {
                self.core_map.lock().entries[index].pinned = true;
                Ok(FrameId(index))
            }
            None => self.evict(swap),
        }
    }

    /// Records `page` as the owner of `frame`.
    pub fn attach(&self, frame: FrameId, owner: FrameOwner, page: &mut Page) {
        let mut core_map = self.core_map.lock();
        let entry = &mut core_map.entries[frame.0];
        assert!(entry.owner.is_none(), "[frame] {frame:?} already owned");
        assert!(page.frame().is_none(), "[frame] {:?} already resident", page.vpn());
        entry.owner = Some(owner);
        page.set_frame(Some(frame));
    }

    /// Breaks the link between `page` and its frame, returning the frame.
    pub fn detach(&self, page: &mut Page) -> Option<FrameId> {
        let frame = page.frame()?;
        let mut core_map = self.core_map.lock();
        core_map.entries[frame.0].owner = None;
        page.set_frame(None);
        Some(frame)
    }

    /// Returns a detached frame to the pool.
    pub fn release(&self, frame: FrameId) {
        {
            let mut core_map = self.core_map.lock();
            let entry = &mut core_map.entries[frame.0];
            assert!(entry.owner.is_none(), "[frame] release of attached {frame:?}");
            entry.pinned = false;
        }
        // SAFETY: a frame reaches `release` only after `acquire` handed it out,
        // and it is not owned, so no one else can release it again.
        unsafe { self.pool.lock().dealloc(frame.0) };
    }

    /// Keeps `frame` from being chosen for eviction.
    pub fn pin(&self, frame: FrameId) {
        self.core_map.lock().entries[frame.0].pinned = true;
    }

    pub fn unpin(&self, frame: FrameId) {
        self.core_map.lock().entries[frame.0].pinned = false;
    }

    pub fn is_pinned(&self, frame: FrameId) -> bool {
        self.core_map.lock().entries[frame.0].pinned
    }

    /// Page currently owning `frame`.
    pub fn owner_of(&self, frame: FrameId) -> Option<VirtPageNum> {
        self.core_map.lock().entries[frame.0]
            .owner
            .as_ref()
            .map(|owner| owner.vpn)
    }

    /// Picks a victim with the clock sweep, swaps it out and hands its frame over.
    ///
    /// The core map stays locked for the whole sweep, and the victim's page
    /// lock is held while it is swapped out. A victim that cannot be swapped
    /// out stays resident and the sweep moves on; that error is returned if
    /// no other frame can be freed.
    fn evict(&self, swap: &SwapManager) -> SysResult<FrameId> {
        let mut core_map = self.core_map.lock();
        let count = core_map.entries.len();
        if count == 0 {
            return Err(SysError::ENOMEM);
        }
        let mut swap_err = None;
        for _ in 0..2 * count + 1 {
            let index = core_map.hand;
            core_map.hand = (index + 1) % count;

            let entry = &core_map.entries[index];
            if entry.pinned {
                continue;
            }
            let Some(owner) = entry.owner.as_ref() else {
                continue;
            };
            let vpn = owner.vpn;
            let (Some(page), Some(page_table)) = (owner.page.upgrade(), owner.page_table.upgrade())
            else {
                continue;
            };
            if page_table.lock().take_accessed(vpn) {
                continue;
            }
            // A page locked elsewhere is being faulted in, copied or torn down.
            let Some(mut victim) = page.try_lock() else {
                continue;
            };

            let swapped = victim.swap_out(&self.frames[index].lock(), &page_table, swap);
            if let Err(err) = swapped {
                log::debug!("[frame] cannot evict {vpn:?} from frame {index}: {err:?}");
                swap_err = Some(err);
                continue;
            }
            victim.set_frame(None);
            let entry = &mut core_map.entries[index];
            entry.owner = None;
            entry.pinned = true;
            log::debug!("[frame] evicted {vpn:?} from frame {index}");
            return Ok(FrameId(index));
        }
        log::warn!("[frame] no frame can be evicted");
        Err(swap_err.unwrap_or(SysError::ENOMEM))
    }
}
