//! Memory-mapped files.
//!
//! A mapping registers one lazily loaded file page per page of the range.
//! Nothing is read until a page is touched, and dirty pages are written back
//! when the mapping is removed or a page is evicted.

use alloc::sync::Arc;

use config::mm::{PAGE_SIZE, USER_END};
use systype::{SysError, SysResult};

use crate::{
    address::VirtAddr,
    file::File,
    page::{ContentSource, FileSlice, Page, PageKind},
};

use super::addr_space::AddrSpace;

impl AddrSpace {
    /// Maps `length` bytes of `file`, starting at `offset`, at `addr`.
    ///
    /// The tail of the last page past the end of the file reads as zeros and
    /// is never written back. The mapping keeps its own handle to the file.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] if `length` is zero, `addr` is null,
    /// unaligned or outside user space, `offset` is unaligned, or any page
    /// of the range is already in use.
    pub fn mmap(
        &self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn File>,
        offset: usize,
    ) -> SysResult<VirtAddr> {
        if length == 0 || addr.is_null() || !addr.is_aligned() || offset % PAGE_SIZE != 0 {
            return Err(SysError::EINVAL);
        }
        let end = addr
            .checked_add(length)
            .filter(|end| end.to_usize() <= USER_END)
            .ok_or(SysError::EINVAL)?;
        let page_count = (end - addr).div_ceil(PAGE_SIZE);

        let mut spt = self.spt.lock();
        if (0..page_count).any(|i| spt.contains(addr + i * PAGE_SIZE)) {
            return Err(SysError::EINVAL);
        }

        let file = file.reopen()?;
        let mut file_left = file.size().saturating_sub(offset).min(length);
        for i in 0..page_count {
            let read_bytes = file_left.min(PAGE_SIZE);
            let registered = FileSlice::new(
                file.clone(),
                offset + i * PAGE_SIZE,
                read_bytes,
                PAGE_SIZE - read_bytes,
            )
            .and_then(|slice| {
                Page::new_uninit(
                    addr + i * PAGE_SIZE,
                    writable,
                    PageKind::File,
                    ContentSource::FileSlice(slice),
                )
            })
            .and_then(|page| spt.insert(page));
            if let Err(err) = registered {
                for j in 0..i {
                    spt.remove(addr + j * PAGE_SIZE, &self.ctx());
                }
                return Err(err);
            }
            file_left -= read_bytes;
        }
        log::debug!("[mmap] {page_count} pages at {addr:?}, offset {offset:#x}");
        Ok(addr)
    }

    /// Removes the mapping starting at `addr`.
    ///
    /// Pages are removed one by one from `addr` upwards while they belong to
    /// a file mapping. Dirty pages are written back to the file.
    pub fn munmap(&self, addr: VirtAddr) {
        let mut spt = self.spt.lock();
        let ctx = self.ctx();
        let mut va = addr.round_down();
        while let Some(page) = spt.find(va) {
            if page.lock().target_kind() != PageKind::File {
                break;
            }
            spt.remove(va, &ctx);
            va = va + PAGE_SIZE;
        }
        log::debug!("[mmap] unmapped {addr:?} - {va:?}");
    }
}
