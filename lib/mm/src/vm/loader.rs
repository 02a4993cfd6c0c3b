//! Lazy loading of program segments.

use alloc::sync::Arc;

use config::mm::PAGE_SIZE;
use systype::{SysError, SysResult};

use crate::{
    address::VirtAddr,
    file::File,
    page::{ContentSource, FileSlice, PageKind},
};

use super::addr_space::AddrSpace;

impl AddrSpace {
    /// Registers a segment of `read_bytes` bytes of `file` at `offset`,
    /// followed by `zero_bytes` zeros, starting at `upage`.
    ///
    /// The segment becomes anonymous memory once loaded: its pages go to swap
    /// when evicted and are never written back to `file`.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] if `upage` or `offset` is unaligned or the
    /// segment does not end on a page boundary, or the error of registering
    /// one of its pages. Pages registered before a failure stay registered.
    pub fn load_segment(
        &self,
        file: &Arc<dyn File>,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> SysResult<()> {
        let total = read_bytes.checked_add(zero_bytes).ok_or(SysError::EINVAL)?;
        if total % PAGE_SIZE != 0 || !upage.is_aligned() || offset % PAGE_SIZE != 0 {
            return Err(SysError::EINVAL);
        }
        let mut read_left = read_bytes;
        for i in 0..total / PAGE_SIZE {
            let page_read = read_left.min(PAGE_SIZE);
            let source = match page_read {
                0 => ContentSource::ZeroFill,
                _ => ContentSource::FileSlice(FileSlice::new(
                    file.clone(),
                    offset + i * PAGE_SIZE,
                    page_read,
                    PAGE_SIZE - page_read,
                )?),
            };
            self.alloc_page(PageKind::Anon, upage + i * PAGE_SIZE, writable, source)?;
            read_left -= page_read;
        }
        log::debug!("[loader] segment at {upage:?}: {read_bytes:#x} read, {zero_bytes:#x} zero");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use config::mm::USER_STACK_TOP;

    use super::*;
    use crate::{file::MemFile, test_util::test_vm};

    const TEXT: usize = 0x40_0000;

    #[test]
    fn segment_pages_load_file_bytes_then_zeros() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let data: Vec<u8> = (0..PAGE_SIZE + 100).map(|i| (i % 7 + 1) as u8).collect();
        let file: Arc<dyn File> = MemFile::new(data.clone());
        space
            .load_segment(&file, 0, VirtAddr::new(TEXT), PAGE_SIZE + 100, 2 * PAGE_SIZE - 100, false)
            .unwrap();
        assert_eq!(space.page_count(), 3);
        assert_eq!(space.vm().frames().frames_in_use(), 0);

        let mut buf = [0u8; 200];
        space.copy_in(VirtAddr::new(TEXT + PAGE_SIZE), &mut buf, USER_STACK_TOP).unwrap();
        assert_eq!(&buf[..100], &data[PAGE_SIZE..]);
        assert!(buf[100..].iter().all(|&b| b == 0));

        let page = space.find_page(VirtAddr::new(TEXT + PAGE_SIZE)).unwrap();
        assert_eq!(page.lock().kind(), PageKind::Anon);
        let mut zero = [1u8; 4];
        space.copy_in(VirtAddr::new(TEXT + 2 * PAGE_SIZE), &mut zero, USER_STACK_TOP).unwrap();
        assert_eq!(zero, [0; 4]);
    }

    #[test]
    fn misaligned_segments_are_rejected() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let file: Arc<dyn File> = MemFile::new(Vec::new());
        let upage = VirtAddr::new(TEXT);
        assert_eq!(space.load_segment(&file, 0, upage, 10, 10, true), Err(SysError::EINVAL));
        assert_eq!(
            space.load_segment(&file, 0, upage + 1, 0, PAGE_SIZE, true),
            Err(SysError::EINVAL)
        );
        assert_eq!(
            space.load_segment(&file, 12, upage, 0, PAGE_SIZE, true),
            Err(SysError::EINVAL)
        );
        assert_eq!(space.page_count(), 0);
    }
}
