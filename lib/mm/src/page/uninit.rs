use alloc::sync::Arc;
use core::fmt::{self, Debug, Formatter};

use config::mm::PAGE_SIZE;
use systype::{SysError, SysResult};

use super::{AnonPage, FilePage, PageKind, PageState};
use crate::file::File;

/// A page-sized piece of a file: `read_bytes` bytes at `offset`, followed by
/// `zero_bytes` zeros.
#[derive(Clone)]
pub struct FileSlice {
    file: Arc<dyn File>,
    offset: usize,
    read_bytes: usize,
    zero_bytes: usize,
}

impl FileSlice {
    /// # Errors
    /// Returns [`SysError::EINVAL`] unless `read_bytes + zero_bytes` is one page.
    pub fn new(
        file: Arc<dyn File>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    ) -> SysResult<Self> {
        if read_bytes.checked_add(zero_bytes) != Some(PAGE_SIZE) {
            return Err(SysError::EINVAL);
        }
        Ok(FileSlice {
            file,
            offset,
            read_bytes,
            zero_bytes,
        })
    }

    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    pub fn zero_bytes(&self) -> usize {
        self.zero_bytes
    }

    /// Reads the slice into a page buffer.
    ///
    /// A file shorter than the slice is an I/O error.
    pub(crate) fn read_into(&self, bytes: &mut [u8]) -> SysResult<()> {
        let (data, zeros) = bytes.split_at_mut(self.read_bytes);
        let read = self.file.read_at(self.offset, data)?;
        if read != self.read_bytes {
            log::warn!(
                "[page] short read at offset {:#x}: {read} of {} bytes",
                self.offset,
                self.read_bytes
            );
            return Err(SysError::EIO);
        }
        zeros.fill(0);
        Ok(())
    }

    /// Writes the file-backed part of a page buffer back to the file.
    pub(crate) fn write_from(&self, bytes: &[u8]) -> SysResult<()> {
        self.file.write_at(self.offset, &bytes[..self.read_bytes])?;
        Ok(())
    }

    /// Same slice over a freshly reopened handle.
    pub(crate) fn reopened(&self) -> SysResult<Self> {
        Ok(FileSlice {
            file: self.file.reopen()?,
            ..self.clone()
        })
    }
}

impl Debug for FileSlice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSlice")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}

/// Where the first contents of a page come from.
#[derive(Debug, Clone)]
pub enum ContentSource {
    ZeroFill,
    FileSlice(FileSlice),
}

impl ContentSource {
    pub(crate) fn fill(&self, bytes: &mut [u8]) -> SysResult<()> {
        match self {
            ContentSource::ZeroFill => {
                bytes.fill(0);
                Ok(())
            }
            ContentSource::FileSlice(slice) => slice.read_into(bytes),
        }
    }

    fn duplicate(&self) -> SysResult<Self> {
        Ok(match self {
            ContentSource::ZeroFill => ContentSource::ZeroFill,
            ContentSource::FileSlice(slice) => ContentSource::FileSlice(slice.reopened()?),
        })
    }
}

/// A page not yet brought in, tagged with the type it turns into.
#[derive(Debug, Clone)]
pub enum UninitPage {
    Anon(ContentSource),
    /// A file page reads its first contents from the slice it writes back to.
    File(FileSlice),
}

impl UninitPage {
    pub fn target(&self) -> PageKind {
        match self {
            UninitPage::Anon(_) => PageKind::Anon,
            UninitPage::File(_) => PageKind::File,
        }
    }

    pub(super) fn fill(&self, bytes: &mut [u8]) -> SysResult<()> {
        match self {
            UninitPage::Anon(source) => source.fill(bytes),
            UninitPage::File(slice) => slice.read_into(bytes),
        }
    }

    /// The state the page takes after a successful `fill`.
    pub(super) fn initialized(&self) -> PageState {
        match self {
            UninitPage::Anon(_) => PageState::Anon(AnonPage::new()),
            UninitPage::File(slice) => PageState::File(FilePage::new(slice.clone())),
        }
    }

    pub(super) fn duplicate(&self) -> SysResult<Self> {
        Ok(match self {
            UninitPage::Anon(source) => UninitPage::Anon(source.duplicate()?),
            UninitPage::File(slice) => UninitPage::File(slice.reopened()?),
        })
    }
}
