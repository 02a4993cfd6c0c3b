use systype::SysResult;

use super::FileSlice;

/// A page mirroring part of a file. Dirty contents are written back on
/// eviction and on unmap; clean ones are simply dropped and read again.
#[derive(Debug)]
pub struct FilePage {
    slice: FileSlice,
}

impl FilePage {
    pub fn new(slice: FileSlice) -> Self {
        FilePage { slice }
    }

    pub fn slice(&self) -> &FileSlice {
        &self.slice
    }

    pub(super) fn materialize(&self, bytes: &mut [u8]) -> SysResult<()> {
        self.slice.read_into(bytes)
    }

    pub(super) fn write_back(&self, bytes: &[u8]) -> SysResult<()> {
        log::trace!("[page] write back at offset {:#x}", self.slice.offset());
        self.slice.write_from(bytes)
    }

    pub(super) fn duplicate(&self) -> SysResult<Self> {
        Ok(FilePage::new(self.slice.reopened()?))
    }
}
