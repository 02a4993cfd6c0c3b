//! Files as seen by the memory manager.
//!
//! Lazily loaded pages and memory-mapped regions only need positioned reads
//! and writes plus a way to get a handle that outlives the caller's
//! descriptor. [`MemFile`] is an in-memory implementation whose reopened
//! handles share contents but keep separate cursors.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use systype::SysResult;

use crate::SpinLock;

pub trait File: Send + Sync {
    /// Reads at most `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is short only at end of file.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> SysResult<usize>;

    /// Writes at most `buf.len()` bytes starting at `offset`.
    ///
    /// Files do not grow; writing stops at the current end of file.
    fn write_at(&self, offset: usize, buf: &[u8]) -> SysResult<usize>;

    /// Size of the file in bytes.
    fn size(&self) -> usize;

    /// Current cursor position.
    fn pos(&self) -> usize;

    /// Moves the cursor to `pos`.
    fn seek(&self, pos: usize);

    /// Opens a new, independent handle to the same file.
    fn reopen(&self) -> SysResult<Arc<dyn File>>;

    /// Reads from the cursor and advances it.
    fn read(&self, buf: &mut [u8]) -> SysResult<usize> {
        let pos = self.pos();
        let len = self.read_at(pos, buf)?;
        self.seek(pos + len);
        Ok(len)
    }

    /// Writes at the cursor and advances it.
    fn write(&self, buf: &[u8]) -> SysResult<usize> {
        let pos = self.pos();
        let len = self.write_at(pos, buf)?;
        self.seek(pos + len);
        Ok(len)
    }
}

/// A file whose contents live in memory.
pub struct MemFile {
    data: Arc<SpinLock<Vec<u8>>>,
    pos: AtomicUsize,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemFile {
            data: Arc::new(SpinLock::new(data)),
            pos: AtomicUsize::new(0),
        })
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl File for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> SysResult<usize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let len = buf.len().min(data.len() - offset);
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        Ok(len)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> SysResult<usize> {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let len = buf.len().min(data.len() - offset);
        data[offset..offset + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn pos(&self) -> usize {
        self.pos.load(Ordering::Relaxed)
    }

    fn seek(&self, pos: usize) {
        self.pos.store(pos, Ordering::Relaxed);
    }

    fn reopen(&self) -> SysResult<Arc<dyn File>> {
        Ok(Arc::new(MemFile {
            data: self.data.clone(),
            pos: AtomicUsize::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stop_at_end_of_file() {
        let file = MemFile::new(b"hello".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(3, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(file.read_at(5, &mut buf), Ok(0));
    }

    #[test]
    fn writes_do_not_grow_the_file() {
        let file = MemFile::new(vec![0; 4]);
        assert_eq!(file.write_at(2, b"abcd"), Ok(2));
        assert_eq!(file.contents(), b"\0\0ab");
        assert_eq!(file.size(), 4);
    }

    #[test]
    fn reopened_handles_share_data_but_not_cursor() {
        let file = MemFile::new(b"abcdef".to_vec());
        let mut buf = [0u8; 3];
        assert_eq!(file.read(&mut buf), Ok(3));
        assert_eq!(file.pos(), 3);

        let other = file.reopen().unwrap();
        assert_eq!(other.pos(), 0);
        other.write_at(0, b"X").unwrap();
        assert_eq!(file.contents(), b"Xbcdef");
    }
}
