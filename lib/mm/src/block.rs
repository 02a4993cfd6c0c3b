//! Block devices backing the swap area.

use alloc::{vec, vec::Vec};

use config::mm::SECTOR_SIZE;
use systype::{SysError, SysResult};

use crate::SpinLock;

/// A device addressed in fixed-size sectors of [`SECTOR_SIZE`] bytes.
pub trait BlockDevice: Send + Sync {
    /// Reads sector `block_id` into `buf`, which must be exactly one sector long.
    fn read(&self, block_id: usize, buf: &mut [u8]) -> SysResult<()>;

    /// Writes `buf`, which must be exactly one sector long, to sector `block_id`.
    fn write(&self, block_id: usize, buf: &[u8]) -> SysResult<()>;

    /// Number of sectors on the device.
    fn size(&self) -> usize;
}

/// A block device kept in memory.
pub struct RamDisk {
    sectors: usize,
    data: SpinLock<Vec<u8>>,
}

impl RamDisk {
    /// Creates a zeroed disk with `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        RamDisk {
            sectors,
            data: SpinLock::new(vec![0; sectors * SECTOR_SIZE]),
        }
    }

    fn range(&self, block_id: usize, len: usize) -> SysResult<core::ops::Range<usize>> {
        if len != SECTOR_SIZE || block_id >= self.sectors {
            log::warn!("[RamDisk] bad access to sector {block_id} with {len} bytes");
            return Err(SysError::EIO);
        }
        let start = block_id * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, block_id: usize, buf: &mut [u8]) -> SysResult<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write(&self, block_id: usize, buf: &[u8]) -> SysResult<()> {
        let range = self.range(block_id, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> usize {
        self.sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sectors_are_independent() {
        let disk = RamDisk::new(4);
        disk.write(1, &[0xab; SECTOR_SIZE]).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        disk.read(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        disk.read(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn out_of_range_sector_is_an_io_error() {
        let disk = RamDisk::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read(2, &mut buf), Err(SysError::EIO));
        assert_eq!(disk.write(0, &buf[..10]), Err(SysError::EIO));
    }
}
