//! Swap slot table.
//!
//! The swap device is carved into page-sized slots of [`SECTORS_PER_PAGE`]
//! consecutive sectors; slot `i` lives at sectors `i * SECTORS_PER_PAGE ..`.
//! A bitmap records which slots are free. The bitmap lock covers only the
//! scan-and-flip and the release; sector I/O always happens outside it.

use alloc::{boxed::Box, sync::Arc};

use bitmap_allocator::{BitAlloc, BitAlloc64K};
use config::mm::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE};
use systype::{SysError, SysResult};

use crate::{SpinLock, block::BlockDevice};

/// Index of a page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub fn index(self) -> usize {
        self.0
    }

    fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

struct SlotBitmap {
    /// A set bit marks a free slot.
    free: Box<BitAlloc64K>,
    used: usize,
}

pub struct SwapManager {
    device: Option<Arc<dyn BlockDevice>>,
    capacity: usize,
    slots: SpinLock<SlotBitmap>,
}

impl SwapManager {
    /// Builds the slot table over `device`, marking every slot free.
    ///
    /// Slots beyond what the bitmap can track are left unused.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let sectors = device.size();
        let mut capacity = sectors / SECTORS_PER_PAGE;
        if capacity > BitAlloc64K::CAP {
            log::warn!(
                "[swap] device has {capacity} slots, only {} will be used",
                BitAlloc64K::CAP
            );
            capacity = BitAlloc64K::CAP;
        }
        let mut free = Box::new(BitAlloc64K::DEFAULT);
        free.insert(0..capacity);
        log::info!("[swap] {capacity} slots on a device of {sectors} sectors");
        SwapManager {
            device: Some(device),
            capacity,
            slots: SpinLock::new(SlotBitmap { free, used: 0 }),
        }
    }

    /// A slot table for a system without a swap device. Every `swap_out` fails.
    pub fn empty() -> Self {
        SwapManager {
            device: None,
            capacity: 0,
            slots: SpinLock::new(SlotBitmap {
                free: Box::new(BitAlloc64K::DEFAULT),
                used: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slots_in_use(&self) -> usize {
        self.slots.lock().used
    }

    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        slot.0 < self.capacity && !self.slots.lock().free.test(slot.0)
    }

    /// Writes one page to the first free slot and returns that slot.
    ///
    /// Fails with `ENOSPC` when no slot is free, in which case nothing is written.
    pub fn swap_out(&self, page: &[u8]) -> SysResult<SwapSlot> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let slot = {
            let mut slots = self.slots.lock();
            let index = slots.free.alloc().ok_or(SysError::ENOSPC)?;
            slots.used += 1;
            SwapSlot(index)
        };
        if let Err(err) = self.write_slot(slot, page) {
            self.free(slot);
            return Err(err);
        }
        log::trace!("[swap] page written to slot {}", slot.0);
        Ok(slot)
    }

    /// Reads `slot` back into `page` and releases the slot.
    ///
    /// On an I/O error the slot stays allocated so the content is not lost.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not allocated: the page and the slot table disagree.
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) -> SysResult<()> {
        self.read_slot(slot, page)?;
        self.free(slot);
        log::trace!("[swap] page read from slot {}", slot.0);
        Ok(())
    }

    /// Reads `slot` into `page` without releasing it.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not allocated.
    pub fn read_slot(&self, slot: SwapSlot, page: &mut [u8]) -> SysResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        if !self.is_allocated(slot) {
            panic!("[swap] read of unallocated slot {}", slot.0);
        }
        let device = self.device()?;
        for (i, sector) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            device.read(slot.first_sector() + i, sector)?;
        }
        Ok(())
    }

    /// Releases `slot` without reading it.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not allocated.
    pub fn free(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        if slot.0 >= self.capacity || slots.free.test(slot.0) {
            panic!("[swap] double free of slot {}", slot.0);
        }
        slots.free.dealloc(slot.0);
        slots.used -= 1;
    }

    fn write_slot(&self, slot: SwapSlot, page: &[u8]) -> SysResult<()> {
        let device = self.device()?;
        for (i, sector) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            device.write(slot.first_sector() + i, sector)?;
        }
        Ok(())
    }

    fn device(&self) -> SysResult<&Arc<dyn BlockDevice>> {
        self.device.as_ref().ok_or(SysError::ENODEV)
    }
}
