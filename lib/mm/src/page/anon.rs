use systype::SysResult;

use crate::swap::{SwapManager, SwapSlot};

/// A page with no backing file. Its contents go to swap when evicted.
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub fn new() -> Self {
        AnonPage { slot: None }
    }

    /// Swap slot holding the contents while the page is not resident.
    pub fn slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    pub(super) fn materialize(&mut self, bytes: &mut [u8], swap: &SwapManager) -> SysResult<()> {
        match self.slot {
            Some(slot) => {
                swap.swap_in(slot, bytes)?;
                self.slot = None;
            }
            // Never swapped out: the contents were discarded with nothing to keep.
            None => bytes.fill(0),
        }
        Ok(())
    }

    pub(super) fn swap_out(&mut self, bytes: &[u8], swap: &SwapManager) -> SysResult<()> {
        debug_assert!(self.slot.is_none());
        self.slot = Some(swap.swap_out(bytes)?);
        Ok(())
    }

    pub(super) fn release(&mut self, swap: &SwapManager) {
        if let Some(slot) = self.slot.take() {
            swap.free(slot);
        }
    }
}
