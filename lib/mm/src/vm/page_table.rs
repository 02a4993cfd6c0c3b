//! Module for the per-process page table.
//!
//! This module provides a `PageTable` struct holding the translation from user
//! pages to frames. It stands in for the MMU-walked tables: the memory manager
//! installs and removes entries, and the user memory accessor sets the
//! accessed and dirty bits the way the hardware would.

use alloc::collections::BTreeMap;

use systype::{SysError, SysResult};

use crate::{address::VirtPageNum, frame::FrameId};

use super::pte::{PageTableEntry, PteFlags};

/// Translation from user pages to frames.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: BTreeMap<VirtPageNum, PageTableEntry>,
}

impl PageTable {
    /// Builds a new, empty `PageTable`.
    pub fn build() -> Self {
        PageTable::default()
    }

    /// Maps `vpn` to `frame` as a user page.
    ///
    /// # Errors
    /// Returns [`SysError::EEXIST`] if `vpn` is already mapped.
    pub fn map_page(&mut self, vpn: VirtPageNum, frame: FrameId, writable: bool) -> SysResult<()> {
        let mut flags = PteFlags::V | PteFlags::U;
        if writable {
            flags |= PteFlags::W;
        }
        if self.entries.contains_key(&vpn) {
            return Err(SysError::EEXIST);
        }
        self.entries.insert(vpn, PageTableEntry::new(frame, flags));
        Ok(())
    }

    /// Removes the mapping of `vpn`, returning the old entry.
    pub fn unmap_page(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    /// Returns the entry mapping `vpn`.
    pub fn find_entry(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.find_entry(vpn).is_some_and(|pte| pte.is_dirty())
    }

    /// Sets or clears the dirty bit of `vpn`. Unmapped pages are ignored.
    pub fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        self.update_flags(vpn, PteFlags::D, dirty);
    }

    /// Records an access to `vpn`, setting A and, for writes, D.
    pub fn touch(&mut self, vpn: VirtPageNum, write: bool) {
        let flags = if write { PteFlags::A | PteFlags::D } else { PteFlags::A };
        self.update_flags(vpn, flags, true);
    }

    /// Clears the accessed bit of `vpn` and returns its previous value.
    pub fn take_accessed(&mut self, vpn: VirtPageNum) -> bool {
        let accessed = self.find_entry(vpn).is_some_and(|pte| pte.is_accessed());
        if accessed {
            self.update_flags(vpn, PteFlags::A, false);
        }
        accessed
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update_flags(&mut self, vpn: VirtPageNum, flags: PteFlags, set: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            let mut new_flags = pte.flags();
            new_flags.set(flags, set);
            pte.set_flags(new_flags);
        }
    }
}
