//! Module for page table entries.
//!
//! This module provides the `PageTableEntry` type, which maps one user page
//! to a frame of the frame pool, together with its permission and status bits.

use bitflags::bitflags;

use crate::frame::FrameId;

/// Offset of the frame index in a page table entry. Bits 0-7 hold the flags.
const FRAME_OFFSET: usize = 10;

bitflags! {
    /// Flags for a page table entry.
    ///
    /// - `V`: Valid. When set, the entry maps a frame.
    /// - `W`: Write. If set, the page may be written through this mapping.
    /// - `U`: User. If set, the page is accessible in user mode.
    /// - `A`: Accessed. Set on every access through the mapping; the clock
    ///   sweep clears it to give the page a second chance.
    /// - `D`: Dirty. Set on every write through the mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        const V = 1 << 0;
        const W = 1 << 2;
        const U = 1 << 4;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// A page table entry.
///
/// The lower 8 bits of an entry are flags and the bits from 10 upwards are the
/// index of the mapped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    /// Creates a page table entry from the given frame and flags.
    pub fn new(frame: FrameId, flags: PteFlags) -> Self {
        PageTableEntry {
            bits: frame.index() << FRAME_OFFSET | flags.bits() as usize,
        }
    }

    /// Returns the frame mapped by the entry.
    pub fn frame(self) -> FrameId {
        FrameId::new(self.bits >> FRAME_OFFSET)
    }

    /// Returns the flags in the page table entry.
    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.bits as u8)
    }

    /// Sets the flags in the page table entry.
    pub fn set_flags(&mut self, flags: PteFlags) {
        let flags_mask = PteFlags::all().bits() as usize;
        self.bits = (self.bits & !flags_mask) | flags.bits() as usize;
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    pub fn is_writable(self) -> bool {
        self.flags().contains(PteFlags::W)
    }

    pub fn is_user(self) -> bool {
        self.flags().contains(PteFlags::U)
    }

    pub fn is_accessed(self) -> bool {
        self.flags().contains(PteFlags::A)
    }

    pub fn is_dirty(self) -> bool {
        self.flags().contains(PteFlags::D)
    }
}

impl Default for PageTableEntry {
    /// Returns a default page table entry which is invalid (unmapped).
    fn default() -> Self {
        PageTableEntry { bits: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_flags_are_packed_independently() {
        let mut pte = PageTableEntry::new(FrameId::new(37), PteFlags::V | PteFlags::U);
        assert_eq!(pte.frame(), FrameId::new(37));
        assert!(pte.is_valid() && pte.is_user() && !pte.is_writable());

        pte.set_flags(pte.flags() | PteFlags::A | PteFlags::D);
        assert_eq!(pte.frame(), FrameId::new(37));
        assert!(pte.is_accessed() && pte.is_dirty());
        assert!(!PageTableEntry::default().is_valid());
    }
}
