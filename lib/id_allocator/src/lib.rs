#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;

/// A trait for types that can allocate and deallocate `usize` IDs.
///
/// The frame pool hands out frame numbers through this trait, so the pool's
/// allocation strategy can change without touching the frame table.
pub trait IdAllocator {
    /// Allocate a new ID.
    ///
    /// Returns `Some(id)` if an ID was successfully allocated,
    /// or `None` if no more IDs are available.
    fn alloc(&mut self) -> Option<usize>;

    /// Deallocate an ID.
    ///
    /// This allows the ID to be reused in future calls to `alloc`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the ID was previously allocated
    /// and has not been deallocated yet.
    unsafe fn dealloc(&mut self, id: usize);

    /// Number of IDs currently handed out.
    fn in_use(&self) -> usize;

    /// Total number of IDs this allocator can hand out.
    fn capacity(&self) -> usize;
}

/// An ID allocator that uses a simple vector to store recycled IDs.
///
/// Fresh IDs are handed out in increasing order; recycled IDs are reused
/// most-recently-freed first.
#[derive(Debug)]
pub struct VecIdAllocator {
    start: usize,
    next: usize,
    end: usize,
    recycled: Vec<usize>,
}

impl VecIdAllocator {
    /// Create a new `VecIdAllocator` that can allocate IDs in the range `from..to`.
    ///
    /// # Panics
    ///
    /// Panics if `from > to`.
    pub fn new(from: usize, to: usize) -> Self {
        assert!(from <= to, "VecIdAllocator: empty range {from}..{to}");
        VecIdAllocator {
            start: from,
            next: from,
            end: to,
            recycled: Vec::new(),
        }
    }
}

impl IdAllocator for VecIdAllocator {
    fn alloc(&mut self) -> Option<usize> {
        match self.recycled.pop() {
            Some(id) => Some(id),
            None => {
                let id = self.next;
                if id < self.end {
                    self.next += 1;
                    Some(id)
                } else {
                    None
                }
            }
        }
    }

    unsafe fn dealloc(&mut self, id: usize) {
        debug_assert!(
            (self.start..self.next).contains(&id),
            "VecIdAllocator: id {id} was never allocated"
        );
        debug_assert!(
            !self.recycled.contains(&id),
            "VecIdAllocator: id {id} freed twice"
        );
        self.recycled.push(id);
    }

    fn in_use(&self) -> usize {
        self.next - self.start - self.recycled.len()
    }

    fn capacity(&self) -> usize {
        self.end - self.start
    }
}
