//! Address types for user virtual memory.
//!
//! This module provides [`VirtAddr`] and [`VirtPageNum`], along with the
//! rounding and range checks the memory manager needs. Everything at or above
//! [`KERNEL_BASE`] is a kernel address; everything below is user space.

use core::{
    fmt::{self, Debug, Formatter},
    ops::{Add, Sub},
};

use config::mm::{KERNEL_BASE, PAGE_OFFSET_WIDTH, PAGE_SIZE, USER_END};

/// A virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr {
    addr: usize,
}

impl VirtAddr {
    /// Creates a new `VirtAddr` from the given address.
    pub const fn new(addr: usize) -> Self {
        VirtAddr { addr }
    }

    /// Gets the inner `usize` address.
    pub const fn to_usize(self) -> usize {
        self.addr
    }

    /// Gets the offset within the page where the address resides.
    pub const fn page_offset(self) -> usize {
        self.addr % PAGE_SIZE
    }

    /// Gets the page number where the address resides.
    pub const fn page_number(self) -> VirtPageNum {
        VirtPageNum::new(self.addr >> PAGE_OFFSET_WIDTH)
    }

    /// Rounds the address down to the page boundary.
    pub const fn round_down(self) -> Self {
        VirtAddr::new(self.addr & !(PAGE_SIZE - 1))
    }

    /// Rounds the address up to the page boundary.
    ///
    /// Addresses in the last page of the address space saturate to that page's start.
    pub const fn round_up(self) -> Self {
        match self.addr.checked_add(PAGE_SIZE - 1) {
            Some(addr) => VirtAddr::new(addr & !(PAGE_SIZE - 1)),
            None => self.round_down(),
        }
    }

    /// Returns whether the address is aligned to a page boundary.
    pub const fn is_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub const fn is_null(self) -> bool {
        self.addr == 0
    }

    /// Returns whether the address lies in user space.
    pub const fn in_user_space(self) -> bool {
        self.addr < USER_END
    }

    /// Returns whether the address lies in kernel space.
    pub const fn is_kernel(self) -> bool {
        self.addr >= KERNEL_BASE
    }

    /// Adds `bytes` to the address, returning `None` on overflow.
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.addr.checked_add(bytes) {
            Some(addr) => Some(VirtAddr::new(addr)),
            None => None,
        }
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        VirtAddr::new(self.addr + rhs)
    }
}

impl Sub<usize> for VirtAddr {
    type Output = Self;

    fn sub(self, rhs: usize) -> Self {
        VirtAddr::new(self.addr - rhs)
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = usize;

    fn sub(self, rhs: VirtAddr) -> usize {
        self.addr - rhs.addr
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        VirtAddr::new(addr)
    }
}

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.addr)
    }
}

/// A virtual page number.
///
/// This is the key of every per-page table in the memory manager: the
/// supplemental page table and the page table both index pages by it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum {
    page_num: usize,
}

impl VirtPageNum {
    /// Creates a new `VirtPageNum` from the given page number.
    pub const fn new(page_num: usize) -> Self {
        VirtPageNum { page_num }
    }

    /// Gets the inner `usize` page number.
    pub const fn to_usize(self) -> usize {
        self.page_num
    }

    /// Returns the starting address of the page.
    pub const fn address(self) -> VirtAddr {
        VirtAddr::new(self.page_num << PAGE_OFFSET_WIDTH)
    }

    /// Returns the page `count` pages above this one.
    pub const fn offset(self, count: usize) -> Self {
        VirtPageNum::new(self.page_num + count)
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(vpn: VirtPageNum) -> Self {
        vpn.address()
    }
}

impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPageNum({:#x})", self.page_num)
    }
}
