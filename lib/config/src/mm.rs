//! Module defining constants related to memory management.

/// Page size
pub const PAGE_SIZE: usize = 4096;
/// Width of page offset
pub const PAGE_OFFSET_WIDTH: usize = 12;

/// Size of a sector on a block device
pub const SECTOR_SIZE: usize = 512;
/// Number of consecutive sectors holding one page on the swap device
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Start of user space. The first page is never mapped so that null stays invalid.
pub const USER_START: usize = 0x0;
/// Start of kernel address space. Every address at or above this is a kernel address.
pub const KERNEL_BASE: usize = 0x0000_0080_0400_0000;
/// End of user space (exclusive)
pub const USER_END: usize = KERNEL_BASE;

/// Position of the stack of a user process in the virtual address space
pub const USER_STACK_TOP: usize = 0x0000_0000_4748_0000;
/// Maximum size the user stack may grow to
pub const USER_STACK_MAX_SIZE: usize = 1024 * 1024;
/// Lowest address the user stack may grow to
pub const USER_STACK_LOWER: usize = USER_STACK_TOP - USER_STACK_MAX_SIZE;
/// How far below the stack pointer an access may land and still count as a stack
/// access. `push` writes 8 bytes below `rsp` before it is decremented.
pub const STACK_ACCESS_SLACK: usize = 8;

/// Kernel virtual address of the first frame in the user frame pool
pub const FRAME_POOL_BASE: usize = 0x0000_0080_0420_0000;
/// Default number of frames in the user frame pool
pub const DEFAULT_USER_FRAMES: usize = 1024;
