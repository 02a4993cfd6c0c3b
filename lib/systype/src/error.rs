use core::fmt::{self, Display};

use strum::FromRepr;

/// Type alias for result of general functions.
pub type SysResult<T> = Result<T, SysError>;

/// Linux specific error codes defined in `errno.h`.
///
/// Only the codes the memory manager can produce are listed here.
// See in "asm-generic/errno-base.h".
/// https://elixir.bootlin.com/linux/v6.8.9/source/include/uapi/asm-generic/errno-base.h
#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// I/O error
    EIO = 5,
    /// Bad file number
    EBADF = 9,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// Device or resource busy
    EBUSY = 16,
    /// File exists
    EEXIST = 17,
    /// No such device
    ENODEV = 19,
    /// Invalid argument
    EINVAL = 22,
    /// File too large
    EFBIG = 27,
    /// No space left on device
    ENOSPC = 28,
    /// Illegal seek
    ESPIPE = 29,
}

impl SysError {
    /// Returns the error description.
    pub const fn as_str(&self) -> &'static str {
        use self::SysError::*;
        match self {
            EPERM => "Operation not permitted",
            ENOENT => "No such file or directory",
            EIO => "I/O error",
            EBADF => "Bad file number",
            ENOMEM => "Out of memory",
            EACCES => "Permission denied",
            EFAULT => "Bad address",
            EBUSY => "Device or resource busy",
            EEXIST => "File exists",
            ENODEV => "No such device",
            EINVAL => "Invalid argument",
            EFBIG => "File too large",
            ENOSPC => "No space left on device",
            ESPIPE => "Illegal seek",
        }
    }

    /// Converts an error code back into a `SysError`.
    ///
    /// Returns `None` for codes this crate does not know about.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Returns the value a syscall hands back to user space for this error.
    pub const fn as_syscall_ret(self) -> isize {
        -(self as i32 as isize)
    }
}

impl Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_from_i32() {
        assert_eq!(SysError::from_i32(SysError::ENOSPC.code()), Some(SysError::ENOSPC));
        assert_eq!(SysError::from_i32(12), Some(SysError::ENOMEM));
        assert_eq!(SysError::from_i32(4095), None);
    }

    #[test]
    fn syscall_ret_is_negated_errno() {
        assert_eq!(SysError::EFAULT.as_syscall_ret(), -14);
        assert_eq!(SysError::EINVAL.to_string(), "Invalid argument");
    }
}
