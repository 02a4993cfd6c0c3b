//! Module for validating and accessing addresses in user address space.
//!
//! This module provides a smart pointer type `UserPtr` that the kernel uses
//! to read and write user memory on behalf of a process. Pages that are not
//! resident are brought in by a kernel-mode page fault, and accesses mark the
//! page table entries accessed and dirty the way the MMU does for the
//! process itself.

use core::marker::PhantomData;

use config::mm::PAGE_SIZE;
use systype::{SysError, SysResult};

use crate::address::VirtAddr;

use super::{
    addr_space::AddrSpace,
    fault::{PageFaultFlags, PageFaultInfo},
};

pub trait AccessType {}
pub trait ReadAccess: AccessType {}
pub trait WriteAccess: AccessType {}
pub struct ReadMarker;
pub struct WriteMarker;
pub struct ReadWriteMarker;

impl AccessType for ReadMarker {}
impl AccessType for WriteMarker {}
impl AccessType for ReadWriteMarker {}
impl ReadAccess for ReadMarker {}
impl WriteAccess for WriteMarker {}
impl ReadAccess for ReadWriteMarker {}
impl WriteAccess for ReadWriteMarker {}

/// A smart pointer that can be used to read memory in user address space.
pub type UserReadPtr<'a> = UserPtr<'a, ReadMarker>;

/// A smart pointer that can be used to write memory in user address space.
pub type UserWritePtr<'a> = UserPtr<'a, WriteMarker>;

/// A smart pointer that can be used to read and write memory in user address space.
pub type UserReadWritePtr<'a> = UserPtr<'a, ReadWriteMarker>;

/// Base type used to implement the smart pointers for read, write, and read-write access,
/// uniformly.
pub struct UserPtr<'a, A>
where
    A: AccessType,
{
    addr: VirtAddr,
    /// User stack pointer saved on entry to the kernel, used to tell stack
    /// growth apart from bad pointers.
    user_sp: usize,
    addr_space: &'a AddrSpace,
    _access: PhantomData<A>,
}

/// Blanket implementation for all access types.
impl<'a, A> UserPtr<'a, A>
where
    A: AccessType,
{
    /// Create a new `UserPtr` from a virtual address.
    ///
    /// This function may construct a valid or invalid `UserPtr` depending on the
    /// address provided; the address is checked on access.
    pub fn new(addr: usize, user_sp: usize, addr_space: &'a AddrSpace) -> Self {
        Self {
            addr: VirtAddr::new(addr),
            user_sp,
            addr_space,
            _access: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.addr.is_null()
    }

    pub fn to_usize(&self) -> usize {
        self.addr.to_usize()
    }
}

/// Blanket implementation for read-access pointers.
impl<A> UserPtr<'_, A>
where
    A: ReadAccess,
{
    /// Reads `buf.len()` bytes at the pointer.
    pub fn read(&self, buf: &mut [u8]) -> SysResult<()> {
        self.addr_space.copy_in(self.addr, buf, self.user_sp)
    }

    pub fn read_usize(&self) -> SysResult<usize> {
        let mut bytes = [0u8; size_of::<usize>()];
        self.read(&mut bytes)?;
        Ok(usize::from_ne_bytes(bytes))
    }
}

/// Blanket implementation for write-access pointers.
impl<A> UserPtr<'_, A>
where
    A: WriteAccess,
{
    /// Writes `data` at the pointer.
    pub fn write(&self, data: &[u8]) -> SysResult<()> {
        self.addr_space.copy_out(self.addr, data, self.user_sp)
    }

    pub fn write_usize(&self, value: usize) -> SysResult<()> {
        self.write(&value.to_ne_bytes())
    }
}

impl AddrSpace {
    /// Copies user memory at `va` into `buf`.
    ///
    /// # Errors
    /// Returns [`SysError::EFAULT`] if any byte of the range is not a valid
    /// user address.
    pub fn copy_in(&self, va: VirtAddr, buf: &mut [u8], user_sp: usize) -> SysResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va.checked_add(done).ok_or(SysError::EFAULT)?;
            let len = (PAGE_SIZE - addr.page_offset()).min(buf.len() - done);
            let offset = addr.page_offset();
            self.with_user_page(addr, false, user_sp, |bytes| {
                buf[done..done + len].copy_from_slice(&bytes[offset..offset + len]);
            })?;
            done += len;
        }
        Ok(())
    }

    /// Copies `data` into user memory at `va`.
    ///
    /// # Errors
    /// Returns [`SysError::EFAULT`] if any byte of the range is not a valid
    /// user address or lies in a read-only page.
    pub fn copy_out(&self, va: VirtAddr, data: &[u8], user_sp: usize) -> SysResult<()> {
        let mut done = 0;
        while done < data.len() {
            let addr = va.checked_add(done).ok_or(SysError::EFAULT)?;
            let len = (PAGE_SIZE - addr.page_offset()).min(data.len() - done);
            let offset = addr.page_offset();
            self.with_user_page(addr, true, user_sp, |bytes| {
                bytes[offset..offset + len].copy_from_slice(&data[done..done + len]);
            })?;
            done += len;
        }
        Ok(())
    }

    /// Runs `f` on the resident contents of the page containing `va`.
    fn with_user_page(
        &self,
        va: VirtAddr,
        write: bool,
        user_sp: usize,
        f: impl FnOnce(&mut [u8]),
    ) -> SysResult<()> {
        if !va.in_user_space() {
            return Err(SysError::EFAULT);
        }
        // The second round runs after a fault has registered a stack page.
        for _ in 0..2 {
            let spt = self.spt.lock();
            if let Some(page_ref) = spt.find(va) {
                let mut page = page_ref.lock();
                if write && !page.writable() {
                    return Err(SysError::EFAULT);
                }
                self.claim_locked(&page_ref, &mut page)?;
                let frame = page.frame().ok_or(SysError::EFAULT)?;
                self.page_table().lock().touch(page.vpn(), write);
                let mut bytes = self.vm().frames().bytes(frame);
                f(&mut bytes[..]);
                return Ok(());
            }
            drop(spt);
            let flags = if write {
                PageFaultFlags::WRITE
            } else {
                PageFaultFlags::empty()
            };
            self.handle_page_fault(PageFaultInfo {
                fault_addr: va,
                flags,
                user_sp,
            })?;
        }
        Err(SysError::EFAULT)
    }
}

#[cfg(test)]
mod tests {
    use config::mm::{KERNEL_BASE, USER_STACK_TOP};

    use super::*;
    use crate::{
        page::{ContentSource, PageKind},
        test_util::test_vm,
    };

    const DATA: usize = 0x800_0000;

    #[test]
    fn access_spanning_two_pages() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        for i in 0..2 {
            space
                .alloc_page(PageKind::Anon, VirtAddr::new(DATA + i * PAGE_SIZE), true, ContentSource::ZeroFill)
                .unwrap();
        }
        let ptr = UserReadWritePtr::new(DATA + PAGE_SIZE - 3, USER_STACK_TOP, &space);
        ptr.write_usize(0x0102_0304_0506_0708).unwrap();
        assert_eq!(ptr.read_usize(), Ok(0x0102_0304_0506_0708));
        assert!(space.find_page(VirtAddr::new(DATA + PAGE_SIZE)).unwrap().lock().is_resident());
    }

    #[test]
    fn syscall_argument_below_sp_grows_the_stack() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let sp = USER_STACK_TOP - 2 * PAGE_SIZE;
        UserWritePtr::new(sp, sp, &space).write(b"argv").unwrap();
        let mut buf = [0u8; 4];
        UserReadPtr::new(sp, sp, &space).read(&mut buf).unwrap();
        assert_eq!(&buf, b"argv");
        assert_eq!(space.stack_bottom(), VirtAddr::new(sp));
    }

    #[test]
    fn invalid_pointers_are_faults() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let mut buf = [0u8; 4];
        assert!(UserReadPtr::new(0, USER_STACK_TOP, &space).is_null());
        assert_eq!(
            UserReadPtr::new(0, USER_STACK_TOP, &space).read(&mut buf),
            Err(SysError::EFAULT)
        );
        assert_eq!(
            UserReadPtr::new(KERNEL_BASE, USER_STACK_TOP, &space).read(&mut buf),
            Err(SysError::EFAULT)
        );
        assert_eq!(
            UserWritePtr::new(DATA, USER_STACK_TOP, &space).write(b"x"),
            Err(SysError::EFAULT)
        );
    }

    #[test]
    fn reads_do_not_dirty_pages() {
        let space = AddrSpace::build_user(test_vm(4, 4));
        let va = VirtAddr::new(DATA);
        space.alloc_page(PageKind::Anon, va, true, ContentSource::ZeroFill).unwrap();
        let mut buf = [0u8; 1];
        space.copy_in(va, &mut buf, USER_STACK_TOP).unwrap();
        let pte = space.page_table().lock().find_entry(va.page_number()).unwrap();
        assert!(pte.is_accessed());
        assert!(!pte.is_dirty());
    }
}
