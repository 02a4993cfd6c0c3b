//! Page-fault handling.
//!
//! A fault on a registered page brings the page in. A fault just below the
//! stack pointer, inside the stack window, grows the stack by one page.
//! Everything else is a bad access by the process, except for a kernel-mode
//! fault on a kernel address, which is a kernel bug.

use bitflags::bitflags;
use config::mm::{STACK_ACCESS_SLACK, USER_STACK_LOWER, USER_STACK_TOP};
use systype::{SysError, SysResult};

use crate::{
    address::VirtAddr,
    page::{ContentSource, Page, PageKind},
    spt::{PageRef, SupplementalPageTable},
};

use super::addr_space::AddrSpace;

bitflags! {
    /// Cause of a page fault, as reported by the trap frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultFlags: u32 {
        /// The page was present; the access violated its protection.
        const PRESENT = 1 << 0;
        /// The access was a write.
        const WRITE = 1 << 1;
        /// The access came from user mode.
        const USER = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    pub fault_addr: VirtAddr,
    pub flags: PageFaultFlags,
    /// User stack pointer at the time of the fault. For faults taken in
    /// kernel mode this is the one saved on entry to the kernel.
    pub user_sp: usize,
}

/// Returns whether an access to `addr` looks like the stack growing.
fn is_stack_access(addr: VirtAddr, user_sp: usize) -> bool {
    let addr = addr.to_usize();
    (USER_STACK_LOWER..USER_STACK_TOP).contains(&addr)
        && addr >= user_sp.saturating_sub(STACK_ACCESS_SLACK)
}

/// Outcome of a fault no page can satisfy.
fn unresolvable(info: &PageFaultInfo) -> SysResult<()> {
    if !info.flags.contains(PageFaultFlags::USER) && info.fault_addr.is_kernel() {
        panic!(
            "[fault] kernel page fault at {:?} ({:?})",
            info.fault_addr, info.flags
        );
    }
    log::info!(
        "[fault] bad access at {:?} ({:?}, sp {:#x})",
        info.fault_addr,
        info.flags,
        info.user_sp
    );
    Err(SysError::EFAULT)
}

impl AddrSpace {
    /// Resolves a page fault in this address space.
    ///
    /// # Errors
    /// Returns [`SysError::EACCES`] for a write to a read-only page,
    /// [`SysError::EFAULT`] for an access no page covers, or the error that
    /// kept the page from being brought in.
    ///
    /// # Panics
    ///
    /// Panics on a kernel-mode fault on a kernel address.
    pub fn handle_page_fault(&self, info: PageFaultInfo) -> SysResult<()> {
        let PageFaultInfo {
            fault_addr,
            flags,
            user_sp,
        } = info;
        let write = flags.contains(PageFaultFlags::WRITE);
        log::trace!("[fault] {fault_addr:?} {flags:?} sp {user_sp:#x}");

        if flags.contains(PageFaultFlags::PRESENT) {
            let read_only = self
                .find_page(fault_addr)
                .is_some_and(|page| !page.lock().writable());
            if write && read_only {
                return Err(SysError::EACCES);
            }
            return unresolvable(&info);
        }
        if !fault_addr.in_user_space() {
            return unresolvable(&info);
        }

        let mut spt = self.spt.lock();
        let (page_ref, grown) = match spt.find(fault_addr) {
            Some(page) => (page, false),
            None if is_stack_access(fault_addr, user_sp) => {
                (self.grow_stack(&mut spt, fault_addr)?, true)
            }
            None => return unresolvable(&info),
        };
        let mut page = page_ref.lock();
        if write && !page.writable() {
            return Err(SysError::EACCES);
        }
        if let Err(err) = self.claim_locked(&page_ref, &mut page) {
            let va = page.va();
            drop(page);
            if grown {
                spt.remove(va, &self.ctx());
                log::debug!("[fault] stack growth to {va:?} undone: {err:?}");
            }
            return Err(err);
        }
        if grown {
            self.lower_stack_bottom(page.va());
        }
        // The access retried after the fault.
        self.page_table().lock().touch(page.vpn(), write);
        Ok(())
    }

    fn grow_stack(&self, spt: &mut SupplementalPageTable, addr: VirtAddr) -> SysResult<PageRef> {
        let va = addr.round_down();
        let page = spt.insert(Page::new_uninit(
            va,
            true,
            PageKind::Anon,
            ContentSource::ZeroFill,
        )?)?;
        log::debug!("[fault] stack grown to {va:?}");
        Ok(page)
    }
}
