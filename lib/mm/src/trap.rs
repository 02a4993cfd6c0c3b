//! Entry point from the trap handler for page faults.

use systype::SysResult;

use crate::vm::{addr_space::AddrSpace, fault::PageFaultInfo};

/// Exit status of a process killed by an unresolvable fault.
pub const FAULT_EXIT_STATUS: i32 = -1;

/// The faulting task, as seen by the memory manager.
pub trait Task: Send + Sync {
    fn tid(&self) -> usize;

    fn addr_space(&self) -> &AddrSpace;

    /// Ends the task's process with `status`.
    fn terminate(&self, status: i32);
}

/// Resolves a page fault taken by `task`.
///
/// A fault that cannot be resolved terminates the task's process, and the
/// error is returned so the trap handler does not resume it. A kernel-mode
/// fault on a kernel address does not return.
pub fn handle_user_page_fault(task: &dyn Task, info: PageFaultInfo) -> SysResult<()> {
    task.addr_space().handle_page_fault(info).inspect_err(|err| {
        log::error!(
            "[trap] task {} killed by page fault at {:?} ({:?}): {err}",
            task.tid(),
            info.fault_addr,
            info.flags
        );
        task.terminate(FAULT_EXIT_STATUS);
    })
}
