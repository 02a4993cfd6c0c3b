//! Demand-paged virtual memory for user processes.
//!
//! Every process owns an [`AddrSpace`](vm::addr_space::AddrSpace): a
//! supplemental page table describing its pages and a page table mapping
//! the resident ones. All address spaces draw frames from one shared pool and
//! spill anonymous pages to one swap device; both live in the [`Vm`] built
//! at boot by [`init`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address;
pub mod block;
pub mod file;
pub mod frame;
pub mod page;
pub mod spt;
pub mod swap;
pub mod trap;
pub mod vm;

#[cfg(test)]
mod test_util;

use alloc::sync::Arc;

use config::mm::DEFAULT_USER_FRAMES;
use spin::Once;

use crate::{block::BlockDevice, frame::FrameTable, swap::SwapManager};

pub type SpinLock<T> = spin::Mutex<T>;

/// Runtime sizing of the memory manager.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Number of frames in the user frame pool.
    pub frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            frames: DEFAULT_USER_FRAMES,
        }
    }
}

/// State shared by every address space: the frame pool and the swap area.
pub struct Vm {
    frames: FrameTable,
    swap: SwapManager,
}

impl Vm {
    pub fn new(config: VmConfig, swap_device: Option<Arc<dyn BlockDevice>>) -> Self {
        let swap = match swap_device {
            Some(device) => SwapManager::new(device),
            None => {
                log::warn!("[mm] no swap device, anonymous pages cannot be evicted");
                SwapManager::empty()
            }
        };
        Vm {
            frames: FrameTable::new(config.frames),
            swap,
        }
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapManager {
        &self.swap
    }
}

static VM: Once<Arc<Vm>> = Once::new();

/// Builds the global memory manager. Later calls return the first one.
pub fn init(config: VmConfig, swap_device: Option<Arc<dyn BlockDevice>>) -> &'static Arc<Vm> {
    VM.call_once(|| {
        log::info!("[mm] init with {} user frames", config.frames);
        Arc::new(Vm::new(config, swap_device))
    })
}

/// The global memory manager.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn vm_context() -> &'static Arc<Vm> {
    match VM.get() {
        Some(vm) => vm,
        None => panic!("[mm] vm_context used before init"),
    }
}
