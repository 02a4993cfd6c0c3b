use std::{eprintln, sync::Once};

use alloc::sync::Arc;
use config::mm::SECTORS_PER_PAGE;
use logger::LogInterface;

use crate::{Vm, VmConfig, block::RamDisk, swap::SwapManager};

struct StderrSink;

#[crate_interface::impl_interface]
impl LogInterface for StderrSink {
    fn print_log(record: &log::Record) {
        eprintln!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            logger::level2color(record.level()),
            record.level(),
            record.args()
        );
    }
}

fn init_log() {
    static INIT: Once = Once::new();
    INIT.call_once(logger::init);
}

pub fn swap_with_slots(slots: usize) -> SwapManager {
    init_log();
    SwapManager::new(Arc::new(RamDisk::new(slots * SECTORS_PER_PAGE)))
}

/// A memory manager with `frames` frames and `slots` swap slots.
pub fn test_vm(frames: usize, slots: usize) -> Arc<Vm> {
    init_log();
    Arc::new(Vm::new(
        VmConfig { frames },
        Some(Arc::new(RamDisk::new(slots * SECTORS_PER_PAGE))),
    ))
}
