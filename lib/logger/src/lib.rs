#![cfg_attr(not(test), no_std)]

use crate_interface::call_interface;
use log::{Level, LevelFilter};

struct SimpleLogger;

/// Logger behind the `log` facade.
///
/// Records are forwarded to whichever crate implements [`LogInterface`];
/// the memory manager itself never prints.
impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }
    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        call_interface!(LogInterface::print_log(record));
    }
    fn flush(&self) {}
}

/// Output sink for log records.
///
/// The embedding kernel (or a test harness) implements this with
/// `#[crate_interface::impl_interface]`.
#[crate_interface::def_interface]
pub trait LogInterface: Send + Sync {
    fn print_log(record: &log::Record);
}

/// Parses a level name as given in the `LOG` build variable.
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level {
        Some("trace") => LevelFilter::Trace,
        Some("debug") => LevelFilter::Debug,
        Some("info") => LevelFilter::Info,
        Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        _ => LevelFilter::Off,
    }
}

/// Installs the logger and sets the level from the `LOG` build variable.
pub fn init() {
    init_with_level(parse_level(option_env!("LOG")));
}

/// Installs the logger with an explicit level. Installing twice keeps the first logger.
pub fn init_with_level(level: LevelFilter) {
    static LOGGER: SimpleLogger = SimpleLogger;
    log::set_logger(&LOGGER).ok();
    log::set_max_level(level);
}

/// ANSI color code used when printing a record of `level`.
pub fn level2color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 36,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}
