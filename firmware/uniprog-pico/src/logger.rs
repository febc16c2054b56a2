//! Forwards `log` records from uniprog-core to defmt

use core::fmt::Write;
use heapless::String;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Longest formatted record; longer ones are truncated
const LINE_LEN: usize = 128;

struct DefmtLogger;

static LOGGER: DefmtLogger = DefmtLogger;

impl Log for DefmtLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let mut line: String<LINE_LEN> = String::new();
        // truncation is fine
        let _ = write!(line, "{}", record.args());
        match record.level() {
            Level::Error => defmt::error!("[{=str}] {=str}", record.target(), line.as_str()),
            Level::Warn => defmt::warn!("[{=str}] {=str}", record.target(), line.as_str()),
            Level::Info => defmt::info!("[{=str}] {=str}", record.target(), line.as_str()),
            Level::Debug => defmt::debug!("[{=str}] {=str}", record.target(), line.as_str()),
            Level::Trace => defmt::trace!("[{=str}] {=str}", record.target(), line.as_str()),
        }
    }

    fn flush(&self) {}
}

/// Install the bridge; call once before any core code runs
pub fn init() {
    // thumbv6m has no compare-and-swap; must run before any task starts
    unsafe {
        let _ = log::set_logger_racy(&LOGGER);
        log::set_max_level_racy(LevelFilter::Debug);
    }
}
