//! `log` backend writing to the serial port.

use log::{Level, LevelFilter, Log, Metadata, Record};
use crate::constants::logging::MAX_LEVEL;
use crate::serial_println;

struct SerialLogger {
    max_level: LevelFilter,
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial_println!("[{}] {}: {}", tag(record.level()), record.target(), record.args());
    }

    fn flush(&self) {}
}

fn tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

static LOGGER: SerialLogger = SerialLogger { max_level: MAX_LEVEL };

/// Installs the serial logger. Later calls are ignored.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}
