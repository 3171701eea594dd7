//! A minimal leveled logging sink matching the original archiver's line
//! format: `LEVEL timestamp: message`. Library code logs through the
//! standard `log` facade; this module only supplies the concrete sink the
//! CLI installs, so an embedder is free to install their own.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARNING",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        eprintln!("{level} {}: {}", Local::now().to_rfc3339(), record.args());
    }

    fn flush(&self) {}
}

/// Install the console sink as the global logger. Safe to call once at
/// process start; subsequent calls are no-ops if a logger is already set.
pub fn init() {
    let _ = log::set_boxed_logger(Box::new(ConsoleLogger)).map(|()| log::set_max_level(LevelFilter::Info));
}
