//! Really simple logger
//!
//! Diagnostics go to our own standard output, which the job never shares.
use std::io::Write;
use std::str::FromStr;

use chrono::Local;
use log::{self, Level, LevelFilter, Log, SetLoggerError};

const HEADER: &str = "Autodriver";

struct Logger;

impl Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true // log::set_max_level() is sufficient
    }

    fn log(&self, record: &log::Record) {
        let ts = Local::now().format("%Y%m%d-%H:%M:%S");
        let mut out = std::io::stdout().lock();
        // nowhere left to report a failure to print
        let _ = if record.level() == Level::Info {
            writeln!(out, "{HEADER}@{ts}: {}", record.args())
        } else {
            let lvl = record.level().to_string();
            writeln!(out, "{HEADER}@{ts}: {lvl} {}", record.args())
        };
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

pub fn setup() -> Result<(), SetLoggerError> {
    let lvl = std::env::var("RUST_LOG")
        .ok()
        .as_deref()
        .map(LevelFilter::from_str)
        .and_then(Result::ok)
        .unwrap_or(LevelFilter::Info);

    log::set_max_level(lvl);
    log::set_logger(&Logger {})
}
