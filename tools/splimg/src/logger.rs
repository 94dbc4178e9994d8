//! Log output in the same line format the loader uses on its serial port:
//! `ESC[{color}m{tag:8}ESC[0m: {message}`, so host and boot logs can be
//! read side by side and filtered with the same tools.

use anyhow::{anyhow, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

pub struct TaggedLogger {
    tag: [u8; 8],
}

impl TaggedLogger {
    pub const fn new(tag_str: &str) -> Self {
        let tag_bytes = tag_str.as_bytes();
        let mut tag = [0x20u8; 8];
        let copy_len = if tag_bytes.len() < 8 {
            tag_bytes.len()
        } else {
            8
        };
        // copy from slice is not const stable yet
        let mut i = 0;
        while i < copy_len {
            tag[i] = tag_bytes[i];
            i += 1;
        }
        TaggedLogger { tag }
    }

    fn tag(&self) -> &str {
        core::str::from_utf8(&self.tag).unwrap_or("????????")
    }

    pub fn format(&self, level: Level, args: &core::fmt::Arguments) -> String {
        format!("\x1b[{}m{}\x1b[0m: {}", color(level), self.tag(), args)
    }
}

fn color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Debug => 36,
        Level::Trace => 90,
    }
}

impl Log for TaggedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", self.format(record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: TaggedLogger = TaggedLogger::new("SPLIMG");

/// Install the tool's logger. `SetLoggerError` is not a `std` error unless
/// `log` is built with `std`, so it is converted by hand.
pub fn init(level: LevelFilter) -> Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow!("failed to install logger: {}", e))?;
    log::set_max_level(level);
    Ok(())
}
