use std::io::{self, Write};

use chrono::Utc;
use env_logger::fmt::Formatter;
use log::{Level, LevelFilter, Record};

pub fn init(level: LevelFilter) {
    env_logger::Builder::new()
        .format(format)
        .filter_level(level)
        .init();
}

fn format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let level = level_name(record.level());
    writeln!(f, "{timestamp} | {level:<11} | {}", record.args())
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "information",
        Level::Debug | Level::Trace => "debug",
    }
}
