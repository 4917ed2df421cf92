use std::{fmt, path::PathBuf};

use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Watch a directory tree and mirror it into S3 buckets
#[derive(Parser, Debug)]
#[command(name = "bucketeer", about, long_about = None)]
pub struct Cli {
    /// Watched root; its immediate subdirectories are bucket names
    #[arg(short, long, value_name = "PATH")]
    pub root: PathBuf,

    /// Seconds between synchronization sweeps (0 disables)
    #[arg(short, long, value_name = "SECONDS", default_value_t = 10)]
    pub interval: u64,

    /// Failed uploads retried per sweep (0 disables)
    #[arg(short, long, value_name = "NUM", default_value_t = 10)]
    pub count: u32,

    /// Concurrent uploads per bucket
    #[arg(short, long = "bucket_max", value_name = "NUM", default_value_t = 10)]
    pub bucket_max: usize,

    /// Seconds before an upload attempt times out
    #[arg(short, long, value_name = "SECONDS", default_value_t = 10)]
    pub timeout: u64,

    /// Failed attempts before a file is given up on
    #[arg(short, long = "fail_limit", value_name = "NUM", default_value_t = 10)]
    pub fail_limit: u32,

    /// Seconds between reachability checks (0 treats the network as up)
    #[arg(short, long = "ping_interval", value_name = "SECONDS", default_value_t = 10)]
    pub ping_interval: u64,

    /// Milliseconds allowed for the post-upload existence check (0 disables)
    #[arg(
        short = 'a',
        long = "aws_check_timeout",
        value_name = "MILLIS",
        default_value_t = 0
    )]
    pub aws_check_timeout: u64,

    /// Seconds between ledger cleanup passes (0 disables)
    #[arg(
        short = 'd',
        long = "database_cleanup_interval",
        value_name = "SECONDS",
        default_value_t = 10
    )]
    pub database_cleanup_interval: u64,

    /// Offer every file once, wait for the queue to drain, and exit
    #[arg(short, long, default_value_t = false)]
    pub sweep: bool,

    /// Least severe level that is logged
    #[arg(short, long, value_enum, default_value_t = Verbosity::Info)]
    pub verbosity: Verbosity,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    Critical,
    Info,
    Warn,
    Error,
}

impl Verbosity {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            // the log crate has no critical level; both floor at error
            Verbosity::Critical | Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verbosity::Critical => "critical",
            Verbosity::Info => "info",
            Verbosity::Warn => "warn",
            Verbosity::Error => "error",
        };
        f.write_str(name)
    }
}
