mod args;

use std::process::exit;

use clap::Parser;
use log::error;

use crate::{
    coordinator::{self, Options},
    logger,
};

pub use args::{Cli, Verbosity};

pub async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // usage, including `--help`, is a non-zero exit
            let _ = err.print();
            exit(1);
        }
    };

    logger::init(cli.verbosity.level_filter());

    let options = Options {
        root: cli.root,
        sweep_interval: cli.interval,
        sweep_count: cli.count,
        max_active: cli.bucket_max,
        upload_timeout: cli.timeout,
        fail_limit: cli.fail_limit,
        ping_interval: cli.ping_interval,
        verify_timeout: cli.aws_check_timeout,
        clean_interval: cli.database_cleanup_interval,
        sweep_once: cli.sweep,
    };

    if let Err(err) = coordinator::run(options).await {
        error!("{err}");
        exit(1);
    }
}
