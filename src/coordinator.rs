use std::{path::PathBuf, sync::Arc, time::Duration};

use log::{error, info, warn};
use tokio::{signal, sync::Notify};

use crate::{
    bucket::{Bucket, BucketConfig, UploadCallback},
    env,
    error::{Error, Result},
    ledger::Ledger,
    probe::Probe,
    storage::{BoxedStore, S3Store},
    sync::{maintenance_service, synchronize_service},
};

const LEDGER_FILE: &str = "bucketeer.db";

#[derive(Debug)]
pub struct Options {
    pub root: PathBuf,
    pub sweep_interval: u64,
    pub sweep_count: u32,
    pub max_active: usize,
    pub upload_timeout: u64,
    pub fail_limit: u32,
    pub ping_interval: u64,
    pub verify_timeout: u64,
    pub clean_interval: u64,
    pub sweep_once: bool,
}

pub async fn run(options: Options) -> Result<()> {
    env::check_credentials()?;

    let root = options.root.canonicalize()?;
    if !root.is_dir() {
        return Err(Error::FileIsNotDirectory(root));
    }

    let storage: BoxedStore = Arc::new(S3Store::from_env().await);
    let probe = Arc::new(Probe::new(Duration::from_secs(options.ping_interval)));
    let ledger = Arc::new(Ledger::open(LEDGER_FILE.as_ref(), options.fail_limit)?);

    let config = BucketConfig {
        max_active: options.max_active,
        upload_timeout: Duration::from_secs(options.upload_timeout),
        verify_timeout: Duration::from_millis(options.verify_timeout),
    };

    // sweep-once mode never consults or updates the ledger
    let callbacks = if options.sweep_once {
        None
    } else {
        let recorder = ledger.clone();
        let on_uploaded: UploadCallback = Arc::new(move |path| recorder.mark_succeeded(path));
        let recorder = ledger.clone();
        let on_failed: UploadCallback = Arc::new(move |path| recorder.mark_failed(path));
        Some((on_uploaded, on_failed))
    };

    let mut buckets = vec![];
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let (on_uploaded, on_failed) = callbacks.clone().unzip();
        let bucket = Bucket::new(
            entry.path(),
            config.clone(),
            storage.clone(),
            probe.clone(),
            on_uploaded,
            on_failed,
        )
        .await?;
        info!("watching `{}` for bucket `{}`", bucket.path().display(), bucket.name());
        buckets.push(bucket);
    }

    warn_about_unknown_buckets(&storage, &buckets).await;

    if options.sweep_once {
        sweep_once(&buckets).await;
        Ok(())
    } else {
        daemon(root, buckets, ledger, probe, &options).await
    }
}

/// Offer every file once, drain, and return.
async fn sweep_once(buckets: &[Bucket]) {
    for bucket in buckets {
        if !bucket.ready() {
            error!("skipping bucket `{}`: not connected", bucket.name());
            continue;
        }
        bucket.sweep();
    }
    for bucket in buckets {
        if bucket.ready() {
            bucket.finish_pending().await;
        }
    }
}

async fn daemon(
    root: PathBuf,
    buckets: Vec<Bucket>,
    ledger: Arc<Ledger>,
    probe: Arc<Probe>,
    options: &Options,
) -> Result<()> {
    for bucket in &buckets {
        bucket.sweep_with_ledger(&ledger);
        if let Err(err) = bucket.start_watcher().await {
            warn!("bucket `{}` runs without a watcher: {err}", bucket.name());
        }
    }

    let mut maintenance = if options.clean_interval > 0 {
        let mut service = maintenance_service(
            root.clone(),
            ledger.clone(),
            Duration::from_secs(options.clean_interval),
        );
        service.start().await?;
        Some(service)
    } else {
        None
    };

    let mut synchronize = if options.sweep_interval > 0 && options.sweep_count > 0 {
        let mut service = synchronize_service(
            root,
            buckets.clone(),
            ledger,
            probe,
            Duration::from_secs(options.sweep_interval),
            options.sweep_count,
        );
        service.start().await?;
        Some(service)
    } else {
        None
    };

    wait_for_interrupt().await;
    info!("shutting down");

    if let Some(service) = &mut synchronize {
        service.dispose().await?;
    }
    if let Some(service) = &mut maintenance {
        service.dispose().await?;
    }
    for bucket in &buckets {
        bucket.dispose().await;
    }

    Ok(())
}

/// Block until the first interrupt; a second one force-terminates.
async fn wait_for_interrupt() {
    let quit = Arc::new(Notify::new());
    let latch = quit.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            latch.notify_one();
        }
        if signal::ctrl_c().await.is_ok() {
            std::process::exit(1);
        }
    });

    quit.notified().await;
}

/// Best-effort startup check: every local directory should name a bucket
/// the credentials can actually see.
async fn warn_about_unknown_buckets(storage: &BoxedStore, buckets: &[Bucket]) {
    let known = match storage.buckets().await {
        Ok(names) => names,
        Err(err) => {
            warn!("cannot list remote buckets: {err}");
            return;
        }
    };

    for bucket in buckets {
        if !known.iter().any(|name| name == bucket.name()) {
            warn!("no remote bucket matches `{}`", bucket.name());
        }
    }
}
