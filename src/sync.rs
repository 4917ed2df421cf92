use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{bucket::Bucket, keys, ledger::Ledger, probe::Probe, service::PeriodicService};

/// Periodic pass that re-offers ledger-unknown files to their buckets and
/// retries a bounded batch of failed uploads.
pub fn synchronize_service(
    root: PathBuf,
    buckets: Vec<Bucket>,
    ledger: Arc<Ledger>,
    probe: Arc<Probe>,
    interval: Duration,
    count: u32,
) -> PeriodicService {
    let buckets = Arc::new(buckets);
    PeriodicService::new("synchronize", interval, move || {
        let root = root.clone();
        let buckets = buckets.clone();
        let ledger = ledger.clone();
        let probe = probe.clone();
        async move {
            synchronize_tick(&root, &buckets, &ledger, &probe, count).await;
        }
    })
}

async fn synchronize_tick(
    root: &Path,
    buckets: &[Bucket],
    ledger: &Ledger,
    probe: &Probe,
    count: u32,
) {
    if !probe.is_up() {
        info!("network is down, skipping synchronization");
        return;
    }

    // sweep before popping failures, so a freshly written file is not
    // handed out as a retry while its first upload is still in flight
    for bucket in buckets {
        if !bucket.connected() {
            if let Err(err) = bucket.connect().await {
                warn!("bucket `{}` is still not connected: {err}", bucket.name());
                continue;
            }
        }
        bucket.sweep_with_ledger(ledger);
    }

    for path in ledger.pop_failed(count) {
        route(root, buckets, path);
    }
}

/// Hand a failed path back to the bucket named by its first segment under
/// the root; paths that match no bucket are dropped.
fn route(root: &Path, buckets: &[Bucket], path: PathBuf) {
    let Some(name) = keys::bucket_name(root, &path) else {
        return;
    };
    if let Some(bucket) = buckets.iter().find(|bucket| bucket.name() == name) {
        bucket.enqueue(path);
    }
}

/// Periodic pass that drops ledger rows whose file vanished or moved
/// outside the watched root.
pub fn maintenance_service(
    root: PathBuf,
    ledger: Arc<Ledger>,
    interval: Duration,
) -> PeriodicService {
    PeriodicService::new("ledger-maintenance", interval, move || {
        let root = root.clone();
        let ledger = ledger.clone();
        async move {
            maintenance_tick(&root, &ledger);
        }
    })
}

fn maintenance_tick(root: &Path, ledger: &Ledger) {
    for path in ledger.pop_all() {
        if !path.starts_with(root) || !path.exists() {
            debug!("purging ledger row for `{}`", path.display());
            ledger.remove(&path);
        }
    }
}
