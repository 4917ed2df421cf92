#[cfg(test)]
mod tests;
mod upload;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use log::{info, warn};
use tokio::{sync::Notify, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{
    error::{Error, Result},
    ledger::Ledger,
    probe::Probe,
    storage::BoxedStore,
    watcher::WatchTree,
};

const REGION_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const CANCEL_WAIT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct BucketConfig {
    /// Cap on concurrently active uploads.
    pub max_active: usize,
    /// Wall-clock cap on one upload attempt.
    pub upload_timeout: Duration,
    /// Wall-clock cap on the post-upload existence check; zero disables
    /// verification.
    pub verify_timeout: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            max_active: 10,
            upload_timeout: Duration::from_secs(10),
            verify_timeout: Duration::ZERO,
        }
    }
}

pub type UploadCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// One named remote destination backed by a local directory. Candidate
/// files queue in FIFO order in `pending` and move into the bounded
/// `active` set as upload slots free up; a path is never in both at once.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    path: PathBuf,
    config: BucketConfig,
    storage: BoxedStore,
    probe: Arc<Probe>,
    region: Mutex<Option<String>>,
    state: Mutex<QueueState>,
    drained: Notify,
    disposed: AtomicBool,
    on_uploaded: Option<UploadCallback>,
    on_failed: Option<UploadCallback>,
    watcher: Mutex<Option<WatcherHandles>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PathBuf>,
    members: HashSet<PathBuf>,
    active: HashMap<PathBuf, ActiveUpload>,
}

struct ActiveUpload {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct WatcherHandles {
    tree: WatchTree,
    forwarder: JoinHandle<()>,
}

impl Bucket {
    /// Validate the directory, derive the bucket name from its last
    /// segment, and resolve the remote region. A failed region lookup
    /// leaves the bucket disconnected but constructed; `connect` may be
    /// retried later.
    pub async fn new(
        path: PathBuf,
        config: BucketConfig,
        storage: BoxedStore,
        probe: Arc<Probe>,
        on_uploaded: Option<UploadCallback>,
        on_failed: Option<UploadCallback>,
    ) -> Result<Bucket> {
        if !path.is_absolute() {
            return Err(Error::PathNotAbsolute(path));
        }
        if !path.is_dir() {
            return Err(Error::FileIsNotDirectory(path));
        }
        let name = derive_name(&path)?;

        let bucket = Bucket {
            inner: Arc::new(Inner {
                name,
                path,
                config,
                storage,
                probe,
                region: Mutex::new(None),
                state: Mutex::new(QueueState::default()),
                drained: Notify::new(),
                disposed: AtomicBool::new(false),
                on_uploaded,
                on_failed,
                watcher: Mutex::new(None),
            }),
        };

        if let Err(err) = bucket.connect().await {
            warn!("bucket `{}` is not connected yet: {err}", bucket.name());
        }
        Ok(bucket)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Resolve the remote region within a bounded time.
    pub async fn connect(&self) -> Result<()> {
        let name = &self.inner.name;
        let lookup = self.inner.storage.region(name);
        let region = timeout(REGION_LOOKUP_TIMEOUT, lookup)
            .await
            .map_err(|_| Error::RegionLookupTimedOut(name.clone()))??;
        info!("bucket `{name}` lives in region {region}");
        *lock(&self.inner.region) = Some(region);
        Ok(())
    }

    pub fn connected(&self) -> bool {
        lock(&self.inner.region).is_some()
    }

    pub fn ready(&self) -> bool {
        self.connected() && !self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Offer a file for upload. Paths already pending or active are
    /// dropped; everything else joins the tail of the queue.
    pub fn enqueue(&self, path: PathBuf) {
        upload::dispatch(&self.inner);

        {
            let mut state = lock(&self.inner.state);
            if state.members.contains(&path) || state.active.contains_key(&path) {
                return;
            }
            state.members.insert(path.clone());
            state.pending.push_back(path);
        }

        upload::dispatch(&self.inner);
    }

    /// Offer every regular file under the bucket directory.
    pub fn sweep(&self) {
        self.sweep_inner(None);
    }

    /// As `sweep`, but skip files the ledger already knows about.
    pub fn sweep_with_ledger(&self, ledger: &Ledger) {
        self.sweep_inner(Some(ledger));
    }

    fn sweep_inner(&self, ledger: Option<&Ledger>) {
        for entry in WalkDir::new(&self.inner.path) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("sweep of `{}` skipped an entry: {err}", self.name());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();
            if let Some(ledger) = ledger {
                if ledger.exists(&path) {
                    continue;
                }
            }
            self.enqueue(path);
        }
    }

    /// Block until both queues are empty, advancing dispatch whenever
    /// uploads finish. Meant for sweep-once shutdown.
    pub async fn finish_pending(&self) {
        loop {
            {
                let state = lock(&self.inner.state);
                if state.pending.is_empty() && state.active.is_empty() {
                    return;
                }
            }

            upload::dispatch(&self.inner);
            let _ = timeout(DRAIN_POLL, self.inner.drained.notified()).await;
        }
    }

    /// Drop everything queued and cancel every active upload, waiting a
    /// bounded time for each to wind down.
    pub async fn cancel_pending(&self) {
        let entries: Vec<(PathBuf, ActiveUpload)> = {
            let mut state = lock(&self.inner.state);
            state.pending.clear();
            state.members.clear();
            state.active.drain().collect()
        };

        for (path, mut active) in entries {
            active.token.cancel();
            if timeout(CANCEL_WAIT, &mut active.handle).await.is_err() {
                warn!("upload of `{}` did not stop in time", path.display());
                active.handle.abort();
            }
        }
    }

    /// Start watching the bucket directory, feeding new files into the
    /// queue.
    pub async fn start_watcher(&self) -> Result<()> {
        let (tx, rx) = async_channel::unbounded();
        let tree = WatchTree::new(&self.inner.path, tx).await?;

        let inner = Arc::downgrade(&self.inner);
        let forwarder = tokio::spawn(async move {
            while let Ok(path) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Bucket { inner }.enqueue(path);
            }
        });

        *lock(&self.inner.watcher) = Some(WatcherHandles { tree, forwarder });
        Ok(())
    }

    /// Disable the watcher; active uploads are left alone.
    pub fn shutdown(&self) {
        if let Some(handles) = lock(&self.inner.watcher).take() {
            handles.tree.shutdown();
            handles.forwarder.abort();
        }
    }

    /// Shut down, drop the queue, and wait for in-flight uploads.
    pub async fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.shutdown();

        let handles: Vec<(PathBuf, JoinHandle<()>)> = {
            let mut state = lock(&self.inner.state);
            state.pending.clear();
            state.members.clear();
            state
                .active
                .drain()
                .map(|(path, active)| (path, active.handle))
                .collect()
        };

        for (path, handle) in handles {
            if handle.await.is_err() {
                warn!("upload of `{}` ended abnormally", path.display());
            }
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        lock(&self.inner.state).active.len()
    }
}

fn derive_name(path: &Path) -> Result<String> {
    let Some(name) = path.file_name() else {
        return Err(Error::InvalidBucketName(path.display().to_string()));
    };
    let name = name.to_string_lossy().into_owned();
    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidBucketName(name));
    }
    Ok(name)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
