use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_channel::{Receiver, Sender};
use async_recursion::async_recursion;
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{task::JoinHandle, time::sleep};

use crate::error::Result;

const WATCH_RETRY_DELAY: Duration = Duration::from_millis(750);

type RawEvent = notify::Result<Event>;

/// Recursive watch over a directory tree, assembled from one non-recursive
/// native watch per directory. The platform's recursive flag is not trusted;
/// new subdirectories are picked up from the events of their parents.
///
/// Every raw event funnels into a single dispatcher task that owns the node
/// map, so a directory is fully registered before any file event beneath it
/// is forwarded.
pub struct WatchTree {
    dispatcher: JoinHandle<()>,
}

struct WatchNode {
    _watcher: RecommendedWatcher,
}

impl WatchTree {
    /// Watch `root` and send every candidate file path to `files`. Files
    /// already present under `root` are not reported; the initial sweep
    /// owns those.
    pub async fn new(root: &Path, files: Sender<PathBuf>) -> Result<WatchTree> {
        let (raw_tx, raw_rx) = async_channel::unbounded();

        let mut nodes = HashMap::new();
        let node = attach(&raw_tx, root).await?;
        nodes.insert(root.to_owned(), node);
        for entry in std::fs::read_dir(root)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                attach_subtree(&mut nodes, &raw_tx, path, None).await;
            }
        }

        let dispatcher = tokio::spawn(dispatch_events(nodes, raw_tx, raw_rx, files));
        Ok(WatchTree { dispatcher })
    }

    pub fn shutdown(&self) {
        self.dispatcher.abort();
    }
}

impl Drop for WatchTree {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn dispatch_events(
    mut nodes: HashMap<PathBuf, WatchNode>,
    raw_tx: Sender<RawEvent>,
    raw_rx: Receiver<RawEvent>,
    files: Sender<PathBuf>,
) {
    while let Ok(result) = raw_rx.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                warn!("watch error: {err}");
                continue;
            }
        };

        // reads must not look like modifications
        if matches!(event.kind, EventKind::Access(_)) {
            continue;
        }

        for path in event.paths {
            handle_event(&mut nodes, &raw_tx, &files, path).await;
        }
    }
}

async fn handle_event(
    nodes: &mut HashMap<PathBuf, WatchNode>,
    raw_tx: &Sender<RawEvent>,
    files: &Sender<PathBuf>,
    path: PathBuf,
) {
    if path.is_dir() {
        if !nodes.contains_key(&path) {
            attach_subtree(nodes, raw_tx, path, Some(files.clone())).await;
        }
    } else if path.is_file() {
        let _ = files.send(path).await;
    } else if nodes.contains_key(&path) {
        // a watched directory is gone; drop its whole subtree
        debug!("unwatching `{}`", path.display());
        nodes.retain(|watched, _| !watched.starts_with(&path));
    }
}

/// Watch `dir` and everything below it. Directories discovered at runtime
/// forward the regular files they already contain, closing the race between
/// the watch attaching and the first writes landing.
#[async_recursion]
async fn attach_subtree(
    nodes: &mut HashMap<PathBuf, WatchNode>,
    raw_tx: &Sender<RawEvent>,
    dir: PathBuf,
    files: Option<Sender<PathBuf>>,
) {
    match attach(raw_tx, &dir).await {
        Ok(node) => {
            debug!("watching `{}`", dir.display());
            nodes.insert(dir.clone(), node);
        }
        Err(err) => {
            warn!("cannot watch `{}`: {err}", dir.display());
            return;
        }
    }

    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !nodes.contains_key(&path) {
                attach_subtree(nodes, raw_tx, path, files.clone()).await;
            }
        } else if path.is_file() {
            if let Some(files) = &files {
                let _ = files.send(path).await;
            }
        }
    }
}

/// The platform can refuse a handle on a directory it has only just
/// announced; give it a moment and try once more before abandoning it.
async fn attach(raw_tx: &Sender<RawEvent>, dir: &Path) -> Result<WatchNode> {
    match try_watch(raw_tx, dir) {
        Ok(node) => Ok(node),
        Err(_) => {
            sleep(WATCH_RETRY_DELAY).await;
            try_watch(raw_tx, dir)
        }
    }
}

fn try_watch(raw_tx: &Sender<RawEvent>, dir: &Path) -> Result<WatchNode> {
    let sender = raw_tx.clone();
    let mut watcher = notify::recommended_watcher(move |result| {
        let _ = sender.send_blocking(result);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(WatchNode { _watcher: watcher })
}
