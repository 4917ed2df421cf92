use std::{
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
};

use log::{info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    keys,
};

use super::{lock, ActiveUpload, Inner};

/// Advance the queue: start uploads for pending paths until the active set
/// is full or the queue runs dry. No-op while the bucket is not ready or
/// the network is down; queued paths are retained.
pub(super) fn dispatch(inner: &Arc<Inner>) {
    if inner.disposed.load(Ordering::SeqCst) || lock(&inner.region).is_none() {
        return;
    }
    if !inner.probe.is_up() {
        return;
    }

    loop {
        let mut state = lock(&inner.state);
        if state.active.len() >= inner.config.max_active {
            return;
        }
        let Some(path) = state.pending.pop_front() else {
            return;
        };
        state.members.remove(&path);

        // the task blocks on the state mutex until the entry is in place
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(inner.clone(), path.clone(), token.clone()));
        state.active.insert(path, ActiveUpload { token, handle });
    }
}

async fn run(inner: Arc<Inner>, path: PathBuf, token: CancellationToken) {
    // the probe may have flipped since this upload was dispatched
    if !inner.probe.is_up() {
        requeue(&inner, path);
        return;
    }

    let result = attempt(&inner, &path, &token).await;
    token.cancel();
    finish(&inner, path, result);
}

async fn attempt(inner: &Inner, path: &Path, token: &CancellationToken) -> Result<()> {
    let key = keys::object_key(&inner.path, path)?;

    let upload = inner.storage.put(&inner.name, &key, path);
    tokio::select! {
        result = upload => result?,
        () = sleep(inner.config.upload_timeout) => {
            return Err(Error::UploadTimedOut(path.to_owned()));
        }
        () = token.cancelled() => {
            return Err(Error::UploadCancelled(path.to_owned()));
        }
    }

    verify(inner, &key, token).await
}

/// Bounded-time existence check for the object that was just acknowledged.
/// Any error, and the timer winning, both count as a mismatch.
async fn verify(inner: &Inner, key: &str, token: &CancellationToken) -> Result<()> {
    if inner.config.verify_timeout.is_zero() {
        return Ok(());
    }

    let check = inner.storage.exists(&inner.name, key);
    let found = tokio::select! {
        result = check => result.unwrap_or(false),
        () = sleep(inner.config.verify_timeout) => false,
        () = token.cancelled() => false,
    };

    if found {
        Ok(())
    } else {
        Err(Error::VerificationFailed(key.to_owned()))
    }
}

fn requeue(inner: &Inner, path: PathBuf) {
    let mut state = lock(&inner.state);
    state.active.remove(&path);
    if state.members.insert(path.clone()) {
        state.pending.push_back(path);
    }
}

fn finish(inner: &Arc<Inner>, path: PathBuf, result: Result<()>) {
    lock(&inner.state).active.remove(&path);

    match result {
        Ok(()) => {
            info!("uploaded `{}`", path.display());
            if let Some(callback) = &inner.on_uploaded {
                callback(&path);
            }
        }
        Err(err) => {
            warn!("upload of `{}` failed: {err}", path.display());
            if let Some(callback) = &inner.on_failed {
                callback(&path);
            }
        }
    }

    inner.drained.notify_waiters();
    dispatch(inner);
}
