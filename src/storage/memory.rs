use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{Error, Result};

use super::ObjectStore;

/// Object store double for engine tests, with injectable latency and
/// failure modes in the spirit of a latency-simulating local backend.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), u64>>,
    regions: Mutex<HashMap<String, String>>,
    put_delay: Mutex<Option<Duration>>,
    fail_puts: AtomicBool,
    hide_objects: AtomicBool,
    put_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn insert_bucket(&self, name: &str, region: &str) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), region.to_owned());
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Accept puts but answer every existence probe with "absent".
    pub fn set_hide_objects(&self, hide: bool) {
        self.hide_objects.store(hide, Ordering::SeqCst);
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(bucket.to_owned(), key.to_owned()))
    }

    pub fn object_count(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn keys(&self, bucket: &str) -> HashSet<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(owner, _)| owner == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        let size = tokio::fs::metadata(path).await?.len();
        let delay = *self.put_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::other(std::io::Error::other("injected put failure")));
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_owned(), key.to_owned()), size);
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        if self.hide_objects.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.contains(bucket, key))
    }

    async fn region(&self, bucket: &str) -> Result<String> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .cloned()
            .ok_or_else(|| Error::BucketNotFound(bucket.to_owned()))
    }

    async fn buckets(&self) -> Result<Vec<String>> {
        let names = self
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        Ok(names)
    }
}
