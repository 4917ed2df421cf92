use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use tempfile::TempDir;
use tokio::time::timeout;

use crate::{ledger::Ledger, probe::Probe, storage::memory::MemoryStore};

use super::{Bucket, BucketConfig, UploadCallback};

struct Fixture {
    _root: TempDir,
    dir: PathBuf,
    store: Arc<MemoryStore>,
    probe: Arc<Probe>,
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
    failed: Arc<Mutex<Vec<PathBuf>>>,
}

impl Fixture {
    fn new(name: &str) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(name);
        std::fs::create_dir(&dir).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.insert_bucket(name, "eu-west-1");

        Fixture {
            _root: root,
            dir,
            store,
            probe: Arc::new(Probe::fixed(true)),
            uploaded: Arc::new(Mutex::new(vec![])),
            failed: Arc::new(Mutex::new(vec![])),
        }
    }

    fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn bucket(&self, config: BucketConfig) -> Bucket {
        let uploaded = self.uploaded.clone();
        let on_uploaded: UploadCallback =
            Arc::new(move |path| uploaded.lock().unwrap().push(path.to_owned()));
        let failed = self.failed.clone();
        let on_failed: UploadCallback =
            Arc::new(move |path| failed.lock().unwrap().push(path.to_owned()));

        Bucket::new(
            self.dir.clone(),
            config,
            self.store.clone(),
            self.probe.clone(),
            Some(on_uploaded),
            Some(on_failed),
        )
        .await
        .unwrap()
    }

    fn uploaded(&self) -> Vec<PathBuf> {
        self.uploaded.lock().unwrap().clone()
    }

    fn failed(&self) -> Vec<PathBuf> {
        self.failed.lock().unwrap().clone()
    }
}

fn config() -> BucketConfig {
    BucketConfig {
        max_active: 10,
        upload_timeout: Duration::from_secs(5),
        verify_timeout: Duration::ZERO,
    }
}

#[tokio::test]
async fn rejects_a_file_as_bucket_path() {
    let fixture = Fixture::new("b1");
    let file = fixture.write("a.bin", b"x");
    let result = Bucket::new(
        file,
        config(),
        fixture.store.clone(),
        fixture.probe.clone(),
        None,
        None,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn sweep_uploads_every_file_under_its_relative_key() {
    let fixture = Fixture::new("b1");
    fixture.write("a.bin", b"17 bytes of stuff");
    fixture.write("sub/deep/c.bin", b"more");

    let bucket = fixture.bucket(config()).await;
    bucket.sweep();
    bucket.finish_pending().await;

    assert!(fixture.store.contains("b1", "a.bin"));
    assert!(fixture.store.contains("b1", "sub/deep/c.bin"));
    assert_eq!(fixture.store.object_count(), 2);
    assert_eq!(fixture.uploaded().len(), 2);
    assert!(fixture.failed().is_empty());
}

#[tokio::test]
async fn enqueue_deduplicates_pending_paths() {
    let mut fixture = Fixture::new("b1");
    fixture.probe = Arc::new(Probe::fixed(false));
    let path = fixture.write("a.bin", b"x");

    let bucket = fixture.bucket(config()).await;
    bucket.enqueue(path.clone());
    bucket.enqueue(path);

    assert_eq!(bucket.pending_len(), 1);
    assert_eq!(bucket.active_len(), 0);
}

#[tokio::test]
async fn active_uploads_are_bounded() {
    let fixture = Fixture::new("b1");
    for i in 0..5 {
        fixture.write(&format!("f{i}.bin"), b"x");
    }
    fixture.store.set_put_delay(Duration::from_millis(500));

    let bucket = fixture
        .bucket(BucketConfig {
            max_active: 2,
            ..config()
        })
        .await;
    bucket.sweep();

    assert_eq!(bucket.active_len(), 2);
    assert_eq!(bucket.pending_len(), 3);

    bucket.finish_pending().await;
    assert_eq!(fixture.store.object_count(), 5);
    assert_eq!(fixture.uploaded().len(), 5);
}

#[tokio::test]
async fn slow_upload_times_out_and_fails() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("slow.bin", b"x");
    fixture.store.set_put_delay(Duration::from_millis(500));

    let bucket = fixture
        .bucket(BucketConfig {
            upload_timeout: Duration::from_millis(50),
            ..config()
        })
        .await;
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;

    assert_eq!(fixture.failed(), vec![path]);
    assert!(fixture.uploaded().is_empty());
    assert_eq!(fixture.store.object_count(), 0);
}

#[tokio::test]
async fn failed_put_invokes_the_failure_callback() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("bad.bin", b"x");
    fixture.store.set_fail_puts(true);

    let bucket = fixture.bucket(config()).await;
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;

    assert_eq!(fixture.failed(), vec![path]);
    assert_eq!(fixture.store.put_attempts(), 1);
}

#[tokio::test]
async fn vanished_file_counts_as_failure() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("ghost.bin", b"x");
    std::fs::remove_file(&path).unwrap();

    let bucket = fixture.bucket(config()).await;
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;

    assert_eq!(fixture.failed(), vec![path]);
}

#[tokio::test]
async fn verification_mismatch_is_a_failure() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("ghost.bin", b"x");
    fixture.store.set_hide_objects(true);

    let bucket = fixture
        .bucket(BucketConfig {
            verify_timeout: Duration::from_millis(200),
            ..config()
        })
        .await;
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;

    assert_eq!(fixture.failed(), vec![path]);
    assert!(fixture.uploaded().is_empty());
}

#[tokio::test]
async fn disabled_verification_trusts_the_ack() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("a.bin", b"x");
    fixture.store.set_hide_objects(true);

    let bucket = fixture.bucket(config()).await;
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;

    assert_eq!(fixture.uploaded(), vec![path]);
}

#[tokio::test]
async fn nothing_dispatches_while_the_network_is_down() {
    let mut fixture = Fixture::new("b1");
    fixture.probe = Arc::new(Probe::fixed(false));
    let path = fixture.write("x.bin", b"x");

    let bucket = fixture.bucket(config()).await;
    bucket.enqueue(path.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fixture.store.put_attempts(), 0);
    assert_eq!(bucket.pending_len(), 1);

    fixture.probe.set_up(true);
    bucket.finish_pending().await;
    assert_eq!(fixture.uploaded(), vec![path]);
}

#[tokio::test]
async fn cancel_pending_clears_the_queue_and_stops_uploads() {
    let fixture = Fixture::new("b1");
    let slow = fixture.write("slow.bin", b"x");
    fixture.store.set_put_delay(Duration::from_secs(30));

    let bucket = fixture
        .bucket(BucketConfig {
            max_active: 1,
            upload_timeout: Duration::from_secs(60),
            ..config()
        })
        .await;
    bucket.enqueue(slow.clone());
    bucket.enqueue(fixture.dir.join("queued.bin"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(Duration::from_secs(10), bucket.cancel_pending())
        .await
        .expect("cancel_pending did not finish in time");

    assert_eq!(bucket.pending_len(), 0);
    assert_eq!(bucket.active_len(), 0);
    assert_eq!(fixture.failed(), vec![slow]);
    assert_eq!(fixture.store.object_count(), 0);
}

#[tokio::test]
async fn finish_pending_returns_immediately_when_idle() {
    let fixture = Fixture::new("b1");
    let bucket = fixture.bucket(config()).await;

    timeout(Duration::from_secs(1), bucket.finish_pending())
        .await
        .expect("finish_pending blocked on an empty bucket");
}

#[tokio::test]
async fn ledger_sweep_skips_recorded_files() {
    let fixture = Fixture::new("b1");
    let known = fixture.write("known.bin", b"x");
    let fresh = fixture.write("fresh.bin", b"x");

    let ledger = Ledger::open_in_memory(10).unwrap();
    ledger.mark_succeeded(&known);

    let bucket = fixture.bucket(config()).await;
    bucket.sweep_with_ledger(&ledger);
    bucket.finish_pending().await;

    assert_eq!(fixture.uploaded(), vec![fresh]);
    assert!(!fixture.store.contains("b1", "known.bin"));
}

#[tokio::test]
async fn disconnected_bucket_becomes_ready_after_connect() {
    let fixture = Fixture::new("b1");
    let store = Arc::new(MemoryStore::new());

    let bucket = Bucket::new(
        fixture.dir.clone(),
        config(),
        store.clone(),
        fixture.probe.clone(),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(!bucket.ready());

    store.insert_bucket("b1", "eu-west-1");
    bucket.connect().await.unwrap();
    assert!(bucket.ready());
}

#[tokio::test]
async fn failure_then_retry_ends_with_one_succeeded_row() {
    let fixture = Fixture::new("b1");
    let path = fixture.write("flaky.bin", b"x");
    let ledger = Arc::new(Ledger::open_in_memory(10).unwrap());

    let recorder = ledger.clone();
    let on_uploaded: UploadCallback =
        Arc::new(move |path| recorder.mark_succeeded(path));
    let recorder = ledger.clone();
    let on_failed: UploadCallback = Arc::new(move |path| recorder.mark_failed(path));

    let bucket = Bucket::new(
        fixture.dir.clone(),
        config(),
        fixture.store.clone(),
        fixture.probe.clone(),
        Some(on_uploaded),
        Some(on_failed),
    )
    .await
    .unwrap();

    fixture.store.set_fail_puts(true);
    bucket.enqueue(path.clone());
    bucket.finish_pending().await;
    assert_eq!(ledger.pop_failed(10), vec![path.clone()]);
    assert_eq!(ledger.attempts(&path), Some(1));

    fixture.store.set_fail_puts(false);
    for retry in ledger.pop_failed(10) {
        bucket.enqueue(retry);
    }
    bucket.finish_pending().await;

    assert!(ledger.pop_failed(10).is_empty());
    assert!(ledger.exists(&path));
    assert_eq!(ledger.attempts(&path), Some(0));
    assert_eq!(fixture.store.put_attempts(), 2);
}
