#[cfg(test)]
pub mod memory;
mod s3;

pub use s3::S3Store;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait ObjectStore {
    /// Upload the file at `path` to `bucket` under `key`.
    async fn put(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    /// Metadata probe for `key` in `bucket`.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Region the bucket lives in.
    async fn region(&self, bucket: &str) -> Result<String>;

    /// Names of the buckets visible to the current credentials.
    async fn buckets(&self) -> Result<Vec<String>>;
}

pub type BoxedStore = Arc<dyn ObjectStore + Send + Sync>;
