use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::{
    error::SdkError, operation::head_object::HeadObjectError, primitives::ByteStream, Client,
};

use crate::error::{Error, Result};

use super::ObjectStore;

pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        S3Store { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path).await?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let head_result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(SdkError::into_service_error);

        match head_result {
            Ok(_) => Ok(true),
            Err(HeadObjectError::NotFound(_)) => Ok(false),
            Err(err) => Err(Error::other(err)),
        }
    }

    async fn region(&self, bucket: &str) -> Result<String> {
        let location = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await?;

        // An absent or empty constraint means the legacy default region.
        let constraint = location
            .location_constraint()
            .map(|region| region.as_str().to_owned());
        Ok(match constraint {
            Some(region) if !region.is_empty() => region,
            _ => "us-east-1".to_owned(),
        })
    }

    async fn buckets(&self) -> Result<Vec<String>> {
        let output = self.client.list_buckets().send().await?;
        let names = output
            .buckets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|bucket| bucket.name)
            .collect();
        Ok(names)
    }
}
