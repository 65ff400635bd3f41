// src/store/mod.rs

pub mod local;

pub use local::LocalObjectStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` does not exist")]
    NoSuchBucket(String),

    #[error("object `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },

    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),

    #[error("invalid name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Blob storage addressed by bucket + key.
///
/// All calls block the caller for their full duration.
pub trait ObjectStore: Send + Sync {
    /// Read the whole object into memory.
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write (or overwrite) an object. The bucket must already exist.
    fn store(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;

    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::BucketAlreadyExists`] when the bucket is present.
    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Bucket names, sorted.
    fn list_buckets(&self) -> Result<Vec<String>, StoreError>;

    /// Object keys in `bucket`, sorted.
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError>;
}
