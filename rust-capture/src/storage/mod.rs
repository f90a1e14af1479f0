//! Blob storage.
//!
//! Two logically equivalent key spaces: the primary store every capture is
//! written to, and the mirror store it is replicated into.

pub mod fs;
pub mod replicator;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

pub use fs::FsStorageGateway;
pub use replicator::{CopyReplicator, Replicator};

/// Which store a blob lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StoreKind {
    Primary,
    Mirror,
}

/// Location of a blob inside a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath {
    pub bucket: String,
    pub key: String,
}

impl BlobPath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for BlobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn put_blob(&self, store: StoreKind, path: &BlobPath, data: Bytes) -> Result<()>;

    /// Blob contents, or `NotFound`.
    async fn get_blob(&self, store: StoreKind, path: &BlobPath) -> Result<Bytes>;

    /// Append one line-delimited JSON record to a log blob.
    async fn put_record(
        &self,
        store: StoreKind,
        path: &BlobPath,
        record: &serde_json::Value,
    ) -> Result<()>;
}
