//! Mirror replication.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BlobPath, StorageGateway, StoreKind};
use crate::Result;

/// Copies a stored blob from the primary store into the mirror.
#[async_trait]
pub trait Replicator: Send + Sync {
    async fn replicate(&self, path: &BlobPath) -> Result<()>;
}

/// Replicates by reading the primary blob and writing it to the mirror
/// through the same gateway.
pub struct CopyReplicator {
    gateway: Arc<dyn StorageGateway>,
}

impl CopyReplicator {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Replicator for CopyReplicator {
    async fn replicate(&self, path: &BlobPath) -> Result<()> {
        let data = self.gateway.get_blob(StoreKind::Primary, path).await?;
        let len = data.len();
        self.gateway.put_blob(StoreKind::Mirror, path, data).await?;
        tracing::debug!(path = %path, bytes = len, "Blob replicated to mirror");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorageGateway;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_to_mirror() {
        let dir = TempDir::new().unwrap();
        let gateway: Arc<dyn StorageGateway> = Arc::new(FsStorageGateway::new(
            dir.path().join("p"),
            dir.path().join("m"),
        ));
        let path = BlobPath::new("b", "k/x.json");
        gateway
            .put_blob(StoreKind::Primary, &path, Bytes::from_static(b"data"))
            .await
            .unwrap();

        CopyReplicator::new(gateway.clone())
            .replicate(&path)
            .await
            .unwrap();

        assert_eq!(
            gateway.get_blob(StoreKind::Mirror, &path).await.unwrap(),
            Bytes::from_static(b"data")
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let gateway: Arc<dyn StorageGateway> = Arc::new(FsStorageGateway::new(
            dir.path().join("p"),
            dir.path().join("m"),
        ));
        let err = CopyReplicator::new(gateway)
            .replicate(&BlobPath::new("b", "nope.json"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
