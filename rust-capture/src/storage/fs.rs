//! Filesystem-backed storage gateway.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{BlobPath, StorageGateway, StoreKind};
use crate::{Error, Result};

/// Stores blobs under `<root>/<bucket>/<key>`, one root per store.
pub struct FsStorageGateway {
    primary_root: PathBuf,
    mirror_root: PathBuf,
}

impl FsStorageGateway {
    pub fn new(primary_root: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            primary_root: primary_root.into(),
            mirror_root: mirror_root.into(),
        }
    }

    fn root(&self, store: StoreKind) -> &Path {
        match store {
            StoreKind::Primary => &self.primary_root,
            StoreKind::Mirror => &self.mirror_root,
        }
    }

    /// Resolve a blob path, rejecting anything that could leave the root.
    fn resolve(&self, store: StoreKind, path: &BlobPath) -> Result<PathBuf> {
        let mut resolved = self.root(store).to_path_buf();

        for part in [path.bucket.as_str(), path.key.as_str()] {
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(segment) => resolved.push(segment),
                    Component::CurDir => {}
                    _ => {
                        return Err(Error::storage(format!(
                            "blob path '{path}' escapes the store root"
                        )));
                    }
                }
            }
        }

        if path.key.is_empty() || path.key.ends_with('/') {
            return Err(Error::storage(format!("blob path '{path}' has no file name")));
        }
        Ok(resolved)
    }

    async fn ensure_parent(file: &Path) -> Result<()> {
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for FsStorageGateway {
    async fn put_blob(&self, store: StoreKind, path: &BlobPath, data: Bytes) -> Result<()> {
        let file = self.resolve(store, path)?;
        Self::ensure_parent(&file).await?;

        // Write-then-rename so readers never see a partial blob.
        let mut tmp = file.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &file).await?;

        tracing::debug!(%store, path = %path, bytes = data.len(), "Blob written");
        Ok(())
    }

    async fn get_blob(&self, store: StoreKind, path: &BlobPath) -> Result<Bytes> {
        let file = self.resolve(store, path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("Blob", format!("{store}:{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_record(
        &self,
        store: StoreKind,
        path: &BlobPath,
        record: &serde_json::Value,
    ) -> Result<()> {
        let file = self.resolve(store, path)?;
        Self::ensure_parent(&file).await?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .await?;
        handle.write_all(&line).await?;
        handle.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir) -> FsStorageGateway {
        FsStorageGateway::new(dir.path().join("primary"), dir.path().join("mirror"))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let path = BlobPath::new("brutos", "camara/deputados/d_2019.json");

        gw.put_blob(StoreKind::Primary, &path, Bytes::from_static(b"{}\n"))
            .await
            .unwrap();

        assert_eq!(
            gw.get_blob(StoreKind::Primary, &path).await.unwrap(),
            Bytes::from_static(b"{}\n")
        );
        assert!(
            gw.get_blob(StoreKind::Mirror, &path)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);

        for key in ["../etc/passwd", "/abs.json", "a/../../b.json", "dir/"] {
            let path = BlobPath::new("b", key);
            let result = gw.put_blob(StoreKind::Primary, &path, Bytes::new()).await;
            assert!(matches!(result, Err(Error::Storage(_))), "{key}");
        }
    }

    #[tokio::test]
    async fn test_put_record_appends_lines() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let path = BlobPath::new("logs", "capture/2024-03-10.jsonl");

        gw.put_record(StoreKind::Primary, &path, &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        gw.put_record(StoreKind::Primary, &path, &serde_json::json!({"n": 2}))
            .await
            .unwrap();

        let data = gw.get_blob(StoreKind::Primary, &path).await.unwrap();
        assert_eq!(&data[..], b"{\"n\":1}\n{\"n\":2}\n");
    }
}
