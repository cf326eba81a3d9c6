//! External blob storage and WAL shipping collaborator interfaces (spec
//! section 6 "External interfaces"). These are narrow traits so the
//! tenant node runtime never depends on a concrete object-store SDK;
//! grounded on the teacher's `networking` transport traits, which keep
//! the clustering core decoupled from any one wire implementation.

use async_trait::async_trait;
use std::path::PathBuf;

/// Durable object storage for tenant database snapshots and WAL segments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> std::io::Result<Vec<u8>>;
    async fn put(&self, key: &str, data: &[u8]) -> std::io::Result<()>;
    async fn list_prefix(&self, prefix: &str) -> std::io::Result<Vec<String>>;
    async fn set_storage_class(&self, key: &str, class: StorageClass) -> std::io::Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Standard,
    InfrequentAccess,
    Archive,
}

/// Ships WAL frames for a resident tenant to durable storage on a cadence,
/// independent of the storage backend. The tenant node runtime owns
/// scheduling; this trait only owns "ship what's pending" and "wait for
/// outstanding shipments to land".
#[async_trait]
pub trait WalShipper: Send + Sync {
    async fn ship_pending(&self, tenant_prefix: &str) -> std::io::Result<u64>;
    async fn final_sync(&self, tenant_prefix: &str, timeout: std::time::Duration) -> std::io::Result<()>;
}

/// A local-filesystem `BlobStore` used in tests and single-node deploys;
/// mirrors the teacher's pattern of shipping a trivial in-process impl of
/// every external-system trait alongside the trait definition.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn get(&self, key: &str) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.path_for(key)).await
    }

    async fn put(&self, key: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await
    }

    async fn list_prefix(&self, prefix: &str) -> std::io::Result<Vec<String>> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                out.push(format!("{prefix}/{name}"));
            }
        }
        Ok(out)
    }

    async fn set_storage_class(&self, _key: &str, _class: StorageClass) -> std::io::Result<()> {
        // A local filesystem has no storage-class concept; this backend
        // exists for tests, so the call is a no-op rather than an error.
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> std::io::Result<()> {
        let dir = self.path_for(prefix);
        if dir.exists() {
            tokio::fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.put("tenants/a/db.sqlite", b"hello").await.unwrap();
        let data = store.get("tenants/a/db.sqlite").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn list_prefix_returns_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.put("tenants/a/1.wal", b"x").await.unwrap();
        store.put("tenants/a/2.wal", b"y").await.unwrap();
        let mut names = store.list_prefix("tenants/a").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["tenants/a/1.wal", "tenants/a/2.wal"]);
    }

    #[tokio::test]
    async fn delete_prefix_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.put("tenants/b/db.sqlite", b"z").await.unwrap();
        store.delete_prefix("tenants/b").await.unwrap();
        assert!(store.get("tenants/b/db.sqlite").await.is_err());
    }
}
