//! JSON-file store that survives process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{PersistedStore, StoreError, StoreOp, WriteBatch};

/// [`PersistedStore`] persisted as a single JSON object on disk.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves either the old or the new contents. A missing file
/// reads as empty; an unparseable file is logged and treated as empty so a
/// damaged store degrades to "logged out" instead of wedging startup.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Store at `path`. The file and its parent directory are created lazily
    /// on first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable session store");
                Ok(BTreeMap::new())
            }
        }
    }

    async fn persist(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = map.len(), "Session store written");
        Ok(())
    }
}

#[async_trait]
impl PersistedStore for FileStore {
    async fn read(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let _guard = self.lock.lock().await;
        let map = self.load().await?;
        Ok(keys.iter().map(|k| map.get(*k).cloned()).collect())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        for op in batch.into_ops() {
            match op {
                StoreOp::Set { key, value } => {
                    map.insert(key, value);
                }
                StoreOp::Remove { key } => {
                    map.remove(&key);
                }
            }
        }
        self.persist(&map).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("marketsync-store-{}", uuid::Uuid::new_v4()))
            .join("session.json")
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let store = FileStore::new(scratch_path());
        assert_eq!(store.read(&["token"]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_values_survive_a_new_instance() {
        let path = scratch_path();
        FileStore::new(&path)
            .write(WriteBatch::new().set("token", "t1").set("walletAddress", "w"))
            .await
            .unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(
            reopened.read(&["token", "walletAddress"]).await.unwrap(),
            vec![Some("t1".into()), Some("w".into())]
        );

        reopened
            .write(WriteBatch::new().remove("token"))
            .await
            .unwrap();
        assert_eq!(reopened.read(&["token"]).await.unwrap(), vec![None]);

        tokio::fs::remove_dir_all(path.parent().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_file_is_treated_as_empty() {
        let path = scratch_path();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.read(&["token"]).await.unwrap(), vec![None]);

        store.write(WriteBatch::new().set("token", "t2")).await.unwrap();
        assert_eq!(store.read(&["token"]).await.unwrap(), vec![Some("t2".into())]);

        tokio::fs::remove_dir_all(path.parent().unwrap()).await.unwrap();
    }
}
