//! Key/value storage collaborator for provider configuration and roles.
//!
//! Keys are `/`-separated paths (`config`, `role/dev`). `list(prefix)` returns
//! the direct children of `prefix`, relative to it, in lexical order; a nested
//! prefix is reported once with a trailing `/`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{Error, Result};

/// Storage collaborator
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value at `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write the value at `key`, replacing any previous value
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Direct children of `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read();
        let children: BTreeSet<String> = entries
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .map(|key| {
                let rest = &key[prefix.len()..];
                match rest.find('/') {
                    Some(idx) => rest[..=idx].to_string(),
                    None => rest.to_string(),
                }
            })
            .collect();
        Ok(children.into_iter().collect())
    }
}

/// One JSON file per key below a root directory
///
/// Key `role/dev` is stored at `<root>/role/dev.json`. Each write goes to its
/// own owner-only temporary file which is then renamed over the entry, so a
/// reader sees either the previous value or the new one and concurrent
/// writers to one key resolve to the last rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

const FILE_SUFFIX: &str = ".json";

impl FileStorage {
    /// Create a store rooted at `root` (created if missing)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("failed to create storage dir {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        let mut file_name = path.into_os_string();
        file_name.push(FILE_SUFFIX);
        Ok(PathBuf::from(file_name))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("failed to read {key}: {e}"))),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("failed to create dir for {key}: {e}")))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        if let Err(e) = write_new_file(&tmp, &value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!("failed to write {key}: {e}")));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!("failed to replace {key}: {e}")));
        }

        debug!(key = %key, bytes = value.len(), "Stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("failed to delete {key}: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };

        let mut dir = self.root.clone();
        if !dir_part.is_empty() {
            validate_key(dir_part)?;
            for segment in dir_part.split('/') {
                dir.push(segment);
            }
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Storage(format!("failed to list {prefix}: {e}"))),
        };

        let mut children = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("failed to list {prefix}: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::Storage(format!("failed to list {prefix}: {e}")))?;

            let child = if file_type.is_dir() {
                format!("{name}/")
            } else if let Some(stem) = name.strip_suffix(FILE_SUFFIX) {
                stem.to_string()
            } else {
                continue;
            };

            if let Some(rest) = child.strip_prefix(name_prefix) {
                if !rest.is_empty() {
                    children.insert(rest.to_string());
                }
            }
        }

        Ok(children.into_iter().collect())
    }
}

/// Create `path` (which must not exist) owner-only and flush `value` to disk
async fn write_new_file(path: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(value).await?;
    file.sync_all().await
}

fn validate_key(key: &str) -> Result<()> {
    let bad_segment = key
        .split('/')
        .any(|s| s.is_empty() || s == "." || s == ".." || s.contains('\\'));
    if bad_segment {
        return Err(Error::Storage(format!("invalid storage key {key:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seed(storage: &dyn Storage) {
        for key in ["config", "role/dev", "role/admin", "role/team/a"] {
            storage.put(key, b"{}".to_vec()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn memory_get_put_delete() {
        let storage = InMemoryStorage::new();

        assert_eq!(storage.get("config").await.unwrap(), None);
        storage.put("config", b"v1".to_vec()).await.unwrap();
        storage.put("config", b"v2".to_vec()).await.unwrap();
        assert_eq!(storage.get("config").await.unwrap(), Some(b"v2".to_vec()));

        storage.delete("config").await.unwrap();
        storage.delete("config").await.unwrap();
        assert_eq!(storage.get("config").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_list_returns_direct_children() {
        let storage = InMemoryStorage::new();
        seed(&storage).await;

        assert_eq!(
            storage.list("role/").await.unwrap(),
            vec!["admin", "dev", "team/"]
        );
        assert_eq!(storage.list("").await.unwrap(), vec!["config", "role/"]);
        assert!(storage.list("nothing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_round_trip_and_list() {
        // GIVEN: a file store with a few keys
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        seed(&storage).await;

        // THEN: values and listings match the in-memory semantics
        assert_eq!(storage.get("role/dev").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(
            storage.list("role/").await.unwrap(),
            vec!["admin", "dev", "team/"]
        );
        assert_eq!(storage.list("").await.unwrap(), vec!["config", "role/"]);
        assert!(dir.path().join("role").join("dev.json").exists());

        storage.delete("role/dev").await.unwrap();
        assert_eq!(storage.get("role/dev").await.unwrap(), None);
        assert_eq!(storage.list("role/").await.unwrap(), vec!["admin", "team/"]);
    }

    #[tokio::test]
    async fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::new(dir.path())
            .unwrap()
            .put("config", b"persisted".to_vec())
            .await
            .unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("config").await.unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_entries_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.put("config", b"secret".to_vec()).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("config.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_one_key_are_whole() {
        // GIVEN: a file store and a reader polling the key
        const SIZE: usize = 256 * 1024;
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(FileStorage::new(dir.path()).unwrap());
        storage.put("role/dev", vec![b'0'; SIZE]).await.unwrap();

        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let storage = std::sync::Arc::clone(&storage);
            let done = std::sync::Arc::clone(&done);
            tokio::spawn(async move {
                let mut torn = 0;
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    let value = storage.get("role/dev").await.unwrap().unwrap();
                    if value.len() != SIZE || value.iter().any(|b| *b != value[0]) {
                        torn += 1;
                    }
                    tokio::task::yield_now().await;
                }
                torn
            })
        };

        // WHEN: many writers replace the same key at once
        for round in 0..5u8 {
            let writers: Vec<_> = (0..16u8)
                .map(|i| {
                    let storage = std::sync::Arc::clone(&storage);
                    let fill = b'a' + (round * 16 + i) % 26;
                    tokio::spawn(async move { storage.put("role/dev", vec![fill; SIZE]).await })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap().unwrap();
            }
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);

        // THEN: no write failed, no read saw a partial value, no temp files remain
        assert_eq!(reader.await.unwrap(), 0);
        let value = storage.get("role/dev").await.unwrap().unwrap();
        assert_eq!(value.len(), SIZE);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("role"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "dev.json")
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
        assert_eq!(storage.list("role/").await.unwrap(), vec!["dev"]);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        for key in ["../escape", "role/../../x", "", "role//dev", "role/"] {
            assert!(
                matches!(storage.put(key, Vec::new()).await, Err(Error::Storage(_))),
                "key {key:?} should be rejected"
            );
        }
    }
}
