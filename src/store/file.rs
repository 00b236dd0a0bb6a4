//! One pretty-printed JSON file per key, watched with `notify`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use uuid::Uuid;

use super::{validate_key, DocumentStore, StoreError, Subscription, SubscriptionGuard};

/// Documents live at `<root>/<key>.json`.
///
/// Writes go to a uniquely named temporary sibling which is synced and then
/// renamed over the target, so a reader sees either the old or the new file,
/// never a prefix of one. The root directory is created on first use.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    active: Arc<AtomicUsize>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.json", key)))
    }

    // Leading dot and random suffix: never matches a document name, and two
    // concurrent writers never share a temp file.
    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Writes `document` to a fresh temp file and returns its path.
    async fn write_temp(&self, key: &str, document: &Value) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.temp_path_for(key);

        let result: Result<(), StoreError> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(tmp_path)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            })
    }

    async fn write(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.ensure_root().await?;
        let tmp_path = self.write_temp(key, document).await?;

        if let Err(err) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        tracing::debug!(key = %key, path = %path.display(), "document written");
        Ok(())
    }

    async fn create(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.ensure_root().await?;
        let tmp_path = self.write_temp(key, document).await?;

        // hard_link fails if the target exists, which makes "create unless
        // present" a single filesystem operation with the full content.
        let linked = tokio::fs::hard_link(&tmp_path, &path).await;
        let _ = tokio::fs::remove_file(&tmp_path).await;

        match linked {
            Ok(()) => {
                tracing::info!(key = %key, path = %path.display(), "document created");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        let path = self.path_for(key)?;
        // The directory is watched rather than the file: renames replace the
        // file's inode, and the document may not exist yet.
        self.ensure_root().await?;

        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from(format!("{}.json", key)));

        let (tx, rx) = watch::channel(0u64);
        let watched_key = key.to_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches_document(&event, &file_name) {
                    tx.send_modify(|version| *version = version.wrapping_add(1));
                }
            }
            Err(e) => {
                tracing::warn!(key = %watched_key, error = %e, "file watch error");
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::NonRecursive)?;

        tracing::debug!(
            key = %key,
            dir = %self.root.display(),
            active = self.active.load(Ordering::SeqCst) + 1,
            "file watch registered"
        );

        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(self.active.clone(), Some(watcher)),
        ))
    }

    fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

fn touches_document(event: &Event, file_name: &OsString) -> bool {
    let relevant = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
