//! Durable folder → thumbnail mapping
//!
//! The in-memory map is always the source of truth for reads. Every mutation
//! schedules a full rewrite of the persisted blob; a single background writer
//! applies rewrites in the order they were scheduled, so the newest snapshot
//! always wins. The blob only exists to recover the map on the next start.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use library_store::{KeyValueStore, THUMBNAILS_CACHE_KEY};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A generated thumbnail for one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailCacheEntry {
    pub thumbnail_path: PathBuf,
    /// Fingerprint of the representative video the thumbnail was taken from
    pub content_fingerprint: String,
}

impl ThumbnailCacheEntry {
    fn file_exists(&self) -> bool {
        self.thumbnail_path.is_file()
    }
}

/// Result of checking a cached entry against the folder's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(ThumbnailCacheEntry),
    /// Entry exists but its file is gone or its fingerprint no longer matches
    Stale(ThumbnailCacheEntry),
    Missing,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedCacheBlob {
    thumbnails: HashMap<String, ThumbnailCacheEntry>,
    #[serde(default)]
    last_updated: DateTime<Utc>,
}

enum WriterMessage {
    Write(String),
    Flush(oneshot::Sender<()>),
}

pub struct ThumbnailStore {
    entries: Mutex<HashMap<String, ThumbnailCacheEntry>>,
    writer: mpsc::UnboundedSender<WriterMessage>,
}

impl ThumbnailStore {
    /// Load the persisted mapping, dropping entries whose thumbnail file no
    /// longer exists. A missing or corrupt blob gives an empty store.
    ///
    /// Must be called inside a tokio runtime: it spawns the writer task.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let reader = store.clone();
        let raw = tokio::task::spawn_blocking(move || reader.get(THUMBNAILS_CACHE_KEY))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("thumbnail cache read task failed: {}", e)));

        let mut thumbnails = match raw {
            Ok(Some(json)) => match serde_json::from_str::<PersistedCacheBlob>(&json) {
                Ok(blob) => blob.thumbnails,
                Err(e) => {
                    log::warn!("Discarding unreadable thumbnail cache blob: {}", e);
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                log::warn!("Failed to read thumbnail cache blob: {}", e);
                HashMap::new()
            }
        };

        let loaded = thumbnails.len();
        thumbnails.retain(|_, entry| entry.file_exists());
        let dropped = loaded - thumbnails.len();

        let (writer, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(store, receiver));

        let cache = Self {
            entries: Mutex::new(thumbnails),
            writer,
        };

        log::info!(
            "Loaded {} cached thumbnails ({} dropped with missing files)",
            loaded - dropped,
            dropped
        );
        if dropped > 0 {
            let entries = cache.entries.lock();
            cache.schedule_save(&entries);
        }
        cache
    }

    pub fn lookup(&self, folder_path: &str) -> Option<ThumbnailCacheEntry> {
        self.entries.lock().get(folder_path).cloned()
    }

    /// Check the entry for `folder_path` against the current fingerprint and
    /// the file on disk. Does not evict; the caller decides.
    pub fn validate(&self, folder_path: &str, current_fingerprint: &str) -> Validation {
        match self.lookup(folder_path) {
            Some(entry)
                if entry.content_fingerprint == current_fingerprint && entry.file_exists() =>
            {
                Validation::Valid(entry)
            }
            Some(entry) => Validation::Stale(entry),
            None => Validation::Missing,
        }
    }

    pub fn put(&self, folder_path: &str, entry: ThumbnailCacheEntry) {
        let mut entries = self.entries.lock();
        entries.insert(folder_path.to_string(), entry);
        self.schedule_save(&entries);
    }

    /// Remove the entry for `folder_path`. The thumbnail file is left for
    /// the caller to delete.
    pub fn remove(&self, folder_path: &str) -> Option<ThumbnailCacheEntry> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(folder_path);
        if removed.is_some() {
            self.schedule_save(&entries);
        }
        removed
    }

    /// Keep only the entries `keep` accepts; returns the ones dropped.
    pub fn retain(
        &self,
        mut keep: impl FnMut(&str, &ThumbnailCacheEntry) -> bool,
    ) -> Vec<(String, ThumbnailCacheEntry)> {
        let mut entries = self.entries.lock();
        let dropped: Vec<String> = entries
            .iter()
            .filter(|(folder_path, entry)| !keep(folder_path.as_str(), entry))
            .map(|(folder_path, _)| folder_path.clone())
            .collect();
        if dropped.is_empty() {
            return Vec::new();
        }

        let removed = dropped
            .into_iter()
            .filter_map(|folder_path| {
                let entry = entries.remove(&folder_path)?;
                Some((folder_path, entry))
            })
            .collect();
        self.schedule_save(&entries);
        removed
    }

    /// Every thumbnail file referenced by an entry.
    pub fn thumbnail_paths(&self) -> HashSet<PathBuf> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.thumbnail_path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every rewrite scheduled so far has been written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(WriterMessage::Flush(done)).is_err() {
            log::warn!("Thumbnail cache writer is gone; nothing to flush");
            return;
        }
        let _ = wait.await;
    }

    /// Serialize the map as it is right now, while the caller still holds
    /// the lock, so queued blobs follow mutation order.
    fn schedule_save(&self, entries: &HashMap<String, ThumbnailCacheEntry>) {
        let blob = PersistedCacheBlob {
            thumbnails: entries.clone(),
            last_updated: Utc::now(),
        };
        match serde_json::to_string(&blob) {
            Ok(json) => {
                if self.writer.send(WriterMessage::Write(json)).is_err() {
                    log::error!("Thumbnail cache writer is gone; change not persisted");
                }
            }
            Err(e) => log::error!("Failed to serialize thumbnail cache: {}", e),
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    mut receiver: mpsc::UnboundedReceiver<WriterMessage>,
) {
    while let Some(message) = receiver.recv().await {
        let mut blob = match message {
            WriterMessage::Write(blob) => blob,
            WriterMessage::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        // Coalesce queued rewrites; only the newest snapshot matters
        let mut flushes = Vec::new();
        while let Ok(next) = receiver.try_recv() {
            match next {
                WriterMessage::Write(newer) => blob = newer,
                WriterMessage::Flush(done) => flushes.push(done),
            }
        }

        if let Err(e) = write_blob(store.clone(), blob).await {
            log::warn!("Failed to persist thumbnail cache: {:#}", e);
        }
        for done in flushes {
            let _ = done.send(());
        }
    }
    log::debug!("Thumbnail cache writer stopped");
}

async fn write_blob(store: Arc<dyn KeyValueStore>, blob: String) -> Result<()> {
    tokio::task::spawn_blocking(move || store.set(THUMBNAILS_CACHE_KEY, &blob))
        .await
        .context("Thumbnail cache write task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use library_store::SqliteStore;
    use std::fs;
    use std::path::Path;

    fn test_store() -> (Arc<dyn KeyValueStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_at(&dir.path().join("cache.db")).unwrap();
        (Arc::new(store), dir)
    }

    fn entry_with_file(dir: &Path, fingerprint: &str) -> ThumbnailCacheEntry {
        let thumbnail_path = dir.join(format!("{}.jpg", fingerprint));
        fs::write(&thumbnail_path, b"jpeg").unwrap();
        ThumbnailCacheEntry {
            thumbnail_path,
            content_fingerprint: fingerprint.to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_blob_loads_empty() {
        let (store, _dir) = test_store();
        let cache = ThumbnailStore::load(store).await;
        assert!(cache.is_empty());
        assert_eq!(cache.lookup("/library/film/Heat"), None);
    }

    #[tokio::test]
    async fn test_corrupt_blob_loads_empty() {
        let (store, _dir) = test_store();
        store.set(THUMBNAILS_CACHE_KEY, "{\"thumbnails\": [1, 2").unwrap();

        let cache = ThumbnailStore::load(store).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_put_survives_reload() {
        let (store, dir) = test_store();
        let entry = entry_with_file(dir.path(), "aaaa");

        let cache = ThumbnailStore::load(store.clone()).await;
        cache.put("/library/film/Heat", entry.clone());
        cache.flush().await;

        let reloaded = ThumbnailStore::load(store).await;
        assert_eq!(reloaded.lookup("/library/film/Heat"), Some(entry));
    }

    #[tokio::test]
    async fn test_load_drops_entries_with_missing_files() {
        let (store, dir) = test_store();
        let kept = entry_with_file(dir.path(), "kept");
        let gone = entry_with_file(dir.path(), "gone");

        let cache = ThumbnailStore::load(store.clone()).await;
        cache.put("/a", kept.clone());
        cache.put("/b", gone.clone());
        cache.flush().await;
        fs::remove_file(&gone.thumbnail_path).unwrap();

        let reloaded = ThumbnailStore::load(store.clone()).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.lookup("/a"), Some(kept));
        assert_eq!(reloaded.lookup("/b"), None);

        // The cleanup itself is persisted
        reloaded.flush().await;
        let json = store.get(THUMBNAILS_CACHE_KEY).unwrap().unwrap();
        assert!(!json.contains("gone.jpg"));
    }

    #[tokio::test]
    async fn test_validate() {
        let (store, dir) = test_store();
        let cache = ThumbnailStore::load(store).await;
        let entry = entry_with_file(dir.path(), "fp1");
        cache.put("/f", entry.clone());

        assert_eq!(cache.validate("/f", "fp1"), Validation::Valid(entry.clone()));
        assert_eq!(cache.validate("/f", "fp2"), Validation::Stale(entry.clone()));
        assert_eq!(cache.validate("/other", "fp1"), Validation::Missing);

        fs::remove_file(&entry.thumbnail_path).unwrap();
        assert_eq!(cache.validate("/f", "fp1"), Validation::Stale(entry));
    }

    #[tokio::test]
    async fn test_remove_is_persisted() {
        let (store, dir) = test_store();
        let cache = ThumbnailStore::load(store.clone()).await;
        cache.put("/f", entry_with_file(dir.path(), "fp"));
        assert!(cache.remove("/f").is_some());
        assert!(cache.remove("/f").is_none());
        cache.flush().await;

        let reloaded = ThumbnailStore::load(store).await;
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_retain_drops_rejected_entries() {
        let (store, dir) = test_store();
        let cache = ThumbnailStore::load(store.clone()).await;
        let kept = entry_with_file(dir.path(), "kept");
        cache.put("/library/anime/Trigun", kept.clone());
        cache.put("/library/anime/Gone", entry_with_file(dir.path(), "gone"));

        let removed = cache.retain(|folder_path, _| folder_path.ends_with("Trigun"));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, "/library/anime/Gone");
        assert_eq!(
            cache.thumbnail_paths(),
            HashSet::from([kept.thumbnail_path.clone()])
        );
        assert!(cache.retain(|_, _| true).is_empty());
        cache.flush().await;

        let reloaded = ThumbnailStore::load(store).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.lookup("/library/anime/Trigun"), Some(kept));
    }

    #[tokio::test]
    async fn test_blob_shape() {
        let (store, dir) = test_store();
        let cache = ThumbnailStore::load(store.clone()).await;
        cache.put("/library/anime/Trigun", entry_with_file(dir.path(), "abc"));
        cache.flush().await;

        let json = store.get(THUMBNAILS_CACHE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entry = &value["thumbnails"]["/library/anime/Trigun"];
        assert_eq!(entry["contentFingerprint"], "abc");
        assert!(entry["thumbnailPath"].as_str().unwrap().ends_with("abc.jpg"));
        assert!(value["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn test_many_writes_persist_latest_snapshot() {
        let (store, dir) = test_store();
        let cache = ThumbnailStore::load(store.clone()).await;
        for i in 0..50 {
            cache.put(&format!("/f{}", i), entry_with_file(dir.path(), &format!("fp{}", i)));
        }
        cache.remove("/f0");
        cache.flush().await;

        let reloaded = ThumbnailStore::load(store).await;
        assert_eq!(reloaded.len(), 49);
        assert!(reloaded.lookup("/f0").is_none());
        assert!(reloaded.lookup("/f49").is_some());
    }
}
