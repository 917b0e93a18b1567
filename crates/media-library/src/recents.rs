//! Recently-played ring: the last few folders the user launched, most recent
//! first, persisted under [`LAST_PLAYED_KEY`].
//!
//! An entry is identified by its folder path alone. Playing the same folder
//! again moves it to the front instead of adding a second session entry.

use crate::folder::{Category, MediaFolderRef};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use library_store::{KeyValueStore, LAST_PLAYED_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Maximum number of entries kept.
pub const RECENTS_CAPACITY: usize = 5;

/// Snapshot of a played folder. Display fields may go stale until the next
/// reconcile against a fresh scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentItem {
    pub path: String,
    pub name: String,
    pub category: Category,
    pub video_count: usize,
    pub last_played_at: DateTime<Utc>,
}

impl RecentItem {
    pub fn from_folder(folder: &MediaFolderRef, played_at: DateTime<Utc>) -> Self {
        Self {
            path: folder.path.clone(),
            name: folder.name.clone(),
            category: folder.category,
            video_count: folder.video_count,
            last_played_at: played_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The live folder list was empty (scan still running); nothing changed.
    Deferred,
    Applied { removed: usize, refreshed: usize },
}

pub struct RecentsRing {
    store: Arc<dyn KeyValueStore>,
    items: Mutex<Vec<RecentItem>>,
}

impl RecentsRing {
    /// Load the ring from the store. A missing or unreadable record yields
    /// an empty ring.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let reader = store.clone();
        let raw = tokio::task::spawn_blocking(move || reader.get(LAST_PLAYED_KEY))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("recents read task failed: {}", e)));

        let items = match raw {
            Ok(Some(json)) => match serde_json::from_str::<Vec<RecentItem>>(&json) {
                Ok(items) => normalize(items),
                Err(e) => {
                    log::warn!("Discarding unreadable recents record: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read recents record: {}", e);
                Vec::new()
            }
        };

        Self {
            store,
            items: Mutex::new(items),
        }
    }

    /// Current entries, most recent first.
    pub async fn items(&self) -> Vec<RecentItem> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.items.lock().await.iter().any(|item| item.path == path)
    }

    /// Record a play of `folder`: move (or insert) it at the front, truncate
    /// to capacity, and wait until the new list is persisted.
    pub async fn record(&self, folder: &MediaFolderRef) -> Result<()> {
        let mut items = self.items.lock().await;
        items.retain(|item| item.path != folder.path);
        items.insert(0, RecentItem::from_folder(folder, Utc::now()));
        items.truncate(RECENTS_CAPACITY);

        // Lock is held across the write so concurrent records persist in order
        self.persist(&items).await
    }

    /// Drop the entry for `path`. Returns whether one was present.
    pub async fn remove(&self, path: &str) -> Result<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| item.path != path);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items).await?;
        Ok(true)
    }

    /// Drop entries whose folder is gone from `current` and refresh the
    /// display fields of the rest. An empty `current` defers the pass.
    pub async fn reconcile(&self, current: &[MediaFolderRef]) -> Result<ReconcileOutcome> {
        self.reconcile_categories(current, &Category::ALL).await
    }

    /// Like [`reconcile`](Self::reconcile), but only entries in `scanned`
    /// categories can be dropped. Entries of a category whose root could not
    /// be read are kept as they are.
    pub async fn reconcile_categories(
        &self,
        current: &[MediaFolderRef],
        scanned: &[Category],
    ) -> Result<ReconcileOutcome> {
        if current.is_empty() || scanned.is_empty() {
            log::debug!("Deferring recents reconcile until folders are scanned");
            return Ok(ReconcileOutcome::Deferred);
        }

        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| {
            !scanned.contains(&item.category)
                || current.iter().any(|folder| folder.path == item.path)
        });
        let removed = before - items.len();

        let mut refreshed = 0;
        for item in items.iter_mut() {
            let Some(folder) = current.iter().find(|folder| folder.path == item.path) else {
                continue;
            };
            if item.name != folder.name
                || item.video_count != folder.video_count
                || item.category != folder.category
            {
                item.name = folder.name.clone();
                item.video_count = folder.video_count;
                item.category = folder.category;
                refreshed += 1;
            }
        }

        if removed > 0 || refreshed > 0 {
            self.persist(&items).await?;
        }
        Ok(ReconcileOutcome::Applied { removed, refreshed })
    }

    async fn persist(&self, items: &[RecentItem]) -> Result<()> {
        let json = serde_json::to_string(items).context("Failed to serialize recents")?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.set(LAST_PLAYED_KEY, &json))
            .await
            .context("Recents write task failed")?
    }
}

/// Enforce the ring invariants on data read back from storage.
fn normalize(items: Vec<RecentItem>) -> Vec<RecentItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<RecentItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.path.clone()))
        .collect();
    items.sort_by(|a, b| b.last_played_at.cmp(&a.last_played_at));
    items.truncate(RECENTS_CAPACITY);
    items
}
