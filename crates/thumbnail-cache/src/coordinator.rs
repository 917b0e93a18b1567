//! Visibility-driven thumbnail coordination
//!
//! The UI calls [`ThumbnailCoordinator::on_visible`] once per grid item as it
//! scrolls into view. For each folder the coordinator decides whether to
//! reuse the cached thumbnail, regenerate a stale one, or skip this round.
//!
//! Per-folder states:
//!
//! ```text
//! absent ──► queued ──► generating ──► cached
//!   ▲          │             │           │
//!   └──────────┘ refused     └─► failed  └─► queued (representative video changed)
//! ```
//!
//! `failed` is not terminal: the next visibility event tries again.

use crate::gate::{GenerationGate, Permit};
use crate::generate::{FrameExtractor, GenerationError};
use crate::store::{ThumbnailCacheEntry, ThumbnailStore, Validation};
use crate::{fingerprint, thumbnail_path};
use media_library::{Category, MediaFolderRef};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailState {
    Absent,
    Queued,
    Generating,
    Cached,
    Failed,
}

/// What the grid should draw for a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailView {
    Image(PathBuf),
    /// Category icon shown until (or instead of) a thumbnail
    Placeholder(Category),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A valid thumbnail was already cached
    Cached,
    Generated,
    /// Gate refused: ceiling reached or already in flight
    Refused,
    Failed,
    /// Folder has no representative video
    NoVideo,
    /// Folder was evicted while generating; the output was thrown away
    Discarded,
}

/// User-facing notices raised from background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ToolUnavailable { reason: String },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Result of [`ThumbnailCoordinator::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Cache entries dropped because their folder is gone
    pub entries: usize,
    /// Thumbnail files deleted because no entry referenced them
    pub orphans: usize,
}

#[derive(Default)]
struct Tracking {
    states: HashMap<String, ThumbnailState>,
    /// Folders evicted while their generation was running. That generation
    /// throws its output away instead of caching it.
    evicted: HashSet<String>,
}

pub struct ThumbnailCoordinator {
    store: ThumbnailStore,
    gate: GenerationGate,
    extractor: Arc<dyn FrameExtractor>,
    cache_dir: PathBuf,
    tracking: Mutex<Tracking>,
    notifier: Arc<dyn Notifier>,
    acquisition_reported: AtomicBool,
}

impl ThumbnailCoordinator {
    pub fn new(
        store: ThumbnailStore,
        gate: GenerationGate,
        extractor: Arc<dyn FrameExtractor>,
        cache_dir: PathBuf,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gate,
            extractor,
            cache_dir,
            tracking: Mutex::new(Tracking::default()),
            notifier,
            acquisition_reported: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ThumbnailStore {
        &self.store
    }

    pub fn gate(&self) -> &GenerationGate {
        &self.gate
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn state(&self, folder_path: &str) -> ThumbnailState {
        self.tracking
            .lock()
            .states
            .get(folder_path)
            .copied()
            .unwrap_or(ThumbnailState::Absent)
    }

    /// Thumbnail to render for `folder` right now.
    pub fn view(&self, folder: &MediaFolderRef) -> ThumbnailView {
        if let Some(video) = &folder.first_video {
            let validation = self.store.validate(&folder.path, &fingerprint(video));
            if let Validation::Valid(entry) = validation {
                return ThumbnailView::Image(entry.thumbnail_path);
            }
        }
        ThumbnailView::Placeholder(folder.category)
    }

    /// UI hook: `folder` scrolled into view. Runs [`request`](Self::request)
    /// in the background.
    pub fn on_visible(self: &Arc<Self>, folder: &MediaFolderRef) -> JoinHandle<RequestOutcome> {
        let this = Arc::clone(self);
        let folder = folder.clone();
        tokio::spawn(async move { this.request(&folder).await })
    }

    /// Make sure `folder` has a valid thumbnail, generating one if the gate
    /// admits it. Idempotent: a folder whose cached thumbnail still matches
    /// its representative video is never regenerated.
    pub async fn request(&self, folder: &MediaFolderRef) -> RequestOutcome {
        let Some(video) = folder.first_video.clone() else {
            self.set_state(&folder.path, ThumbnailState::Absent);
            return RequestOutcome::NoVideo;
        };
        let content_fingerprint = fingerprint(&video);

        match self.store.validate(&folder.path, &content_fingerprint) {
            Validation::Valid(_) => {
                self.set_state(&folder.path, ThumbnailState::Cached);
                return RequestOutcome::Cached;
            }
            Validation::Stale(old) => {
                log::info!("Thumbnail for {} is stale; regenerating", folder.path);
                self.store.remove(&folder.path);
                if old.content_fingerprint != content_fingerprint {
                    remove_thumbnail_file(&old.thumbnail_path);
                }
            }
            Validation::Missing => {}
        }

        let Some(permit) = self.admit(&folder.path) else {
            return RequestOutcome::Refused;
        };

        let output = thumbnail_path(&self.cache_dir, &content_fingerprint);
        let result = self.extractor.extract(&video, &output).await;
        let outcome = self.finish(
            &folder.path,
            result,
            ThumbnailCacheEntry {
                thumbnail_path: output,
                content_fingerprint,
            },
        );

        // Released only after the result is recorded, so `evict` sees the
        // folder as in flight until then
        drop(permit);
        outcome
    }

    /// Queue `folder_path` and ask the gate for a slot. On refusal the
    /// request is dropped; if the folder is already generating, that state
    /// is kept.
    fn admit(&self, folder_path: &str) -> Option<Permit> {
        let mut tracking = self.tracking.lock();
        let previous = tracking.states.get(folder_path).copied();
        tracking
            .states
            .insert(folder_path.to_string(), ThumbnailState::Queued);

        match self.gate.admit(folder_path) {
            Some(permit) => {
                // Any leftover mark belongs to a run that already finished
                tracking.evicted.remove(folder_path);
                tracking
                    .states
                    .insert(folder_path.to_string(), ThumbnailState::Generating);
                Some(permit)
            }
            None => {
                let fallback = match previous {
                    Some(state) if self.gate.is_in_flight(folder_path) => state,
                    _ => ThumbnailState::Absent,
                };
                tracking.states.insert(folder_path.to_string(), fallback);
                None
            }
        }
    }

    /// Record the result of an admitted generation. Must run while the
    /// permit is still held.
    fn finish(
        &self,
        folder_path: &str,
        result: Result<(), GenerationError>,
        entry: ThumbnailCacheEntry,
    ) -> RequestOutcome {
        let mut tracking = self.tracking.lock();

        if tracking.evicted.remove(folder_path) {
            drop(tracking);
            log::debug!("Discarding thumbnail for evicted folder {}", folder_path);
            remove_thumbnail_file(&entry.thumbnail_path);
            return RequestOutcome::Discarded;
        }

        let error = match result {
            Ok(()) => {
                self.store.put(folder_path, entry);
                tracking
                    .states
                    .insert(folder_path.to_string(), ThumbnailState::Cached);
                log::debug!("Generated thumbnail for {}", folder_path);
                return RequestOutcome::Generated;
            }
            Err(e) => e,
        };

        tracking
            .states
            .insert(folder_path.to_string(), ThumbnailState::Failed);
        drop(tracking);

        match error {
            GenerationError::Acquisition(e) => {
                log::error!("Cannot generate thumbnails: {}", e);
                if !self.acquisition_reported.swap(true, Ordering::SeqCst) {
                    self.notifier.notify(Notice::ToolUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
            e => log::warn!("Thumbnail generation failed for {}: {}", folder_path, e),
        }
        RequestOutcome::Failed
    }

    /// Forget `folder_path` entirely: drop its cache entry and delete its
    /// thumbnail file. A file that is already gone is not an error. A
    /// generation still running for the folder has its result discarded.
    pub fn evict(&self, folder_path: &str) -> io::Result<()> {
        let removed = {
            let mut tracking = self.tracking.lock();
            tracking.states.remove(folder_path);
            if self.gate.is_in_flight(folder_path) {
                tracking.evicted.insert(folder_path.to_string());
            }
            self.store.remove(folder_path)
        };

        let Some(entry) = removed else {
            return Ok(());
        };
        match std::fs::remove_file(&entry.thumbnail_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drop cache entries for folders `keep` rejects, deleting their files,
    /// then delete thumbnail files in the cache directory that no entry
    /// references (leftovers of failed or killed runs).
    ///
    /// Folders with a generation in flight are kept, and the file sweep is
    /// skipped while any generation runs.
    pub fn prune(&self, keep: impl Fn(&str) -> bool) -> PruneReport {
        let mut tracking = self.tracking.lock();

        let removed = self
            .store
            .retain(|folder_path, _| keep(folder_path) || self.gate.is_in_flight(folder_path));
        for (folder_path, entry) in &removed {
            tracking.states.remove(folder_path);
            remove_thumbnail_file(&entry.thumbnail_path);
        }

        // Admission takes the tracking lock, so nothing can start while the
        // directory is swept
        let orphans = if self.gate.active() == 0 {
            self.sweep_orphans()
        } else {
            0
        };

        let report = PruneReport {
            entries: removed.len(),
            orphans,
        };
        if report != PruneReport::default() {
            log::info!(
                "Pruned {} thumbnail entries and {} orphaned files",
                report.entries,
                report.orphans
            );
        }
        report
    }

    fn sweep_orphans(&self) -> usize {
        let referenced: HashSet<PathBuf> = self.store.thumbnail_paths();
        let read_dir = match std::fs::read_dir(&self.cache_dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                log::warn!(
                    "Failed to read thumbnail directory {}: {}",
                    self.cache_dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut swept = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_thumbnail = path.extension().is_some_and(|ext| ext == "jpg");
            if !is_thumbnail || referenced.contains(&path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => swept += 1,
                Err(e) => log::warn!("Failed to delete orphaned {}: {}", path.display(), e),
            }
        }
        swept
    }

    /// Wait for pending cache writes; call before exiting.
    pub async fn flush(&self) {
        self.store.flush().await;
    }

    fn set_state(&self, folder_path: &str, state: ThumbnailState) {
        self.tracking
            .lock()
            .states
            .insert(folder_path.to_string(), state);
    }
}

fn remove_thumbnail_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to delete thumbnail {}: {}", path.display(), e);
        }
    }
}
