//! Media library launcher: ties folder scanning, thumbnails, recents and
//! playback together behind one [`Library`] handle.

pub mod config;

pub use config::Config;

use anyhow::{Context, Result};
use library_store::{KeyValueStore, SqliteStore};
use media_library::{
    filter_folders, launch_detached, scan_library, Category, MediaFolderRef, PlaybackError,
    RecentItem, RecentsRing, ScanWarning,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use thumbnail_cache::{
    FfmpegExtractor, FrameExtractor, GenerationGate, Notifier, RequestOutcome,
    ThumbnailCoordinator, ThumbnailStore, ThumbnailView, ToolLocator,
};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Folder not found in library: {0}")]
    UnknownFolder(String),
    #[error("Deleting {0} requires confirmation")]
    NotConfirmed(String),
    #[error("Failed to delete {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whether the user confirmed a destructive action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Unconfirmed,
}

pub struct Library {
    config: Config,
    thumbnails: Arc<ThumbnailCoordinator>,
    recents: RecentsRing,
    folders: RwLock<Vec<MediaFolderRef>>,
}

impl Library {
    /// Open the library with the ffmpeg extractor and the configured store.
    /// Folders are empty until [`refresh`](Self::refresh).
    pub async fn open(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create store directory: {}", parent.display())
                    })?;
                }
                SqliteStore::open_at(path)?
            }
            None => SqliteStore::open()?,
        };
        let cache_dir = config.thumbnails.resolve_cache_dir()?;
        let locator = ToolLocator::new(config.thumbnails.ffmpeg_path.clone());
        let extractor = Arc::new(FfmpegExtractor::new(&config.thumbnails, locator));

        Ok(Self::with_parts(config, Arc::new(store), extractor, cache_dir, notifier).await)
    }

    /// Assemble a library from explicit parts.
    pub async fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        extractor: Arc<dyn FrameExtractor>,
        cache_dir: PathBuf,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let thumbnail_store = ThumbnailStore::load(store.clone()).await;
        let recents = RecentsRing::load(store).await;
        let thumbnails = Arc::new(ThumbnailCoordinator::new(
            thumbnail_store,
            GenerationGate::new(config.thumbnails.max_concurrent),
            extractor,
            cache_dir,
            notifier,
        ));

        Self {
            config,
            thumbnails,
            recents,
            folders: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailCoordinator> {
        &self.thumbnails
    }

    /// Rescan every category root, replace the folder list, then reconcile
    /// the recents ring and prune the thumbnail cache against it. Unreadable
    /// roots come back as warnings; their recents and thumbnails are kept.
    pub async fn refresh(&self) -> Result<Vec<ScanWarning>> {
        let roots = self.config.roots.clone();
        let report = tokio::task::spawn_blocking(move || scan_library(&roots))
            .await
            .context("Scan task failed")?;

        log::info!(
            "Scanned {} folders ({} warnings)",
            report.folders.len(),
            report.warnings.len()
        );
        *self.folders.write() = report.folders.clone();

        let scanned: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|category| report.warnings.iter().all(|w| w.category != *category))
            .collect();

        if let Err(e) = self
            .recents
            .reconcile_categories(&report.folders, &scanned)
            .await
        {
            log::warn!("Failed to persist reconciled recents: {}", e);
        }

        if !report.folders.is_empty() {
            let scanned_roots: Vec<&PathBuf> = scanned
                .iter()
                .filter_map(|category| self.config.roots.get(category))
                .collect();
            let present: HashSet<&str> =
                report.folders.iter().map(|f| f.path.as_str()).collect();
            self.thumbnails.prune(|folder_path| {
                present.contains(folder_path)
                    || !scanned_roots
                        .iter()
                        .any(|root| Path::new(folder_path).starts_with(root))
            });
        }

        Ok(report.warnings)
    }

    pub fn folders(&self) -> Vec<MediaFolderRef> {
        self.folders.read().clone()
    }

    pub fn folder(&self, path: &str) -> Option<MediaFolderRef> {
        self.folders.read().iter().find(|f| f.path == path).cloned()
    }

    /// Folders whose name contains `query`, case-insensitively.
    pub fn search(&self, query: &str) -> Vec<MediaFolderRef> {
        let folders = self.folders.read();
        filter_folders(&folders, query).into_iter().cloned().collect()
    }

    pub async fn recents(&self) -> Vec<RecentItem> {
        self.recents.items().await
    }

    /// Grid item for `path` became visible. `None` if the folder is unknown.
    pub fn on_visible(&self, path: &str) -> Option<JoinHandle<RequestOutcome>> {
        let folder = self.folder(path)?;
        Some(self.thumbnails.on_visible(&folder))
    }

    pub fn view(&self, path: &str) -> Option<ThumbnailView> {
        self.folder(path).map(|folder| self.thumbnails.view(&folder))
    }

    /// Launch the player on the folder's representative video and record
    /// the play in recents.
    pub async fn play(&self, path: &str) -> Result<(), PlaybackError> {
        let folder = self
            .folder(path)
            .ok_or_else(|| PlaybackError::UnknownFolder(path.to_string()))?;
        let video = folder
            .first_video
            .clone()
            .ok_or_else(|| PlaybackError::NoVideo(folder.name.clone()))?;

        launch_detached(&self.config.player, &video)?;

        if let Err(e) = self.recents.record(&folder).await {
            log::warn!("Failed to record recent play of {}: {}", folder.path, e);
        }
        Ok(())
    }

    /// Delete the folder from disk, then drop it from the folder list, the
    /// recents ring and the thumbnail cache.
    ///
    /// Not transactional: if removing the directory fails partway, whatever
    /// was already deleted stays deleted and the in-memory state is left
    /// untouched until the next refresh.
    pub async fn delete(
        &self,
        path: &str,
        confirmation: Confirmation,
    ) -> Result<(), DeletionError> {
        if confirmation != Confirmation::Confirmed {
            return Err(DeletionError::NotConfirmed(path.to_string()));
        }
        if self.folder(path).is_none() {
            return Err(DeletionError::UnknownFolder(path.to_string()));
        }

        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|source| DeletionError::Io {
                path: PathBuf::from(path),
                source,
            })?;
        log::info!("Deleted {}", path);

        self.folders.write().retain(|f| f.path != path);
        if let Err(e) = self.recents.remove(path).await {
            log::warn!("Failed to persist recents after deleting {}: {}", path, e);
        }
        if let Err(e) = self.thumbnails.evict(path) {
            log::warn!("Failed to delete thumbnail for {}: {}", path, e);
        }
        Ok(())
    }

    /// Wait for pending cache writes. Call before the process exits.
    pub async fn shutdown(&self) {
        self.thumbnails.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use thumbnail_cache::{GenerationError, Notice};
    use tokio::sync::Semaphore;

    struct WritingExtractor;

    #[async_trait]
    impl FrameExtractor for WritingExtractor {
        async fn extract(&self, _video: &Path, output: &Path) -> Result<(), GenerationError> {
            fs::write(output, b"jpeg").map_err(|e| GenerationError::Spawn(e.to_string()))
        }
    }

    /// Blocks inside `extract` until a permit is released.
    struct HeldExtractor {
        started: AtomicUsize,
        release: Semaphore,
    }

    impl HeldExtractor {
        fn new() -> Self {
            Self {
                started: AtomicUsize::new(0),
                release: Semaphore::new(0),
            }
        }

        async fn wait_started(&self, count: usize) {
            for _ in 0..500 {
                if self.started.load(Ordering::SeqCst) >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("extraction never started");
        }
    }

    #[async_trait]
    impl FrameExtractor for HeldExtractor {
        async fn extract(&self, _video: &Path, output: &Path) -> Result<(), GenerationError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release
                .acquire()
                .await
                .map_err(|e| GenerationError::Spawn(e.to_string()))?
                .forget();
            fs::write(output, b"jpeg").map_err(|e| GenerationError::Spawn(e.to_string()))
        }
    }

    struct SilentNotifier;

    impl Notifier for SilentNotifier {
        fn notify(&self, _notice: Notice) {}
    }

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = tempfile::tempdir()?;
            let mut roots = HashMap::new();
            for category in Category::ALL {
                let root = dir.path().join(category.to_string());
                fs::create_dir_all(&root)?;
                roots.insert(category, root);
            }

            let mut config = Config::default();
            config.roots = roots;
            // `true` exits immediately and ignores its arguments
            config.player.program = "true".to_string();
            config.player.args.clear();
            config.store_path = Some(dir.path().join("store.db"));
            config.thumbnails.cache_dir = Some(dir.path().join("thumbs"));
            Ok(Self { dir, config })
        }

        fn title(&self, category: Category, name: &str, videos: &[&str]) -> Result<String> {
            let folder = self.config.roots[&category].join(name);
            fs::create_dir_all(&folder)?;
            for video in videos {
                fs::write(folder.join(video), b"")?;
            }
            Ok(folder.to_string_lossy().to_string())
        }

        async fn open(&self) -> Result<Library> {
            self.open_with(Arc::new(WritingExtractor)).await
        }

        async fn open_with(&self, extractor: Arc<dyn FrameExtractor>) -> Result<Library> {
            let store: Arc<dyn KeyValueStore> =
                Arc::new(SqliteStore::open_at(&self.dir.path().join("store.db"))?);
            let cache_dir = self.config.thumbnails.resolve_cache_dir()?;
            let library = Library::with_parts(
                self.config.clone(),
                store,
                extractor,
                cache_dir,
                Arc::new(SilentNotifier),
            )
            .await;
            library.refresh().await?;
            Ok(library)
        }
    }

    #[tokio::test]
    async fn test_refresh_and_search() -> Result<()> {
        let fx = Fixture::new()?;
        fx.title(Category::Anime, "Cowboy Bebop", &["01.mkv", "02.mkv"])?;
        fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        fx.title(Category::Series, "The Wire", &[])?;

        let library = fx.open().await?;
        assert_eq!(library.folders().len(), 3);

        let hits = library.search("BEBOP");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].video_count, 2);
        assert_eq!(library.search("").len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_is_warning() -> Result<()> {
        let fx = Fixture::new()?;
        fs::remove_dir_all(&fx.config.roots[&Category::Series])?;
        fx.title(Category::Anime, "Akira", &["Akira.mkv"])?;

        let library = fx.open().await?;
        let warnings = library.refresh().await?;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].category, Category::Series);
        assert_eq!(library.folders().len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_play_records_recent() -> Result<()> {
        let fx = Fixture::new()?;
        let path = fx.title(Category::Anime, "Trigun", &["01.mkv"])?;
        let library = fx.open().await?;

        library.play(&path).await?;
        let recents = library.recents().await;
        assert_eq!(recents.len(), 1);
        assert_eq!(recents[0].path, path);
        Ok(())
    }

    #[tokio::test]
    async fn test_play_preconditions() -> Result<()> {
        let fx = Fixture::new()?;
        let empty = fx.title(Category::Series, "Empty", &["notes.txt"])?;
        let library = fx.open().await?;

        assert!(matches!(
            library.play(&empty).await,
            Err(PlaybackError::NoVideo(_))
        ));
        assert!(matches!(
            library.play("/not/in/library").await,
            Err(PlaybackError::UnknownFolder(_))
        ));
        assert!(library.recents().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_player_spawn_failure_is_not_recorded() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.config.player.program = "/nonexistent/player".to_string();
        let path = fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        let library = fx.open().await?;

        assert!(matches!(
            library.play(&path).await,
            Err(PlaybackError::Spawn { .. })
        ));
        assert!(library.recents().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation() -> Result<()> {
        let fx = Fixture::new()?;
        let path = fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        let library = fx.open().await?;

        let err = library.delete(&path, Confirmation::Unconfirmed).await.unwrap_err();
        assert!(matches!(err, DeletionError::NotConfirmed(_)));
        assert!(Path::new(&path).exists());
        assert_eq!(library.folders().len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_removes_everything() -> Result<()> {
        let fx = Fixture::new()?;
        let path = fx.title(Category::Anime, "Trigun", &["01.mkv"])?;
        let keep = fx.title(Category::Anime, "Akira", &["Akira.mkv"])?;
        let library = fx.open().await?;

        library.play(&path).await?;
        library.play(&keep).await?;
        let outcome = library.on_visible(&path).unwrap().await?;
        assert_eq!(outcome, RequestOutcome::Generated);
        let thumbnail = library.thumbnails().store().lookup(&path).unwrap().thumbnail_path;
        assert!(thumbnail.exists());

        library.delete(&path, Confirmation::Confirmed).await?;

        assert!(!Path::new(&path).exists());
        assert!(library.folder(&path).is_none());
        assert!(library.recents().await.iter().all(|r| r.path != path));
        assert!(library.thumbnails().store().lookup(&path).is_none());
        assert!(!thumbnail.exists());
        assert_eq!(library.view(&keep), Some(ThumbnailView::Placeholder(Category::Anime)));

        let err = library.delete(&path, Confirmation::Confirmed).await.unwrap_err();
        assert!(matches!(err, DeletionError::UnknownFolder(_)));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_thumbnails_and_recents_survive_restart() -> Result<()> {
        let fx = Fixture::new()?;
        let path = fx.title(Category::Anime, "Trigun", &["01.mkv"])?;

        let library = fx.open().await?;
        library.on_visible(&path).unwrap().await?;
        library.play(&path).await?;
        library.shutdown().await;
        drop(library);

        let reopened = fx.open().await?;
        assert!(matches!(reopened.view(&path), Some(ThumbnailView::Image(_))));
        assert_eq!(
            reopened.on_visible(&path).unwrap().await?,
            RequestOutcome::Cached
        );
        assert_eq!(reopened.recents().await.len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refresh_prunes_vanished_recents() -> Result<()> {
        let fx = Fixture::new()?;
        let gone = fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        fx.title(Category::Film, "Ronin", &["Ronin.mp4"])?;
        let library = fx.open().await?;
        library.play(&gone).await?;

        fs::remove_dir_all(&gone)?;
        library.refresh().await?;
        assert!(library.recents().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_during_generation_leaves_nothing_cached() -> Result<()> {
        let fx = Fixture::new()?;
        let path = fx.title(Category::Anime, "Trigun", &["01.mkv"])?;
        let extractor = Arc::new(HeldExtractor::new());
        let library = fx.open_with(extractor.clone()).await?;

        let pending = library.on_visible(&path).unwrap();
        extractor.wait_started(1).await;
        library.delete(&path, Confirmation::Confirmed).await?;
        extractor.release.add_permits(1);

        assert_eq!(pending.await?, RequestOutcome::Discarded);
        assert!(library.thumbnails().store().lookup(&path).is_none());
        library.shutdown().await;
        drop(library);

        let reopened = fx.open().await?;
        assert!(reopened.thumbnails().store().is_empty());
        let cache_dir = fx.config.thumbnails.resolve_cache_dir()?;
        assert_eq!(fs::read_dir(cache_dir)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_prunes_thumbnails_of_vanished_folders() -> Result<()> {
        let fx = Fixture::new()?;
        let gone = fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        let kept = fx.title(Category::Film, "Ronin", &["Ronin.mp4"])?;
        let library = fx.open().await?;

        assert_eq!(library.on_visible(&gone).unwrap().await?, RequestOutcome::Generated);
        assert_eq!(library.on_visible(&kept).unwrap().await?, RequestOutcome::Generated);
        let file = library.thumbnails().store().lookup(&gone).unwrap().thumbnail_path;

        fs::remove_dir_all(&gone)?;
        library.refresh().await?;

        assert!(library.thumbnails().store().lookup(&gone).is_none());
        assert!(!file.exists());
        assert!(matches!(library.view(&kept), Some(ThumbnailView::Image(_))));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_root_keeps_its_recents_and_thumbnails() -> Result<()> {
        let fx = Fixture::new()?;
        let film = fx.title(Category::Film, "Heat", &["Heat.mp4"])?;
        fx.title(Category::Anime, "Akira", &["Akira.mkv"])?;
        let library = fx.open().await?;

        library.play(&film).await?;
        assert_eq!(library.on_visible(&film).unwrap().await?, RequestOutcome::Generated);

        // Film drive unmounted
        let film_root = fx.config.roots[&Category::Film].clone();
        let unmounted = fx.dir.path().join("unmounted");
        fs::rename(&film_root, &unmounted)?;

        let warnings = library.refresh().await?;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].category, Category::Film);
        assert!(library.recents().await.iter().any(|r| r.path == film));
        assert!(library.thumbnails().store().lookup(&film).is_some());

        fs::rename(&unmounted, &film_root)?;
        library.refresh().await?;
        assert!(matches!(library.view(&film), Some(ThumbnailView::Image(_))));
        assert_eq!(library.recents().await.len(), 1);
        Ok(())
    }
}
