//! Content-addressed thumbnail cache for media library folders
//!
//! A folder's thumbnail is a single frame grabbed by ffmpeg from its
//! representative video, stored on disk under a name derived from that
//! video's fingerprint, and remembered in a persisted folder → thumbnail
//! mapping so it survives restarts.
//!
//! # Pieces
//!
//! - **Fingerprint**: 128-bit digest of the representative video's path
//! - **Store**: in-memory mapping with a lagging, fully-rewritten persisted blob
//! - **Gate**: at most a few extractions at once, never two for one folder
//! - **Generator**: ffmpeg single-frame extraction with a hard timeout
//! - **Coordinator**: visibility-driven state machine tying it all together

pub mod coordinator;
pub mod gate;
pub mod generate;
pub mod locate;
pub mod store;

pub use coordinator::{
    Notice, Notifier, PruneReport, RequestOutcome, ThumbnailCoordinator, ThumbnailState,
    ThumbnailView,
};
pub use gate::{GenerationGate, Permit};
pub use generate::{FfmpegExtractor, FrameExtractor, GenerationError};
pub use locate::{AcquisitionError, ToolLocator};
pub use store::{ThumbnailCacheEntry, ThumbnailStore, Validation};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Standard configuration for thumbnail generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Ceiling on concurrently running extraction processes
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    /// Seek offset into the video, skipping intros and leading black frames
    pub seek_offset_secs: u64,
    pub width: u32,
    pub height: u32,
    /// ffmpeg `-q:v` value (2 = best, 31 = worst)
    pub jpeg_quality: u8,
    pub cache_dir: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout_secs: 10,
            seek_offset_secs: 5 * 60,
            width: 480,
            height: 270,
            jpeg_quality: 2,
            cache_dir: None,
            ffmpeg_path: None,
        }
    }
}

impl ThumbnailConfig {
    /// Directory holding generated thumbnails, created if missing.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        let dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .or_else(dirs::home_dir)
                .context("Unable to find a cache directory")?
                .join("medialib")
                .join("thumbnails"),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(dir)
    }
}

/// Fingerprint of a representative video file.
///
/// Hashes the path string only, not the file bytes: a new first video (or a
/// rename) changes the fingerprint, but replacing a file in place under the
/// same name does not.
pub fn fingerprint(file_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.to_string_lossy().as_bytes());
    let result = hasher.finalize();
    // First 16 bytes (32 hex chars): 128 bits is plenty for a filename key
    hex::encode(&result[..16])
}

/// Content-addressed location of the thumbnail for a fingerprint.
pub fn thumbnail_path(cache_dir: &Path, fingerprint: &str) -> PathBuf {
    cache_dir.join(format!("{}.jpg", fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let path = Path::new("/library/anime/Trigun/Trigun 01.mkv");
        let fp1 = fingerprint(path);
        let fp2 = fingerprint(path);

        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 32); // 16 bytes as hex = 32 chars
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_path() {
        let fp1 = fingerprint(Path::new("/library/anime/Trigun/Trigun 01.mkv"));
        let fp2 = fingerprint(Path::new("/library/anime/Trigun/Trigun 00.mkv"));
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_fingerprint_ignores_file_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let video = dir.path().join("ep1.mkv");
        std::fs::write(&video, b"first cut")?;
        let before = fingerprint(&video);
        std::fs::write(&video, b"director's cut, much longer")?;
        assert_eq!(before, fingerprint(&video));
        Ok(())
    }

    #[test]
    fn test_thumbnail_path_is_content_addressed() {
        let fp = fingerprint(Path::new("/v/ep1.mkv"));
        let path = thumbnail_path(Path::new("/cache"), &fp);
        assert_eq!(path, PathBuf::from(format!("/cache/{}.jpg", fp)));
    }

    #[test]
    fn test_config_defaults() {
        let config = ThumbnailConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.seek_offset_secs, 300);
        assert_eq!((config.width, config.height), (480, 270));
    }

    #[test]
    fn test_resolve_cache_dir_creates_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ThumbnailConfig {
            cache_dir: Some(dir.path().join("thumbs")),
            ..ThumbnailConfig::default()
        };
        let resolved = config.resolve_cache_dir()?;
        assert!(resolved.is_dir());
        Ok(())
    }
}
