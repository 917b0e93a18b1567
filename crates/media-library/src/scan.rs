//! Directory scanning for configured category roots
//!
//! Each configured root (one per category) holds one subfolder per title.
//! A title's videos are the files directly inside that subfolder whose
//! extension is a known video container.

use crate::folder::{natural_cmp, Category, MediaFolderRef};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supported video file extensions (compared case-insensitively)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "webm", "mov", "m4v", "flv"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ScanError::NotFound(path.to_path_buf())
        } else {
            ScanError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// A directory entry as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_directory: bool,
}

/// Non-fatal problem with one category root, reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
    pub category: Category,
    pub message: String,
}

/// Result of scanning every configured category.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub folders: Vec<MediaFolderRef>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &MediaFolderRef> {
        self.folders.iter().filter(move |f| f.category == category)
    }
}

/// List the entries of `path`. Fails with `ScanError::NotFound` when the
/// directory does not exist.
pub fn list_subdirectories(path: &Path) -> Result<Vec<DirEntryInfo>, ScanError> {
    let read_dir = fs::read_dir(path).map_err(|e| ScanError::from_io(path, e))?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| ScanError::from_io(path, e))?;
        let is_directory = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            is_directory,
        });
    }
    Ok(entries)
}

/// Whether a path has one of the supported video extensions
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// List the video files directly inside `folder`, sorted in natural order.
pub fn list_videos(folder: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut videos: Vec<PathBuf> = list_subdirectories(folder)?
        .into_iter()
        .filter(|entry| !entry.is_directory)
        .map(|entry| folder.join(entry.name))
        .filter(|path| is_video_file(path))
        .collect();

    videos.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(videos)
}

/// The representative video of a folder: its natural-order first video.
pub fn first_video(folder: &Path) -> Result<Option<PathBuf>, ScanError> {
    Ok(list_videos(folder)?.into_iter().next())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Build a folder reference for one title directory.
pub fn describe_folder(path: &Path, category: Category) -> MediaFolderRef {
    let videos = match list_videos(path) {
        Ok(videos) => videos,
        Err(e) => {
            log::warn!("Failed to list videos in {}: {}", path.display(), e);
            Vec::new()
        }
    };

    MediaFolderRef {
        path: path.to_string_lossy().to_string(),
        name: file_name(path),
        category,
        video_count: videos.len(),
        first_video: videos.into_iter().next(),
    }
}

/// Scan one category root for title folders.
pub fn scan_category(root: &Path, category: Category) -> Result<Vec<MediaFolderRef>, ScanError> {
    let dirs: Vec<PathBuf> = list_subdirectories(root)?
        .into_iter()
        .filter(|entry| entry.is_directory && !entry.name.starts_with('.'))
        .map(|entry| root.join(entry.name))
        .collect();

    // Counting videos touches every title folder; do it in parallel
    let mut folders: Vec<MediaFolderRef> = dirs
        .par_iter()
        .map(|dir| describe_folder(dir, category))
        .collect();

    folders.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    log::debug!(
        "Scanned {} {} folders under {}",
        folders.len(),
        category,
        root.display()
    );
    Ok(folders)
}

/// Scan every configured category. A failing root becomes a warning and an
/// empty list for that category; the remaining categories still scan.
pub fn scan_library(roots: &HashMap<Category, PathBuf>) -> ScanReport {
    let mut report = ScanReport::default();

    for category in Category::ALL {
        let Some(root) = roots.get(&category) else {
            continue;
        };

        match scan_category(root, category) {
            Ok(folders) => report.folders.extend(folders),
            Err(e) => {
                log::warn!("Skipping {} library: {}", category, e);
                report.warnings.push(ScanWarning {
                    category,
                    message: e.to_string(),
                });
            }
        }
    }

    report
}
