//! Locating (and if needed fetching) the ffmpeg binary
//!
//! Lookup order: configured path, the local support directory, the system
//! `PATH`. When none has it, a platform build is downloaded once into the
//! support directory. A successful lookup is remembered for the life of the
//! process; a failed download is not, so a later request can try again.

use ffmpeg_sidecar::download::{download_ffmpeg_package, ffmpeg_download_url, unpack_ffmpeg};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("ffmpeg is not installed and downloading is disabled")]
    NotInstalled,
    #[error("Unable to determine a writable support directory")]
    NoSupportDir,
    #[error("Failed to prepare {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to download ffmpeg: {0}")]
    Download(String),
    #[error("ffmpeg binary missing after download: {0}")]
    MissingAfterDownload(PathBuf),
}

pub struct ToolLocator {
    configured: Option<PathBuf>,
    support_dir: Option<PathBuf>,
    search_path: bool,
    allow_download: bool,
    resolved: OnceCell<PathBuf>,
}

impl ToolLocator {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            support_dir: default_support_dir(),
            search_path: true,
            allow_download: true,
            resolved: OnceCell::new(),
        }
    }

    pub fn with_support_dir(mut self, dir: PathBuf) -> Self {
        self.support_dir = Some(dir);
        self
    }

    /// Only use binaries already on disk; never touch the network or `PATH`.
    pub fn local_only(mut self) -> Self {
        self.search_path = false;
        self.allow_download = false;
        self
    }

    /// Path of a usable ffmpeg, fetching one on first use if necessary.
    pub async fn locate(&self) -> Result<PathBuf, AcquisitionError> {
        self.resolved
            .get_or_try_init(|| self.resolve())
            .await
            .cloned()
    }

    async fn resolve(&self) -> Result<PathBuf, AcquisitionError> {
        if let Some(path) = self.find_installed() {
            log::info!("Using ffmpeg at {}", path.display());
            return Ok(path);
        }
        if !self.allow_download {
            return Err(AcquisitionError::NotInstalled);
        }

        let target_dir = self.support_dir.clone().ok_or(AcquisitionError::NoSupportDir)?;
        log::info!("ffmpeg not found; downloading into {}", target_dir.display());
        tokio::task::spawn_blocking(move || download_into(&target_dir))
            .await
            .map_err(|e| AcquisitionError::Download(format!("download task failed: {}", e)))?
    }

    fn find_installed(&self) -> Option<PathBuf> {
        if let Some(path) = &self.configured {
            if path.is_file() {
                return Some(path.clone());
            }
            log::warn!("Configured ffmpeg path does not exist: {}", path.display());
        }

        if let Some(dir) = &self.support_dir {
            let bundled = dir.join(binary_name());
            if bundled.is_file() {
                return Some(bundled);
            }
        }

        if self.search_path {
            if let Ok(path) = which::which(binary_name()) {
                return Some(path);
            }
        }
        None
    }
}

fn default_support_dir() -> Option<PathBuf> {
    dirs::data_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .map(|base| base.join("medialib").join("ffmpeg"))
}

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

fn download_into(target_dir: &Path) -> Result<PathBuf, AcquisitionError> {
    fs::create_dir_all(target_dir).map_err(|source| AcquisitionError::Storage {
        path: target_dir.to_path_buf(),
        source,
    })?;

    let download_url = ffmpeg_download_url()
        .map_err(|e| AcquisitionError::Download(format!("no download for this platform: {}", e)))?;
    let archive_path = download_ffmpeg_package(download_url, target_dir)
        .map_err(|e| AcquisitionError::Download(e.to_string()))?;
    unpack_ffmpeg(&archive_path, target_dir)
        .map_err(|e| AcquisitionError::Download(format!("unpack failed: {}", e)))?;

    let binary_path = target_dir.join(binary_name());
    if !binary_path.is_file() {
        return Err(AcquisitionError::MissingAfterDownload(binary_path));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let storage_err = |source| AcquisitionError::Storage {
            path: binary_path.clone(),
            source,
        };
        let mut perms = fs::metadata(&binary_path).map_err(storage_err)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&binary_path, perms).map_err(storage_err)?;
    }

    log::info!("Downloaded ffmpeg to {}", binary_path.display());
    Ok(binary_path)
}
