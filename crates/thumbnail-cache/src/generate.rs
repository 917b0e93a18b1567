//! Single-frame thumbnail extraction with ffmpeg
//!
//! One ffmpeg process per thumbnail: seek into the video, grab one frame,
//! scale it down and write a JPEG straight to the content-addressed output
//! path. The process gets a hard timeout and is killed when it runs over.

use crate::locate::{AcquisitionError, ToolLocator};
use crate::ThumbnailConfig;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to start extractor: {0}")]
    Spawn(String),
    #[error("Extractor exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("Extractor reported success but wrote no output")]
    MissingOutput,
    #[error("Extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// Produces a thumbnail image for a video file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Write a thumbnail of `video` to `output`. Success means the output
    /// file exists afterwards.
    async fn extract(&self, video: &Path, output: &Path) -> Result<(), GenerationError>;
}

/// ffmpeg-backed extractor.
pub struct FfmpegExtractor {
    locator: ToolLocator,
    timeout: Duration,
    seek_offset_secs: u64,
    width: u32,
    height: u32,
    jpeg_quality: u8,
}

impl FfmpegExtractor {
    pub fn new(config: &ThumbnailConfig, locator: ToolLocator) -> Self {
        Self {
            locator,
            timeout: Duration::from_secs(config.timeout_secs),
            seek_offset_secs: config.seek_offset_secs,
            width: config.width,
            height: config.height,
            jpeg_quality: config.jpeg_quality,
        }
    }

    fn build_args(&self, video: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            // Seeking before -i is a fast keyframe seek
            "-ss".to_string(),
            format_offset(self.seek_offset_secs),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.width, self.height),
            "-q:v".to_string(),
            self.jpeg_quality.to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(&self, video: &Path, output: &Path) -> Result<(), GenerationError> {
        let ffmpeg = self.locator.locate().await?;

        let mut command = Command::new(&ffmpeg);
        command.args(self.build_args(video, output));

        // Hide console window on Windows (CREATE_NO_WINDOW)
        #[cfg(windows)]
        command.creation_flags(0x08000000);

        run_with_timeout(command, self.timeout).await?;

        // Exit status alone is not trusted; some codecs "succeed" silently
        if !output.is_file() {
            return Err(GenerationError::MissingOutput);
        }
        Ok(())
    }
}

/// Run `command` to completion, killing it if it exceeds `limit`.
pub async fn run_with_timeout(
    mut command: Command,
    limit: Duration,
) -> Result<(), GenerationError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| GenerationError::Spawn(e.to_string()))?;

    // Dropping the wait_with_output future on timeout drops the child,
    // which kills it (kill_on_drop) and lets tokio reap it
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| GenerationError::Spawn(e.to_string()))?,
        Err(_) => return Err(GenerationError::Timeout(limit)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GenerationError::NonZeroExit {
            code: output.status.code(),
            stderr: stderr.trim().chars().take(500).collect(),
        });
    }
    Ok(())
}

/// `HH:MM:SS` form of a seek offset.
fn format_offset(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
