//! External video player launch.
//!
//! The player runs detached: we spawn it and return immediately. A small
//! thread waits on the child so it does not linger as a zombie.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Folder not found in library: {0}")]
    UnknownFolder(String),
    #[error("No video file found in {0}")]
    NoVideo(String),
    #[error("Failed to start player '{program}': {reason}")]
    Spawn { program: String, reason: String },
}

/// Program and leading arguments used to open a video file. The video path
/// is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PlayerCommand {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                program: "open".to_string(),
                args: Vec::new(),
            }
        } else if cfg!(windows) {
            Self {
                program: "cmd".to_string(),
                args: vec!["/C".to_string(), "start".to_string(), String::new()],
            }
        } else {
            Self {
                program: "mpv".to_string(),
                args: Vec::new(),
            }
        }
    }
}

impl PlayerCommand {
    fn build(&self, video: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(video)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

/// Start the player on `video` without waiting for it. Returns the pid.
///
/// The child is reaped on a background thread once it exits; nothing else
/// tracks it.
pub fn launch_detached(player: &PlayerCommand, video: &Path) -> Result<u32, PlaybackError> {
    let mut child = player.build(video).spawn().map_err(|e| PlaybackError::Spawn {
        program: player.program.clone(),
        reason: e.to_string(),
    })?;

    let pid = child.id();
    log::info!("Launched {} (pid {}) for {}", player.program, pid, video.display());

    let reaper = thread::Builder::new()
        .name(format!("player-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) => log::debug!("Player (pid {}) exited with {}", pid, status),
            Err(e) => log::warn!("Failed to wait on player (pid {}): {}", pid, e),
        });
    if let Err(e) = reaper {
        log::warn!("Could not watch player (pid {}): {}", pid, e);
    }
    Ok(pid)
}
