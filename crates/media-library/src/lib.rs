//! Folder scanning, recently-played tracking and player launch for the
//! media library launcher.
//!
//! The library is organised as configured category roots (anime, series,
//! film), each holding one subfolder per title. A title's representative
//! video is its natural-order first video file; it drives both playback and
//! thumbnailing.

pub mod folder;
pub mod player;
pub mod recents;
pub mod scan;

pub use folder::{filter_folders, natural_cmp, Category, MediaFolderRef};
pub use player::{launch_detached, PlaybackError, PlayerCommand};
pub use recents::{ReconcileOutcome, RecentItem, RecentsRing, RECENTS_CAPACITY};
pub use scan::{
    first_video, list_subdirectories, list_videos, scan_category, scan_library, DirEntryInfo,
    ScanError, ScanReport, ScanWarning, VIDEO_EXTENSIONS,
};
