//! Media folder model shared by the scanner, the recents ring and the
//! thumbnail cache.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Library category a configured root directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Anime,
    Series,
    Film,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Anime, Category::Series, Category::Film];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Anime => write!(f, "anime"),
            Category::Series => write!(f, "series"),
            Category::Film => write!(f, "film"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "anime" => Ok(Category::Anime),
            "series" => Ok(Category::Series),
            "film" => Ok(Category::Film),
            _ => bail!("Invalid category: {}. Valid options: anime, series, film", s),
        }
    }
}

/// A title folder found under one of the configured roots.
///
/// Recomputed on every scan and never persisted. Its `path` is the key used
/// by the thumbnail cache and the recents ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFolderRef {
    pub path: String,
    pub name: String,
    pub category: Category,
    pub video_count: usize,
    /// Representative video: the natural-order first video file.
    pub first_video: Option<PathBuf>,
}

impl MediaFolderRef {
    pub fn has_videos(&self) -> bool {
        self.video_count > 0 && self.first_video.is_some()
    }
}

/// Compare two names in natural order: digit runs compare by numeric value,
/// everything else case-insensitively. Equal keys fall back to the raw
/// string order so sorting is deterministic.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let ord = compare_digit_runs(&l_run, &r_run);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    // Longer significant run is the larger number; avoids overflow on huge runs
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
}

/// Case-insensitive substring search over folder display names.
pub fn filter_folders<'a>(folders: &'a [MediaFolderRef], query: &str) -> Vec<&'a MediaFolderRef> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return folders.iter().collect();
    }
    folders
        .iter()
        .filter(|folder| folder.name.to_lowercase().contains(&needle))
        .collect()
}
