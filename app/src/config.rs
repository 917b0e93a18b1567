use anyhow::{bail, Context};
use media_library::{Category, PlayerCommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use thumbnail_cache::ThumbnailConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory scanned for each category
    pub roots: HashMap<Category, PathBuf>,
    pub player: PlayerCommand,
    pub thumbnails: ThumbnailConfig,
    /// SQLite file backing the key-value store; platform data dir when unset
    pub store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigDocument::default().into()
    }
}

impl Config {
    /// Load from `explicit` if given, otherwise from the first config file
    /// found. No file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::from_file(path);
        }

        let mut candidates = Vec::new();
        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join("medialib.toml"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("medialib").join("config.toml"));
        }

        for path in candidates {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        log::debug!("No config file found; using defaults");
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }
}

fn default_root(category: Category) -> PathBuf {
    let base = dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = match category {
        Category::Anime => "Anime",
        Category::Series => "Series",
        Category::Film => "Films",
    };
    base.join(name)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    library: LibrarySection,
    #[serde(default)]
    player: Option<PlayerCommand>,
    #[serde(default)]
    thumbnails: ThumbnailConfig,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let library = value.library;
        let mut roots = HashMap::new();
        roots.insert(
            Category::Anime,
            library.anime.unwrap_or_else(|| default_root(Category::Anime)),
        );
        roots.insert(
            Category::Series,
            library.series.unwrap_or_else(|| default_root(Category::Series)),
        );
        roots.insert(
            Category::Film,
            library.film.unwrap_or_else(|| default_root(Category::Film)),
        );

        Config {
            roots,
            player: value.player.unwrap_or_default(),
            thumbnails: value.thumbnails,
            store_path: library.store_path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LibrarySection {
    anime: Option<PathBuf>,
    series: Option<PathBuf>,
    film: Option<PathBuf>,
    store_path: Option<PathBuf>,
}
