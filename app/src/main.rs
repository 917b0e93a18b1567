use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use media_library::MediaFolderRef;
use medialib::{Config, Confirmation, Library};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thumbnail_cache::{Notice, Notifier, RequestOutcome, ThumbnailView};

#[derive(Parser)]
#[command(name = "medialib")]
#[command(about = "Browse and launch a local anime/series/film library")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ./medialib.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the library roots and list every title folder
    Scan,

    /// List folders whose name contains the query
    Search { query: String },

    /// Show thumbnail status, optionally generating missing ones
    Thumbs {
        /// Generate every missing thumbnail before printing
        #[arg(long)]
        wait: bool,
    },

    /// Play the first video of a folder
    Play { path: String },

    /// Show recently played folders
    Recents,

    /// Delete a folder from disk along with its recents and thumbnail
    Delete {
        path: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Prints user-facing notices to stderr.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::ToolUnavailable { reason } => {
                eprintln!("⚠️  Thumbnails unavailable: {}", reason);
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let library = Library::open(config, Arc::new(StderrNotifier)).await?;

    let warnings = library.refresh().await?;
    for warning in &warnings {
        eprintln!("⚠️  {} library: {}", warning.category, warning.message);
    }

    let result = match cli.command {
        Commands::Scan => {
            print_folders(&library.folders());
            Ok(())
        }
        Commands::Search { query } => {
            print_folders(&library.search(&query));
            Ok(())
        }
        Commands::Thumbs { wait } => thumbs(&library, wait).await,
        Commands::Play { path } => library
            .play(&path)
            .await
            .with_context(|| format!("Cannot play {}", path)),
        Commands::Recents => {
            for item in library.recents().await {
                println!(
                    "{}  {:<7} {:>3} videos  {}",
                    item.last_played_at.format("%Y-%m-%d %H:%M"),
                    item.category.to_string(),
                    item.video_count,
                    item.name
                );
            }
            Ok(())
        }
        Commands::Delete { path, yes } => delete(&library, &path, yes).await,
    };

    library.shutdown().await;
    result
}

fn print_folders(folders: &[MediaFolderRef]) {
    if folders.is_empty() {
        println!("No folders found");
        return;
    }
    for folder in folders {
        println!(
            "{:<7} {:>3} videos  {}",
            folder.category.to_string(),
            folder.video_count,
            folder.path
        );
    }
}

/// Print each folder's thumbnail. With `wait`, keep requesting until every
/// folder with a video has been generated or has failed; refused requests
/// are simply retried in the next round.
async fn thumbs(library: &Library, wait: bool) -> Result<()> {
    if wait {
        let mut pending: Vec<String> = library
            .folders()
            .into_iter()
            .filter(|f| f.has_videos())
            .map(|f| f.path)
            .collect();
        let mut failed = 0;

        while !pending.is_empty() {
            let handles: Vec<_> = pending
                .iter()
                .filter_map(|path| library.on_visible(path).map(|h| (path.clone(), h)))
                .collect();

            let mut refused = Vec::new();
            for (path, handle) in handles {
                match handle.await? {
                    RequestOutcome::Refused => refused.push(path),
                    RequestOutcome::Failed => failed += 1,
                    _ => {}
                }
            }
            pending = refused;
        }

        if failed > 0 {
            eprintln!("⚠️  {} thumbnails could not be generated", failed);
        }
    }

    for folder in library.folders() {
        match library.view(&folder.path) {
            Some(ThumbnailView::Image(path)) => println!("{}  {}", folder.path, path.display()),
            _ => println!("{}  (placeholder)", folder.path),
        }
    }
    Ok(())
}

async fn delete(library: &Library, path: &str, yes: bool) -> Result<()> {
    let confirmation = if yes || confirm(&format!("Delete {} and everything in it?", path))? {
        Confirmation::Confirmed
    } else {
        Confirmation::Unconfirmed
    };

    if confirmation == Confirmation::Unconfirmed {
        println!("Cancelled");
        return Ok(());
    }

    library
        .delete(path, confirmation)
        .await
        .with_context(|| format!("Cannot delete {}", path))?;
    println!("🗑️  Deleted {}", path);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
