use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::action::{LibraryFilter, MediaKind};

#[derive(Debug, Parser)]
#[command(
    name = "trakt-scrobbler",
    version,
    about = "Scrobble Kodi playback to Trakt and keep watched state in sync"
)]
pub struct Cli {
    /// Use this database file instead of the default location.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scrobbling service until interrupted.
    Run(RunArgs),
    /// Queue a library sync.
    Sync {
        #[arg(long, value_enum, default_value_t = LibraryFilter::All)]
        library: LibraryFilter,
        /// Do not show progress notifications.
        #[arg(long)]
        silent: bool,
    },
    /// Queue a mark-as-watched request.
    MarkWatched(MarkWatchedArgs),
    /// Queue a rate or unrate request.
    Rate(RateArgs),
    /// Open the settings dialog on the host.
    Settings,
    /// Read or change a setting.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Exchange a Trakt PIN for an access token.
    Auth { pin: String },
    /// List pending queue entries.
    Queue,
    /// Drop all pending queue entries.
    Purge,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Kodi JSON-RPC HTTP endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8080/jsonrpc")]
    pub kodi_url: String,
    /// Kodi JSON-RPC notification socket.
    #[arg(long, default_value = "127.0.0.1:9090")]
    pub kodi_events: String,
}

#[derive(Debug, Args)]
pub struct MarkWatchedArgs {
    #[arg(long, value_enum)]
    pub media_type: MediaKind,
    /// Remote id (IMDb id or Trakt slug).
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub season: Option<u32>,
    #[arg(long)]
    pub episode: Option<u32>,
    /// Episodes of `--season`, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub episodes: Vec<u32>,
    /// Episodes per season for a show, e.g. `1=1,2;2=3`.
    #[arg(long)]
    pub seasons: Option<String>,
}

#[derive(Debug, Args)]
pub struct RateArgs {
    #[arg(long, value_enum)]
    pub media_type: MediaKind,
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub library_id: Option<i64>,
    #[arg(long)]
    pub season: Option<u32>,
    #[arg(long)]
    pub episode: Option<u32>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub rating: Option<u8>,
    /// Remove the rating instead of setting one.
    #[arg(long, conflicts_with = "rating")]
    pub unrate: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    /// Print every stored setting.
    List,
}
