use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Episode,
    Season,
    Show,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
            MediaKind::Season => "season",
            MediaKind::Show => "show",
        };
        f.write_str(label)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LibraryFilter {
    #[default]
    All,
    Movies,
    Episodes,
}

impl LibraryFilter {
    pub fn includes_movies(self) -> bool {
        matches!(self, LibraryFilter::All | LibraryFilter::Movies)
    }

    pub fn includes_episodes(self) -> bool {
        matches!(self, LibraryFilter::All | LibraryFilter::Episodes)
    }
}

/// What is being played. Library-backed variants carry only the host id;
/// ad-hoc variants carry only the on-screen metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaIdentity {
    LibraryMovie {
        library_id: i64,
    },
    LibraryEpisode {
        library_id: i64,
    },
    AdHocMovie {
        title: String,
        year: u32,
    },
    AdHocEpisode {
        show_title: String,
        title: String,
        season: u32,
        episode: u32,
        year: Option<u32>,
    },
}

impl MediaIdentity {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaIdentity::LibraryMovie { .. } | MediaIdentity::AdHocMovie { .. } => {
                MediaKind::Movie
            }
            MediaIdentity::LibraryEpisode { .. } | MediaIdentity::AdHocEpisode { .. } => {
                MediaKind::Episode
            }
        }
    }

    pub fn library_id(&self) -> Option<i64> {
        match self {
            MediaIdentity::LibraryMovie { library_id }
            | MediaIdentity::LibraryEpisode { library_id } => Some(*library_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiEpisode {
    pub ids: Vec<i64>,
    pub count: usize,
}

impl MultiEpisode {
    pub fn new(ids: Vec<i64>) -> Self {
        let count = ids.len();
        Self { ids, count }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "media_type", rename_all = "snake_case")]
pub enum MarkWatchedRequest {
    Movie {
        id: String,
    },
    Episode {
        id: String,
        season: u32,
        episode: u32,
    },
    Season {
        id: String,
        season: u32,
        episodes: Vec<u32>,
    },
    Show {
        id: String,
        seasons: BTreeMap<u32, Vec<u32>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingAction {
    Rate,
    Unrate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRequest {
    pub action: RatingAction,
    pub media_type: MediaKind,
    pub remote_id: String,
    #[serde(default)]
    pub library_id: Option<i64>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub rating: Option<u8>,
}

/// One unit of work for the dispatcher. Serialized as JSON into the durable
/// queue, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Started {
        identity: MediaIdentity,
        #[serde(default)]
        multi_episode: Option<MultiEpisode>,
        #[serde(default)]
        playlist_index: Option<i64>,
    },
    Ended,
    Stopped,
    Paused,
    Resumed,
    Seek {
        time: f64,
        offset: f64,
    },
    SeekChapter {
        chapter: i64,
    },
    DatabaseUpdated,
    DatabaseCleaned,
    SettingsChanged,
    MarkWatched {
        request: MarkWatchedRequest,
    },
    ManualRating {
        request: RatingRequest,
    },
    ManualSync {
        #[serde(default)]
        silent: bool,
        #[serde(default)]
        library: LibraryFilter,
    },
    ShowSettings,
    ScanStarted,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Started { .. } => "started",
            Action::Ended => "ended",
            Action::Stopped => "stopped",
            Action::Paused => "paused",
            Action::Resumed => "resumed",
            Action::Seek { .. } => "seek",
            Action::SeekChapter { .. } => "seek_chapter",
            Action::DatabaseUpdated => "database_updated",
            Action::DatabaseCleaned => "database_cleaned",
            Action::SettingsChanged => "settings_changed",
            Action::MarkWatched { .. } => "mark_watched",
            Action::ManualRating { .. } => "manual_rating",
            Action::ManualSync { .. } => "manual_sync",
            Action::ShowSettings => "show_settings",
            Action::ScanStarted => "scan_started",
        }
    }
}
