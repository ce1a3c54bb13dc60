//! The remote tracking service as seen by the dispatcher and the sync engine.

mod trakt;

pub use trakt::TraktClient;

use serde::Serialize;

use crate::error::ServiceResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trakt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvdb: Option<u64>,
}

impl RemoteIds {
    pub fn is_empty(&self) -> bool {
        self.trakt.is_none()
            && self.slug.is_none()
            && self.imdb.is_none()
            && self.tmdb.is_none()
            && self.tvdb.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieRecord {
    pub title: String,
    pub year: Option<u32>,
    pub ids: RemoteIds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRecord {
    pub show_title: String,
    pub show_year: Option<u32>,
    pub show_ids: RemoteIds,
    pub season: u32,
    pub episode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rated<T> {
    pub item: T,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieSummary {
    pub title: String,
    pub year: Option<u32>,
    pub ids: RemoteIds,
    pub watched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeSummary {
    pub show_title: String,
    pub show_year: Option<u32>,
    pub show_ids: RemoteIds,
    pub season: u32,
    pub episode: u32,
    pub title: String,
    pub watched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonEpisode {
    pub season: u32,
    pub episode: u32,
    pub watched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonInfo {
    pub show_ids: RemoteIds,
    pub number: u32,
    pub episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowSummary {
    pub title: String,
    pub year: Option<u32>,
    pub ids: RemoteIds,
    /// Only filled for extended lookups.
    pub seasons: Vec<SeasonInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenMovie {
    pub imdb_id: String,
    pub title: String,
    pub year: Option<u32>,
    pub plays: u32,
    pub last_played: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeenMovieBatch {
    pub movies: Vec<SeenMovie>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpisodeRef {
    pub season: u32,
    pub episode: u32,
}

/// Episodes of one show to be marked seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenEpisodeBatch {
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<u64>,
    pub title: String,
    pub year: Option<u32>,
    pub episodes: Vec<EpisodeRef>,
}

/// Item reference for scrobbles and ratings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Movie {
        title: String,
        year: Option<u32>,
        ids: RemoteIds,
    },
    Show {
        title: String,
        year: Option<u32>,
        ids: RemoteIds,
    },
    Episode {
        show_title: String,
        show_year: Option<u32>,
        show_ids: RemoteIds,
        season: u32,
        episode: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrobbleVerb {
    Start,
    Pause,
    Stop,
    /// Playback ended below the completion threshold.
    Cancel,
}

impl ScrobbleVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrobbleVerb::Start => "start",
            ScrobbleVerb::Pause => "pause",
            ScrobbleVerb::Stop => "stop",
            ScrobbleVerb::Cancel => "cancel",
        }
    }
}

pub trait RemoteApi: Send + Sync {
    /// Exchanges a PIN for an access token and keeps it for later calls.
    fn authenticate(&self, pin: &str) -> ServiceResult<String>;
    /// Re-reads credentials after a settings change.
    fn reload_settings(&self) -> ServiceResult<()>;

    fn get_movie_summary(&self, id: &str) -> ServiceResult<Option<MovieSummary>>;
    fn get_episode_summary(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> ServiceResult<Option<EpisodeSummary>>;
    fn get_show_summary(&self, id: &str, extended: bool) -> ServiceResult<Option<ShowSummary>>;
    fn get_season_info(&self, id: &str, season: u32) -> ServiceResult<Option<SeasonInfo>>;

    fn update_seen_movie(&self, batch: &SeenMovieBatch) -> ServiceResult<()>;
    fn update_seen_episode(&self, batch: &SeenEpisodeBatch) -> ServiceResult<()>;
    /// Several shows in one request.
    fn update_seen_shows(&self, batches: &[SeenEpisodeBatch]) -> ServiceResult<()>;

    fn scrobble(&self, verb: ScrobbleVerb, item: &MediaRef, progress: f64) -> ServiceResult<()>;

    fn add_ratings(&self, ratings: &[Rated<MediaRef>]) -> ServiceResult<()>;
    fn remove_ratings(&self, items: &[MediaRef]) -> ServiceResult<()>;

    fn watched_movies(&self) -> ServiceResult<Vec<MovieRecord>>;
    fn watched_episodes(&self) -> ServiceResult<Vec<EpisodeRecord>>;
    fn rated_movies(&self) -> ServiceResult<Vec<Rated<MovieRecord>>>;
    fn rated_episodes(&self) -> ServiceResult<Vec<Rated<EpisodeRecord>>>;
}
