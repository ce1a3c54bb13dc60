//! The media-player host as seen by the service.
//!
//! The host delivers lifecycle callbacks through [`PlayerObserver`] and
//! answers queries through [`Player`], [`Library`] and [`Notifier`].

use std::time::Duration;

use serde_json::Value;

use super::action::MediaKind;
use crate::error::ServiceResult;

pub const NOTIFICATION_SHORT: Duration = Duration::from_secs(3);
pub const NOTIFICATION_LONG: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayingItem {
    /// Host item type: `movie`, `episode`, `unknown`, ...
    pub kind: String,
    pub library_id: Option<i64>,
}

/// On-screen metadata of the playing file. Empty string means absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLabels {
    pub title: String,
    pub show_title: String,
    pub season: String,
    pub episode: String,
    pub year: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeDetails {
    pub tvshow_id: i64,
    pub season: u32,
    pub episode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonEpisodeFile {
    pub episode_id: i64,
    pub episode: u32,
    pub file: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackPosition {
    pub time_secs: f64,
    pub total_secs: f64,
}

impl PlaybackPosition {
    pub fn percent(&self) -> f64 {
        if self.total_secs <= 0.0 {
            return 0.0;
        }
        (self.time_secs / self.total_secs * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryMovie {
    pub library_id: i64,
    pub title: String,
    pub year: Option<u32>,
    pub imdb_id: Option<String>,
    pub playcount: u32,
    /// 0 when unrated.
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEpisode {
    pub library_id: i64,
    pub show_title: String,
    pub show_year: Option<u32>,
    pub show_imdb: Option<String>,
    pub show_tvdb: Option<u64>,
    pub season: u32,
    pub episode: u32,
    pub title: String,
    pub playcount: u32,
    pub rating: u8,
}

pub trait Player {
    fn is_playing_video(&self) -> bool;
    fn playing_item(&self) -> ServiceResult<PlayingItem>;
    fn playing_file(&self) -> ServiceResult<String>;
    fn info_labels(&self) -> ServiceResult<InfoLabels>;
    fn playlist_size(&self) -> usize;
    fn playlist_position(&self) -> Option<i64>;
    fn playback_position(&self) -> ServiceResult<PlaybackPosition>;
}

pub trait Library {
    fn episode_details(&self, episode_id: i64) -> ServiceResult<Option<EpisodeDetails>>;
    /// Episodes of one season, sorted by episode number.
    fn season_episodes(&self, tvshow_id: i64, season: u32)
    -> ServiceResult<Vec<SeasonEpisodeFile>>;
    fn movie(&self, library_id: i64) -> ServiceResult<Option<LibraryMovie>>;
    fn episode(&self, library_id: i64) -> ServiceResult<Option<LibraryEpisode>>;
    fn movies(&self) -> ServiceResult<Vec<LibraryMovie>>;
    fn episodes(&self) -> ServiceResult<Vec<LibraryEpisode>>;
    /// Marks all ids watched in one host request.
    fn set_watched(&self, kind: MediaKind, ids: &[i64]) -> ServiceResult<()>;
    /// Applies all ratings in one host request.
    fn set_ratings(&self, kind: MediaKind, ratings: &[(i64, u8)]) -> ServiceResult<()>;
}

pub trait Notifier {
    /// Fire and forget.
    fn notify(&self, title: &str, message: &str, duration: Duration);
    fn open_settings(&self) -> ServiceResult<()>;
    fn prompt_rating(&self, _item_name: &str) -> Option<u8> {
        None
    }
}

pub trait Host: Player + Library + Notifier + Send + Sync {}

impl<T> Host for T where T: Player + Library + Notifier + Send + Sync {}

/// Lifecycle callbacks delivered by the host's event source.
///
/// Implementations must return quickly: the host invokes them on its own
/// thread.
pub trait PlayerObserver {
    fn on_playback_started(&mut self);
    fn on_playback_ended(&mut self);
    fn on_playback_stopped(&mut self);
    fn on_playback_paused(&mut self);
    fn on_playback_resumed(&mut self);
    fn on_playback_seek(&mut self, time: f64, offset: f64);
    fn on_playback_seek_chapter(&mut self, chapter: i64);
    fn on_queue_next_item(&mut self) {}
    fn on_playback_speed_changed(&mut self, _speed: f64) {}
    fn on_database_updated(&mut self, database: &str);
    fn on_database_scan_started(&mut self, database: &str);
    fn on_settings_changed(&mut self);
    fn on_notification(&mut self, sender: &str, method: &str, data: &Value);
}
