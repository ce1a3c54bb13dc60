use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::action::{Action, MediaIdentity, MultiEpisode};
use super::host::{Host, InfoLabels, PlayerObserver, SeasonEpisodeFile};
use super::queue::DurableQueue;
use super::settings::{Settings, SettingsStore};
use super::title::parse_episode_title;
use crate::error::ServiceResult;

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Turns raw host callbacks into queued [`Action`]s.
///
/// Runs on the host's callback thread, so it only talks to the host and the
/// queue and never to the remote service.
pub struct EventNormalizer {
    host: Arc<dyn Host>,
    queue: DurableQueue,
    settings: SettingsStore,
    settle_delay: Duration,
    playing: bool,
    playlist_index: Option<i64>,
    scanning_video: bool,
}

impl EventNormalizer {
    pub fn new(host: Arc<dyn Host>, queue: DurableQueue, settings: SettingsStore) -> Self {
        Self {
            host,
            queue,
            settings,
            settle_delay: DEFAULT_SETTLE_DELAY,
            playing: false,
            playlist_index: None,
            scanning_video: false,
        }
    }

    /// The host needs a moment after play-start before item queries are
    /// reliable.
    #[cfg(test)]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[cfg(test)]
    pub fn is_tracking(&self) -> bool {
        self.playing
    }

    fn dispatch(&self, action: Action) {
        if let Err(err) = self.queue.push(&action) {
            error!(kind = action.kind(), error = %err, "failed to queue action");
        }
    }

    fn identify_playing(&self) -> Option<(MediaIdentity, Option<MultiEpisode>)> {
        let item = match self.host.playing_item() {
            Ok(item) => item,
            Err(err) => {
                debug!(error = %err, "could not read playing item");
                return None;
            }
        };

        let file = match self.host.playing_file() {
            Ok(file) => file,
            Err(_) => {
                debug!("failed to read playing filename, player already stopped");
                return None;
            }
        };

        let exclusions = match Settings::load(&self.settings) {
            Ok(settings) => settings.exclusions,
            Err(err) => {
                warn!(error = %err, "failed to load settings, using default exclusions");
                Settings::default().exclusions
            }
        };
        if exclusions.is_excluded(&file) {
            debug!(file = %file, "playing file is excluded, ignoring");
            return None;
        }

        match (item.kind.as_str(), item.library_id) {
            ("movie", Some(library_id)) => {
                debug!(library_id, "playing library movie");
                Some((MediaIdentity::LibraryMovie { library_id }, None))
            }
            ("episode", Some(library_id)) => {
                let multi = match detect_multi_episode(self.host.as_ref(), library_id) {
                    Ok(multi) => multi,
                    Err(err) => {
                        warn!(library_id, error = %err, "multi-part check failed, treating as single episode");
                        None
                    }
                };
                match &multi {
                    Some(multi) => debug!(ids = ?multi.ids, count = multi.count, "episode is part of a multi-part file"),
                    None => debug!(library_id, "playing single library episode"),
                }
                Some((MediaIdentity::LibraryEpisode { library_id }, multi))
            }
            (kind, library_id) if kind == "unknown" || library_id.is_none() => {
                let labels = match self.host.info_labels() {
                    Ok(labels) => labels,
                    Err(err) => {
                        debug!(error = %err, "could not read info labels");
                        return None;
                    }
                };
                debug!(
                    show_title = %labels.show_title,
                    year = %labels.year,
                    season = %labels.season,
                    episode = %labels.episode,
                    "non-library file, checking available data"
                );
                match classify_adhoc(&labels) {
                    Some(identity) => Some((identity, None)),
                    None => {
                        debug!("non-library file without enough data to scrobble, skipping");
                        None
                    }
                }
            }
            (kind, _) => {
                debug!(kind, "unrecognized video type, skipping");
                None
            }
        }
    }
}

impl PlayerObserver for EventNormalizer {
    fn on_playback_started(&mut self) {
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
        if !self.host.is_playing_video() {
            return;
        }

        let Some((identity, multi_episode)) = self.identify_playing() else {
            return;
        };

        if self.host.playlist_size() > 1 {
            let position = self.host.playlist_position();
            if self.playlist_index.is_some() {
                info!("playlist skipped to another item, forcing playback ended");
                self.on_playback_ended();
            }
            self.playlist_index = position;
        }

        self.playing = true;
        self.dispatch(Action::Started {
            identity,
            multi_episode,
            playlist_index: self.playlist_index,
        });
    }

    fn on_playback_ended(&mut self) {
        if self.playing {
            self.playing = false;
            self.playlist_index = None;
            self.dispatch(Action::Ended);
        }
    }

    fn on_playback_stopped(&mut self) {
        if self.playing {
            self.playing = false;
            self.playlist_index = None;
            self.dispatch(Action::Stopped);
        }
    }

    fn on_playback_paused(&mut self) {
        if self.playing {
            self.dispatch(Action::Paused);
        }
    }

    fn on_playback_resumed(&mut self) {
        if self.playing {
            self.dispatch(Action::Resumed);
        }
    }

    fn on_playback_seek(&mut self, time: f64, offset: f64) {
        if self.playing {
            self.dispatch(Action::Seek { time, offset });
        }
    }

    fn on_playback_seek_chapter(&mut self, chapter: i64) {
        if self.playing {
            self.dispatch(Action::SeekChapter { chapter });
        }
    }

    fn on_queue_next_item(&mut self) {
        if self.playing {
            debug!("next playlist item queued");
        }
    }

    fn on_playback_speed_changed(&mut self, speed: f64) {
        if self.playing {
            debug!(speed, "playback speed changed");
        }
    }

    fn on_database_updated(&mut self, database: &str) {
        if database == "video" {
            self.scanning_video = false;
            self.dispatch(Action::DatabaseUpdated);
        }
    }

    fn on_database_scan_started(&mut self, database: &str) {
        if database == "video" {
            self.scanning_video = true;
            self.dispatch(Action::ScanStarted);
        }
    }

    fn on_settings_changed(&mut self) {
        self.dispatch(Action::SettingsChanged);
    }

    fn on_notification(&mut self, sender: &str, method: &str, _data: &Value) {
        // Cleans that run as part of a library update are not reported.
        if method == "VideoLibrary.OnCleanFinished" && !self.scanning_video {
            debug!(sender, "video library cleaned");
            self.dispatch(Action::DatabaseCleaned);
        }
    }
}

/// Classifies a non-library file from its on-screen metadata.
pub fn classify_adhoc(labels: &InfoLabels) -> Option<MediaIdentity> {
    let season = labels.season.trim();
    let episode = labels.episode.trim();
    let show_title = labels.show_title.trim();
    let year = labels.year.trim();

    if !season.is_empty() && !episode.is_empty() && !show_title.is_empty() {
        return Some(MediaIdentity::AdHocEpisode {
            show_title: show_title.to_string(),
            title: labels.title.trim().to_string(),
            season: season.parse().ok()?,
            episode: episode.parse().ok()?,
            year: parse_year(year),
        });
    }

    if !year.is_empty() && season.is_empty() && show_title.is_empty() {
        return Some(MediaIdentity::AdHocMovie {
            title: labels.title.trim().to_string(),
            year: parse_year(year)?,
        });
    }

    if !show_title.is_empty() {
        let parsed = parse_episode_title(show_title)?;
        return Some(MediaIdentity::AdHocEpisode {
            show_title: parsed.title.clone(),
            title: parsed.title,
            season: parsed.season,
            episode: parsed.episode,
            year: None,
        });
    }

    None
}

fn parse_year(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Collects the run of same-season episodes, starting at `episode_id`, that
/// share its file. Returns `None` for a single-episode file.
pub fn detect_multi_episode(
    host: &dyn Host,
    episode_id: i64,
) -> ServiceResult<Option<MultiEpisode>> {
    let Some(details) = host.episode_details(episode_id)? else {
        return Ok(None);
    };
    let episodes = host.season_episodes(details.tvshow_id, details.season)?;
    Ok(multi_episode_run(&episodes, episode_id, details.episode))
}

pub fn multi_episode_run(
    episodes: &[SeasonEpisodeFile],
    episode_id: i64,
    episode_number: u32,
) -> Option<MultiEpisode> {
    let start = episodes
        .iter()
        .position(|ep| ep.episode_id == episode_id)
        .or_else(|| episodes.iter().position(|ep| ep.episode == episode_number))?;
    let file = &episodes[start].file;
    let ids: Vec<i64> = episodes[start..]
        .iter()
        .take_while(|ep| &ep.file == file)
        .map(|ep| ep.episode_id)
        .collect();
    (ids.len() > 1).then(|| MultiEpisode::new(ids))
}
