use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::action::{MediaIdentity, MediaKind, MultiEpisode};
use super::host::{Host, PlaybackPosition};
use super::settings::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::remote::{EpisodeRef, MediaRef, RemoteApi, RemoteIds, ScrobbleVerb, SeenEpisodeBatch};

/// The remote "watching" status expires, so it is re-sent this often.
pub const WATCHING_REFRESH: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrobbleConfig {
    /// Percent watched at which a playback counts as complete.
    pub threshold: f64,
    pub scrobble_movie: bool,
    pub scrobble_episode: bool,
}

impl From<&Settings> for ScrobbleConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            threshold: settings.scrobble_threshold,
            scrobble_movie: settings.scrobble_movie,
            scrobble_episode: settings.scrobble_episode,
        }
    }
}

#[derive(Debug, Clone)]
struct PlaybackState {
    identity: MediaIdentity,
    target: MediaRef,
    /// Other catalog episodes contained in the playing file.
    extra_episodes: Vec<EpisodeRef>,
    position: PlaybackPosition,
    last_signal: Instant,
    report: bool,
}

impl PlaybackState {
    fn progress(&self) -> f64 {
        self.position.percent()
    }
}

/// Tracks one playback at a time and mirrors it to the remote service.
pub struct ScrobbleSession {
    host: Arc<dyn Host>,
    remote: Arc<dyn RemoteApi>,
    config: ScrobbleConfig,
    phase: SessionPhase,
    playback: Option<PlaybackState>,
}

impl ScrobbleSession {
    pub fn new(host: Arc<dyn Host>, remote: Arc<dyn RemoteApi>, config: ScrobbleConfig) -> Self {
        Self {
            host,
            remote,
            config,
            phase: SessionPhase::Idle,
            playback: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn identity(&self) -> Option<&MediaIdentity> {
        self.playback.as_ref().map(|playback| &playback.identity)
    }

    pub fn set_config(&mut self, config: ScrobbleConfig) {
        self.config = config;
    }

    pub fn playback_started(
        &mut self,
        identity: MediaIdentity,
        multi_episode: Option<MultiEpisode>,
        playlist_index: Option<i64>,
    ) -> ServiceResult<()> {
        if self.phase != SessionPhase::Idle {
            debug!("new playback while another is tracked, ending the previous one");
            if let Err(err) = self.playback_ended() {
                warn!(error = %err, "failed to close previous playback");
            }
        }

        let target = self.resolve_target(&identity)?;
        let extra_episodes = match (&identity, &multi_episode) {
            (MediaIdentity::LibraryEpisode { library_id }, Some(multi)) => {
                self.resolve_extra_episodes(*library_id, multi)
            }
            _ => Vec::new(),
        };
        let report = match identity.kind() {
            MediaKind::Movie => self.config.scrobble_movie,
            _ => self.config.scrobble_episode,
        };
        let position = self.host.playback_position().unwrap_or_default();

        info!(
            kind = %identity.kind(),
            library_id = ?identity.library_id(),
            ?playlist_index,
            "tracking playback"
        );
        self.playback = Some(PlaybackState {
            identity,
            target,
            extra_episodes,
            position,
            last_signal: Instant::now(),
            report,
        });
        self.phase = SessionPhase::Playing;
        self.signal(ScrobbleVerb::Start)
    }

    /// Handles both `ended` and `stopped`.
    pub fn playback_ended(&mut self) -> ServiceResult<()> {
        self.phase = SessionPhase::Idle;
        let Some(playback) = self.playback.take() else {
            debug!("playback ended without a tracked item");
            return Ok(());
        };
        if !playback.report {
            return Ok(());
        }

        let progress = playback.progress();
        let complete = progress >= self.config.threshold;
        let verb = if complete {
            ScrobbleVerb::Stop
        } else {
            ScrobbleVerb::Cancel
        };
        info!(progress, verb = verb.as_str(), "playback finished");
        self.remote.scrobble(verb, &playback.target, progress)?;

        if complete && !playback.extra_episodes.is_empty() {
            self.mark_extra_episodes(&playback)?;
        }
        Ok(())
    }

    pub fn playback_paused(&mut self) -> ServiceResult<()> {
        if self.phase != SessionPhase::Playing {
            debug!(phase = ?self.phase, "ignoring pause");
            return Ok(());
        }
        self.refresh_position();
        self.phase = SessionPhase::Paused;
        self.signal(ScrobbleVerb::Pause)
    }

    pub fn playback_resumed(&mut self) -> ServiceResult<()> {
        if self.phase != SessionPhase::Paused {
            debug!(phase = ?self.phase, "ignoring resume");
            return Ok(());
        }
        self.refresh_position();
        self.phase = SessionPhase::Playing;
        self.signal(ScrobbleVerb::Start)
    }

    pub fn playback_seek(&mut self) {
        if self.phase != SessionPhase::Idle {
            self.refresh_position();
        }
    }

    /// Periodic progress poll while a video is playing.
    pub fn update(&mut self) -> ServiceResult<()> {
        self.update_at(Instant::now())
    }

    pub(crate) fn update_at(&mut self, now: Instant) -> ServiceResult<()> {
        if self.phase != SessionPhase::Playing {
            return Ok(());
        }
        self.refresh_position();
        let due = self
            .playback
            .as_ref()
            .is_some_and(|playback| now.duration_since(playback.last_signal) >= WATCHING_REFRESH);
        if due {
            debug!("refreshing watching status");
            self.signal_at(ScrobbleVerb::Start, now)?;
        }
        Ok(())
    }

    fn signal(&mut self, verb: ScrobbleVerb) -> ServiceResult<()> {
        self.signal_at(verb, Instant::now())
    }

    fn signal_at(&mut self, verb: ScrobbleVerb, now: Instant) -> ServiceResult<()> {
        let Some(playback) = self.playback.as_mut() else {
            return Ok(());
        };
        playback.last_signal = now;
        if !playback.report {
            return Ok(());
        }
        self.remote
            .scrobble(verb, &playback.target, playback.progress())
    }

    fn refresh_position(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        match self.host.playback_position() {
            Ok(position) if position.total_secs > 0.0 => playback.position = position,
            Ok(_) => {}
            Err(err) => debug!(error = %err, "could not read playback position"),
        }
    }

    fn resolve_target(&self, identity: &MediaIdentity) -> ServiceResult<MediaRef> {
        match identity {
            MediaIdentity::LibraryMovie { library_id } => {
                let movie = self.host.movie(*library_id)?.ok_or_else(|| {
                    ServiceError::StaleIdentity(format!("movie {library_id}"))
                })?;
                Ok(MediaRef::Movie {
                    title: movie.title,
                    year: movie.year,
                    ids: RemoteIds {
                        imdb: movie.imdb_id,
                        ..RemoteIds::default()
                    },
                })
            }
            MediaIdentity::LibraryEpisode { library_id } => {
                let episode = self.host.episode(*library_id)?.ok_or_else(|| {
                    ServiceError::StaleIdentity(format!("episode {library_id}"))
                })?;
                Ok(MediaRef::Episode {
                    show_title: episode.show_title,
                    show_year: episode.show_year,
                    show_ids: RemoteIds {
                        imdb: episode.show_imdb,
                        tvdb: episode.show_tvdb,
                        ..RemoteIds::default()
                    },
                    season: episode.season,
                    episode: episode.episode,
                })
            }
            MediaIdentity::AdHocMovie { title, year } => Ok(MediaRef::Movie {
                title: title.clone(),
                year: Some(*year),
                ids: RemoteIds::default(),
            }),
            MediaIdentity::AdHocEpisode {
                show_title,
                season,
                episode,
                year,
                ..
            } => Ok(MediaRef::Episode {
                show_title: show_title.clone(),
                show_year: *year,
                show_ids: RemoteIds::default(),
                season: *season,
                episode: *episode,
            }),
        }
    }

    fn resolve_extra_episodes(&self, playing_id: i64, multi: &MultiEpisode) -> Vec<EpisodeRef> {
        let mut extra = Vec::new();
        for id in multi.ids.iter().copied().filter(|id| *id != playing_id) {
            match self.host.episode(id) {
                Ok(Some(episode)) => extra.push(EpisodeRef {
                    season: episode.season,
                    episode: episode.episode,
                }),
                Ok(None) => debug!(library_id = id, "multi-part episode no longer in library"),
                Err(err) => warn!(library_id = id, error = %err, "failed to read multi-part episode"),
            }
        }
        extra
    }

    fn mark_extra_episodes(&self, playback: &PlaybackState) -> ServiceResult<()> {
        let MediaRef::Episode {
            show_title,
            show_year,
            show_ids,
            ..
        } = &playback.target
        else {
            return Ok(());
        };
        debug!(count = playback.extra_episodes.len(), "marking other parts of multi-part episode");
        self.remote.update_seen_episode(&SeenEpisodeBatch {
            imdb_id: show_ids.imdb.clone(),
            tvdb_id: show_ids.tvdb,
            title: show_title.clone(),
            year: *show_year,
            episodes: playback.extra_episodes.clone(),
        })
    }
}
