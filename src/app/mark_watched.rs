use chrono::Utc;
use tracing::{debug, error, info};

use super::action::MarkWatchedRequest;
use super::host::{Host, NOTIFICATION_LONG};
use crate::error::ServiceResult;
use crate::remote::{
    EpisodeRef, RemoteApi, RemoteIds, SeenEpisodeBatch, SeenMovie, SeenMovieBatch,
};

const MARKED_TITLE: &str = "Marked as watched";
const MARK_FAILED_TITLE: &str = "Failed to mark as watched";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    NotFound,
    AlreadyWatched,
    /// Aggregate request where every requested episode was already watched.
    NothingToMark,
    Marked(usize),
    /// The update call failed; the user has been told.
    Failed,
}

/// Marks a movie, an episode, or a subset of a season or show as watched on
/// the remote service, skipping anything already watched there.
pub fn mark_watched(
    remote: &dyn RemoteApi,
    host: &dyn Host,
    request: &MarkWatchedRequest,
    show_notification: bool,
) -> ServiceResult<MarkOutcome> {
    let pending = match request {
        MarkWatchedRequest::Movie { id } => {
            let Some(summary) = remote.get_movie_summary(id)? else {
                debug!(id = %id, "movie not found remotely");
                return Ok(MarkOutcome::NotFound);
            };
            if summary.watched {
                debug!(title = %summary.title, "movie already watched remotely");
                return Ok(MarkOutcome::AlreadyWatched);
            }
            let name = format_movie_name(&summary.title, summary.year);
            let batch = SeenMovieBatch {
                movies: vec![SeenMovie {
                    imdb_id: id.clone(),
                    title: summary.title,
                    year: summary.year,
                    plays: 1,
                    last_played: Utc::now().timestamp(),
                }],
            };
            Pending {
                message: name,
                count: 1,
                update: Update::Movie(batch),
            }
        }
        MarkWatchedRequest::Episode {
            id,
            season,
            episode,
        } => {
            let Some(summary) = remote.get_episode_summary(id, *season, *episode)? else {
                debug!(id = %id, season, episode, "episode not found remotely");
                return Ok(MarkOutcome::NotFound);
            };
            if summary.watched {
                debug!(show = %summary.show_title, season, episode, "episode already watched remotely");
                return Ok(MarkOutcome::AlreadyWatched);
            }
            let name = format_episode_name(&summary.show_title, *season, *episode, &summary.title);
            Pending {
                message: name,
                count: 1,
                update: Update::Episodes(episode_batch(
                    &summary.show_ids,
                    &summary.show_title,
                    summary.show_year,
                    vec![EpisodeRef {
                        season: *season,
                        episode: *episode,
                    }],
                )),
            }
        }
        MarkWatchedRequest::Season {
            id,
            season,
            episodes,
        } => {
            let Some(show) = remote.get_show_summary(id, false)? else {
                return Ok(MarkOutcome::NotFound);
            };
            let Some(info) = remote.get_season_info(id, *season)? else {
                return Ok(MarkOutcome::NotFound);
            };
            let refs: Vec<EpisodeRef> = info
                .episodes
                .iter()
                .filter(|ep| episodes.contains(&ep.episode) && !ep.watched)
                .map(|ep| EpisodeRef {
                    season: ep.season,
                    episode: ep.episode,
                })
                .collect();
            let name = format!("{} - Season {season}", show.title);
            debug!(show = %show.title, season, count = refs.len(), "season episodes to mark");
            if refs.is_empty() {
                return Ok(MarkOutcome::NothingToMark);
            }
            let ids = if info.show_ids.is_empty() {
                &show.ids
            } else {
                &info.show_ids
            };
            Pending {
                message: format!("{} episode(s) of {name}", refs.len()),
                count: refs.len(),
                update: Update::Episodes(episode_batch(ids, &show.title, show.year, refs)),
            }
        }
        MarkWatchedRequest::Show { id, seasons } => {
            let Some(show) = remote.get_show_summary(id, true)? else {
                return Ok(MarkOutcome::NotFound);
            };
            let refs: Vec<EpisodeRef> = show
                .seasons
                .iter()
                .filter_map(|season| {
                    seasons
                        .get(&season.number)
                        .map(|wanted| (season, wanted))
                })
                .flat_map(|(season, wanted)| {
                    season
                        .episodes
                        .iter()
                        .filter(move |ep| wanted.contains(&ep.episode) && !ep.watched)
                })
                .map(|ep| EpisodeRef {
                    season: ep.season,
                    episode: ep.episode,
                })
                .collect();
            debug!(show = %show.title, count = refs.len(), "show episodes to mark");
            if refs.is_empty() {
                return Ok(MarkOutcome::NothingToMark);
            }
            Pending {
                message: format!("{} episode(s) of {}", refs.len(), show.title),
                count: refs.len(),
                update: Update::Episodes(episode_batch(&show.ids, &show.title, show.year, refs)),
            }
        }
    };

    let result = match &pending.update {
        Update::Movie(batch) => remote.update_seen_movie(batch),
        Update::Episodes(batch) => remote.update_seen_episode(batch),
    };
    match result {
        Ok(()) => {
            info!(item = %pending.message, "marked as watched");
            if show_notification {
                host.notify(MARKED_TITLE, &pending.message, NOTIFICATION_LONG);
            }
            Ok(MarkOutcome::Marked(pending.count))
        }
        Err(err) => {
            error!(item = %pending.message, error = %err, "failed to mark as watched");
            host.notify(MARK_FAILED_TITLE, &pending.message, NOTIFICATION_LONG);
            Ok(MarkOutcome::Failed)
        }
    }
}

struct Pending {
    message: String,
    count: usize,
    update: Update,
}

enum Update {
    Movie(SeenMovieBatch),
    Episodes(SeenEpisodeBatch),
}

fn episode_batch(
    ids: &RemoteIds,
    title: &str,
    year: Option<u32>,
    episodes: Vec<EpisodeRef>,
) -> SeenEpisodeBatch {
    SeenEpisodeBatch {
        imdb_id: ids.imdb.clone(),
        tvdb_id: ids.tvdb,
        title: title.to_string(),
        year,
        episodes,
    }
}

pub fn format_movie_name(title: &str, year: Option<u32>) -> String {
    match year {
        Some(year) => format!("{title} ({year})"),
        None => title.to_string(),
    }
}

pub fn format_episode_name(show: &str, season: u32, episode: u32, title: &str) -> String {
    if title.trim().is_empty() {
        format!("{show} - S{season:02}E{episode:02}")
    } else {
        format!("{show} - S{season:02}E{episode:02} - {title}")
    }
}
