use tracing::{debug, info, warn};

use super::action::{MediaKind, RatingAction, RatingRequest};
use super::host::{Host, NOTIFICATION_SHORT};
use super::mark_watched::{format_episode_name, format_movie_name};
use crate::error::{ServiceError, ServiceResult};
use crate::remote::{MediaRef, RemoteApi, Rated};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingOutcome {
    NotFound,
    /// No rating was given, nothing was sent.
    Skipped,
    Rated(u8),
    Unrated,
}

pub fn manual_rating(
    host: &dyn Host,
    remote: &dyn RemoteApi,
    request: &RatingRequest,
) -> ServiceResult<RatingOutcome> {
    let Some((item, name)) = lookup(remote, request)? else {
        debug!(id = %request.remote_id, kind = %request.media_type, "nothing to rate, item not found remotely");
        return Ok(RatingOutcome::NotFound);
    };

    match request.action {
        RatingAction::Unrate => {
            remote.remove_ratings(std::slice::from_ref(&item))?;
            info!(item = %name, "rating removed");
            apply_local_rating(host, request, 0);
            host.notify("Rating removed", &name, NOTIFICATION_SHORT);
            Ok(RatingOutcome::Unrated)
        }
        RatingAction::Rate => {
            let Some(rating) = request.rating.or_else(|| host.prompt_rating(&name)) else {
                debug!(item = %name, "no rating chosen");
                return Ok(RatingOutcome::Skipped);
            };
            if !(1..=10).contains(&rating) {
                return Err(ServiceError::MalformedAction(format!(
                    "rating {rating} is outside 1..=10"
                )));
            }
            remote.add_ratings(&[Rated { item, rating }])?;
            info!(item = %name, rating, "rated");
            apply_local_rating(host, request, rating);
            host.notify("Rated", &format!("{name}: {rating}/10"), NOTIFICATION_SHORT);
            Ok(RatingOutcome::Rated(rating))
        }
    }
}

fn lookup(
    remote: &dyn RemoteApi,
    request: &RatingRequest,
) -> ServiceResult<Option<(MediaRef, String)>> {
    let id = request.remote_id.as_str();
    match request.media_type {
        MediaKind::Movie => Ok(remote.get_movie_summary(id)?.map(|movie| {
            let name = format_movie_name(&movie.title, movie.year);
            (
                MediaRef::Movie {
                    title: movie.title,
                    year: movie.year,
                    ids: movie.ids,
                },
                name,
            )
        })),
        MediaKind::Show => Ok(remote.get_show_summary(id, false)?.map(|show| {
            let name = show.title.clone();
            (
                MediaRef::Show {
                    title: show.title,
                    year: show.year,
                    ids: show.ids,
                },
                name,
            )
        })),
        MediaKind::Episode => {
            let (Some(season), Some(episode)) = (request.season, request.episode) else {
                return Err(ServiceError::MalformedAction(
                    "episode rating needs season and episode".to_string(),
                ));
            };
            Ok(remote
                .get_episode_summary(id, season, episode)?
                .map(|summary| {
                    let name = format_episode_name(
                        &summary.show_title,
                        summary.season,
                        summary.episode,
                        &summary.title,
                    );
                    (
                        MediaRef::Episode {
                            show_title: summary.show_title,
                            show_year: summary.show_year,
                            show_ids: summary.show_ids,
                            season: summary.season,
                            episode: summary.episode,
                        },
                        name,
                    )
                }))
        }
        MediaKind::Season => Err(ServiceError::MalformedAction(
            "seasons cannot be rated".to_string(),
        )),
    }
}

/// Mirrors the rating onto the local library item, if there is one.
fn apply_local_rating(host: &dyn Host, request: &RatingRequest, rating: u8) {
    let Some(library_id) = request.library_id else {
        return;
    };
    if !matches!(request.media_type, MediaKind::Movie | MediaKind::Episode) {
        return;
    }
    if let Err(err) = host.set_ratings(request.media_type, &[(library_id, rating)]) {
        warn!(library_id, error = %err, "failed to update local rating");
    }
}
