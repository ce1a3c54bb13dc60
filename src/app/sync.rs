//! Two-way reconciliation of watched state and ratings between the local
//! library and the remote service.
//!
//! A run loads both sides, builds a [`SyncPlan`] of deltas, and applies each
//! facet with a single batched call per direction. Nothing is ever removed:
//! items watched or rated on only one side are copied to the other, and
//! conflicting ratings are left alone.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{debug, info};

use super::action::{LibraryFilter, MediaKind};
use super::host::{Host, LibraryEpisode, LibraryMovie, NOTIFICATION_SHORT};
use crate::error::ServiceResult;
use crate::remote::{
    EpisodeRecord, EpisodeRef, MediaRef, MovieRecord, Rated, RemoteApi, RemoteIds,
    SeenEpisodeBatch, SeenMovie, SeenMovieBatch,
};

const SYNC_TITLE: &str = "Trakt sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub library: LibraryFilter,
    pub silent: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoviePlan {
    pub push_watched: Vec<SeenMovie>,
    pub pull_watched: Vec<i64>,
    pub push_ratings: Vec<Rated<MediaRef>>,
    pub pull_ratings: Vec<(i64, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodePlan {
    /// One batch per show.
    pub push_watched: Vec<SeenEpisodeBatch>,
    pub pull_watched: Vec<i64>,
    pub push_ratings: Vec<Rated<MediaRef>>,
    pub pull_ratings: Vec<(i64, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub movies: MoviePlan,
    pub episodes: EpisodePlan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed_watched: usize,
    pub pulled_watched: usize,
    pub pushed_ratings: usize,
    pub pulled_ratings: usize,
}

pub fn run_sync(
    host: &dyn Host,
    remote: &dyn RemoteApi,
    options: SyncOptions,
) -> ServiceResult<SyncReport> {
    info!(library = ?options.library, silent = options.silent, "sync started");
    let progress = |message: &str| {
        if !options.silent {
            host.notify(SYNC_TITLE, message, NOTIFICATION_SHORT);
        }
    };
    progress("Sync started");

    let mut plan = SyncPlan::default();
    if options.library.includes_movies() {
        progress("Comparing movies");
        let local = host.movies()?;
        let watched = remote.watched_movies()?;
        let rated = remote.rated_movies()?;
        plan.movies = build_movie_plan(&local, &watched, &rated, Utc::now().timestamp());
    }
    if options.library.includes_episodes() {
        progress("Comparing episodes");
        let local = host.episodes()?;
        let watched = remote.watched_episodes()?;
        let rated = remote.rated_episodes()?;
        plan.episodes = build_episode_plan(&local, &watched, &rated);
    }

    let report = apply_plan(host, remote, &plan)?;
    info!(?report, "sync finished");
    progress(&format!(
        "Sync finished: {} watched and {} ratings sent, {} watched and {} ratings received",
        report.pushed_watched, report.pushed_ratings, report.pulled_watched, report.pulled_ratings
    ));
    Ok(report)
}

pub fn apply_plan(
    host: &dyn Host,
    remote: &dyn RemoteApi,
    plan: &SyncPlan,
) -> ServiceResult<SyncReport> {
    let mut report = SyncReport::default();
    let movies = &plan.movies;
    let episodes = &plan.episodes;

    if !movies.push_watched.is_empty() {
        debug!(count = movies.push_watched.len(), "pushing watched movies");
        remote.update_seen_movie(&SeenMovieBatch {
            movies: movies.push_watched.clone(),
        })?;
        report.pushed_watched += movies.push_watched.len();
    }
    if !movies.pull_watched.is_empty() {
        debug!(count = movies.pull_watched.len(), "marking local movies watched");
        host.set_watched(MediaKind::Movie, &movies.pull_watched)?;
        report.pulled_watched += movies.pull_watched.len();
    }
    if !movies.push_ratings.is_empty() {
        remote.add_ratings(&movies.push_ratings)?;
        report.pushed_ratings += movies.push_ratings.len();
    }
    if !movies.pull_ratings.is_empty() {
        host.set_ratings(MediaKind::Movie, &movies.pull_ratings)?;
        report.pulled_ratings += movies.pull_ratings.len();
    }

    if !episodes.push_watched.is_empty() {
        debug!(shows = episodes.push_watched.len(), "pushing watched episodes");
        remote.update_seen_shows(&episodes.push_watched)?;
        report.pushed_watched += episodes
            .push_watched
            .iter()
            .map(|batch| batch.episodes.len())
            .sum::<usize>();
    }
    if !episodes.pull_watched.is_empty() {
        debug!(count = episodes.pull_watched.len(), "marking local episodes watched");
        host.set_watched(MediaKind::Episode, &episodes.pull_watched)?;
        report.pulled_watched += episodes.pull_watched.len();
    }
    if !episodes.push_ratings.is_empty() {
        remote.add_ratings(&episodes.push_ratings)?;
        report.pushed_ratings += episodes.push_ratings.len();
    }
    if !episodes.pull_ratings.is_empty() {
        host.set_ratings(MediaKind::Episode, &episodes.pull_ratings)?;
        report.pulled_ratings += episodes.pull_ratings.len();
    }
    Ok(report)
}

fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Provider ids of a movie or a show, as far as one side knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MatchIds {
    imdb: Option<String>,
    tvdb: Option<u64>,
}

impl MatchIds {
    fn new(imdb: Option<&str>, tvdb: Option<u64>) -> Self {
        Self {
            imdb: imdb
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            tvdb,
        }
    }

    /// `Some(true)` when every id type both sides carry agrees, `Some(false)`
    /// when one differs, `None` when no id type is on both sides.
    fn agrees_with(&self, other: &MatchIds) -> Option<bool> {
        let mut shared = false;
        if let (Some(ours), Some(theirs)) = (&self.imdb, &other.imdb) {
            if ours != theirs {
                return Some(false);
            }
            shared = true;
        }
        if let (Some(ours), Some(theirs)) = (self.tvdb, other.tvdb) {
            if ours != theirs {
                return Some(false);
            }
            shared = true;
        }
        shared.then_some(true)
    }

    fn keys(&self, suffix: &str) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(tvdb) = self.tvdb {
            keys.push(format!("tvdb:{tvdb}{suffix}"));
        }
        if let Some(imdb) = &self.imdb {
            keys.push(format!("imdb:{imdb}{suffix}"));
        }
        keys
    }
}

struct MatchKey {
    ids: MatchIds,
    id_keys: Vec<String>,
    title_key: Option<String>,
}

impl MatchKey {
    fn movie(title: &str, year: Option<u32>, imdb: Option<&str>) -> Self {
        let ids = MatchIds::new(imdb, None);
        let title = normalize_title(title);
        Self {
            id_keys: ids.keys(""),
            title_key: (!title.is_empty()).then(|| format!("{title}:{}", year.unwrap_or(0))),
            ids,
        }
    }

    fn episode(
        show_title: &str,
        imdb: Option<&str>,
        tvdb: Option<u64>,
        season: u32,
        episode: u32,
    ) -> Self {
        let ids = MatchIds::new(imdb, tvdb);
        let suffix = format!(":{season}x{episode}");
        let title = normalize_title(show_title);
        Self {
            id_keys: ids.keys(&suffix),
            title_key: (!title.is_empty()).then(|| format!("{title}{suffix}")),
            ids,
        }
    }

    fn is_empty(&self) -> bool {
        self.id_keys.is_empty() && self.title_key.is_none()
    }
}

/// Remote items indexed by id and by normalized title.
struct RemoteIndex<V> {
    entries: Vec<(MatchIds, V)>,
    by_id: HashMap<String, Vec<usize>>,
    by_title: HashMap<String, Vec<usize>>,
}

impl<V: Copy> RemoteIndex<V> {
    fn build(items: impl IntoIterator<Item = (MatchKey, V)>) -> Self {
        let mut index = Self {
            entries: Vec::new(),
            by_id: HashMap::new(),
            by_title: HashMap::new(),
        };
        for (key, value) in items {
            let slot = index.entries.len();
            for id_key in key.id_keys {
                index.by_id.entry(id_key).or_default().push(slot);
            }
            if let Some(title_key) = key.title_key {
                index.by_title.entry(title_key).or_default().push(slot);
            }
            index.entries.push((key.ids, value));
        }
        index
    }

    /// An id match wins. A title match only counts when the two sides share
    /// no id type, so same-titled items with different ids stay apart.
    fn find(&self, key: &MatchKey) -> Option<V> {
        let by_id = key
            .id_keys
            .iter()
            .filter_map(|id_key| self.by_id.get(id_key))
            .flatten()
            .find(|&&slot| self.entries[slot].0.agrees_with(&key.ids) == Some(true));
        let by_title = || {
            key.title_key
                .as_ref()
                .and_then(|title_key| self.by_title.get(title_key))
                .into_iter()
                .flatten()
                .find(|&&slot| self.entries[slot].0.agrees_with(&key.ids).is_none())
        };
        by_id.or_else(by_title).map(|&slot| self.entries[slot].1)
    }
}

fn local_movie_key(movie: &LibraryMovie) -> MatchKey {
    MatchKey::movie(&movie.title, movie.year, movie.imdb_id.as_deref())
}

fn remote_movie_key(movie: &MovieRecord) -> MatchKey {
    MatchKey::movie(&movie.title, movie.year, movie.ids.imdb.as_deref())
}

fn local_episode_key(episode: &LibraryEpisode) -> MatchKey {
    MatchKey::episode(
        &episode.show_title,
        episode.show_imdb.as_deref(),
        episode.show_tvdb,
        episode.season,
        episode.episode,
    )
}

fn remote_episode_key(episode: &EpisodeRecord) -> MatchKey {
    MatchKey::episode(
        &episode.show_title,
        episode.show_ids.imdb.as_deref(),
        episode.show_ids.tvdb,
        episode.season,
        episode.episode,
    )
}

fn local_movie_ref(movie: &LibraryMovie) -> MediaRef {
    MediaRef::Movie {
        title: movie.title.clone(),
        year: movie.year,
        ids: RemoteIds {
            imdb: movie.imdb_id.clone(),
            ..RemoteIds::default()
        },
    }
}

fn local_episode_ref(episode: &LibraryEpisode) -> MediaRef {
    MediaRef::Episode {
        show_title: episode.show_title.clone(),
        show_year: episode.show_year,
        show_ids: RemoteIds {
            imdb: episode.show_imdb.clone(),
            tvdb: episode.show_tvdb,
            ..RemoteIds::default()
        },
        season: episode.season,
        episode: episode.episode,
    }
}

pub fn build_movie_plan(
    local: &[LibraryMovie],
    watched: &[MovieRecord],
    rated: &[Rated<MovieRecord>],
    now: i64,
) -> MoviePlan {
    let remote_watched =
        RemoteIndex::build(watched.iter().map(|movie| (remote_movie_key(movie), ())));
    let remote_ratings = RemoteIndex::build(
        rated
            .iter()
            .map(|entry| (remote_movie_key(&entry.item), entry.rating)),
    );

    let mut plan = MoviePlan::default();
    for movie in local {
        let key = local_movie_key(movie);
        if key.is_empty() {
            continue;
        }
        let seen_remotely = remote_watched.find(&key).is_some();
        match (movie.playcount > 0, seen_remotely) {
            (true, false) => plan.push_watched.push(SeenMovie {
                imdb_id: movie.imdb_id.clone().unwrap_or_default(),
                title: movie.title.clone(),
                year: movie.year,
                plays: movie.playcount,
                last_played: now,
            }),
            (false, true) => plan.pull_watched.push(movie.library_id),
            _ => {}
        }

        match (movie.rating, remote_ratings.find(&key)) {
            (0, Some(rating)) => plan.pull_ratings.push((movie.library_id, rating)),
            (local_rating, None) if local_rating > 0 => plan.push_ratings.push(Rated {
                item: local_movie_ref(movie),
                rating: local_rating,
            }),
            _ => {}
        }
    }
    plan
}

pub fn build_episode_plan(
    local: &[LibraryEpisode],
    watched: &[EpisodeRecord],
    rated: &[Rated<EpisodeRecord>],
) -> EpisodePlan {
    let remote_watched = RemoteIndex::build(
        watched
            .iter()
            .map(|episode| (remote_episode_key(episode), ())),
    );
    let remote_ratings = RemoteIndex::build(
        rated
            .iter()
            .map(|entry| (remote_episode_key(&entry.item), entry.rating)),
    );

    let mut plan = EpisodePlan::default();
    // Keyed by show title and ids so each show becomes one batch.
    let mut unseen_by_show: BTreeMap<(String, Option<String>, Option<u64>), SeenEpisodeBatch> =
        BTreeMap::new();
    for episode in local {
        let key = local_episode_key(episode);
        if key.is_empty() {
            continue;
        }
        let seen_remotely = remote_watched.find(&key).is_some();
        match (episode.playcount > 0, seen_remotely) {
            (true, false) => {
                let show_key = (
                    episode.show_title.clone(),
                    episode.show_imdb.clone(),
                    episode.show_tvdb,
                );
                unseen_by_show
                    .entry(show_key)
                    .or_insert_with(|| SeenEpisodeBatch {
                        imdb_id: episode.show_imdb.clone(),
                        tvdb_id: episode.show_tvdb,
                        title: episode.show_title.clone(),
                        year: episode.show_year,
                        episodes: Vec::new(),
                    })
                    .episodes
                    .push(EpisodeRef {
                        season: episode.season,
                        episode: episode.episode,
                    });
            }
            (false, true) => plan.pull_watched.push(episode.library_id),
            _ => {}
        }

        match (episode.rating, remote_ratings.find(&key)) {
            (0, Some(rating)) => plan.pull_ratings.push((episode.library_id, rating)),
            (local_rating, None) if local_rating > 0 => plan.push_ratings.push(Rated {
                item: local_episode_ref(episode),
                rating: local_rating,
            }),
            _ => {}
        }
    }
    plan.push_watched = unseen_by_show.into_values().collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_movie(id: i64, title: &str, imdb: Option<&str>, playcount: u32, rating: u8) -> LibraryMovie {
        LibraryMovie {
            library_id: id,
            title: title.to_string(),
            year: Some(1995),
            imdb_id: imdb.map(str::to_string),
            playcount,
            rating,
        }
    }

    fn remote_movie(title: &str, imdb: Option<&str>) -> MovieRecord {
        MovieRecord {
            title: title.to_string(),
            year: Some(1995),
            ids: RemoteIds {
                imdb: imdb.map(str::to_string),
                ..RemoteIds::default()
            },
        }
    }

    fn local_episode(id: i64, season: u32, episode: u32, playcount: u32) -> LibraryEpisode {
        LibraryEpisode {
            library_id: id,
            show_title: "Dark".to_string(),
            show_year: Some(2017),
            show_imdb: None,
            show_tvdb: Some(334824),
            season,
            episode,
            title: String::new(),
            playcount,
            rating: 0,
        }
    }

    #[test]
    fn movies_are_matched_by_imdb_then_by_title_and_year() {
        let local = vec![
            local_movie(1, "Heat", Some("tt0113277"), 1, 0),
            local_movie(2, "Se7en", None, 0, 0),
            local_movie(3, "Casino", None, 2, 0),
        ];
        let watched = vec![
            remote_movie("Heat (renamed)", Some("tt0113277")),
            remote_movie("se7en", None),
        ];
        let plan = build_movie_plan(&local, &watched, &[], 1_700_000_000);

        assert_eq!(plan.pull_watched, vec![2]);
        assert_eq!(plan.push_watched.len(), 1);
        assert_eq!(plan.push_watched[0].title, "Casino");
        assert_eq!(plan.push_watched[0].plays, 2);
    }

    #[test]
    fn ratings_flow_only_to_the_side_without_one() {
        let local = vec![
            local_movie(1, "Heat", Some("tt0113277"), 0, 8),
            local_movie(2, "Casino", Some("tt0112641"), 0, 0),
            local_movie(3, "Ronin", Some("tt0122690"), 0, 6),
        ];
        let rated = vec![
            Rated {
                item: remote_movie("Casino", Some("tt0112641")),
                rating: 9,
            },
            Rated {
                item: remote_movie("Ronin", Some("tt0122690")),
                rating: 7,
            },
        ];
        let plan = build_movie_plan(&local, &[], &rated, 0);

        assert_eq!(plan.pull_ratings, vec![(2, 9)]);
        assert_eq!(plan.push_ratings.len(), 1);
        assert_eq!(plan.push_ratings[0].rating, 8);
    }

    #[test]
    fn unseen_episodes_are_grouped_into_one_batch_per_show() {
        let local = vec![
            local_episode(10, 1, 1, 1),
            local_episode(11, 1, 2, 1),
            local_episode(12, 1, 3, 0),
        ];
        let watched = vec![EpisodeRecord {
            show_title: "Dark".to_string(),
            show_year: Some(2017),
            show_ids: RemoteIds {
                tvdb: Some(334824),
                ..RemoteIds::default()
            },
            season: 1,
            episode: 3,
        }];
        let plan = build_episode_plan(&local, &watched, &[]);

        assert_eq!(plan.push_watched.len(), 1);
        assert_eq!(
            plan.push_watched[0].episodes,
            vec![
                EpisodeRef { season: 1, episode: 1 },
                EpisodeRef { season: 1, episode: 2 },
            ]
        );
        assert_eq!(plan.pull_watched, vec![12]);
    }

    fn remote_episode(title: &str, tvdb: Option<u64>, season: u32, episode: u32) -> EpisodeRecord {
        EpisodeRecord {
            show_title: title.to_string(),
            show_year: None,
            show_ids: RemoteIds {
                tvdb,
                ..RemoteIds::default()
            },
            season,
            episode,
        }
    }

    #[test]
    fn same_titled_shows_with_different_ids_do_not_match() {
        let mut unwatched = local_episode(50, 1, 1, 0);
        unwatched.show_title = "Doctor Who".to_string();
        unwatched.show_tvdb = Some(78804);
        let mut watched_locally = local_episode(51, 1, 2, 1);
        watched_locally.show_title = "Doctor Who".to_string();
        watched_locally.show_tvdb = Some(78804);
        let remote = vec![
            remote_episode("Doctor Who", Some(76107), 1, 1),
            remote_episode("Doctor Who", Some(76107), 1, 2),
        ];

        let plan = build_episode_plan(&[unwatched, watched_locally], &remote, &[]);

        assert!(plan.pull_watched.is_empty());
        assert_eq!(plan.push_watched.len(), 1);
        assert_eq!(
            plan.push_watched[0].episodes,
            vec![EpisodeRef { season: 1, episode: 2 }]
        );
    }

    #[test]
    fn show_title_is_used_when_ids_are_not_comparable() {
        let mut local = local_episode(60, 2, 4, 0);
        local.show_title = "The Office".to_string();
        local.show_tvdb = None;
        local.show_imdb = Some("tt0386676".to_string());
        let remote = vec![remote_episode("the office", Some(73244), 2, 4)];

        let plan = build_episode_plan(&[local], &remote, &[]);
        assert_eq!(plan.pull_watched, vec![60]);
    }

    #[test]
    fn same_titled_movies_with_different_imdb_ids_do_not_match() {
        let local = vec![local_movie(1, "Solaris", Some("tt0307479"), 0, 0)];
        let watched = vec![remote_movie("Solaris", Some("tt0069293"))];
        let rated = vec![Rated {
            item: remote_movie("Solaris", Some("tt0069293")),
            rating: 9,
        }];

        let plan = build_movie_plan(&local, &watched, &rated, 0);
        assert!(plan.pull_watched.is_empty());
        assert!(plan.pull_ratings.is_empty());
    }

    #[test]
    fn title_normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_title("Marvel's Agents of S.H.I.E.L.D."), "marvelsagentsofshield");
    }
}
