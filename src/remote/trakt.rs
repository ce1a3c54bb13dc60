use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::DateTime;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    EpisodeRecord, EpisodeSummary, MediaRef, MovieRecord, MovieSummary, Rated, RemoteApi,
    RemoteIds, ScrobbleVerb, SeasonEpisode, SeasonInfo, SeenEpisodeBatch, SeenMovieBatch,
    ShowSummary,
};
use crate::app::settings::{
    SettingsStore, TRAKT_ACCESS_TOKEN, TRAKT_CLIENT_ID, TRAKT_CLIENT_SECRET,
};
use crate::error::{ServiceError, ServiceResult};
use crate::http::{HttpError, HttpRequest, RetryPolicy, send_with_retries};

const TRAKT_API_URL: &str = "https://api.trakt.tv";
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraktCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: Option<String>,
}

impl TraktCredentials {
    pub fn load(settings: &SettingsStore) -> anyhow::Result<Self> {
        Ok(Self {
            client_id: settings.get_string(TRAKT_CLIENT_ID)?.unwrap_or_default(),
            client_secret: settings.get_string(TRAKT_CLIENT_SECRET)?.unwrap_or_default(),
            access_token: settings
                .get_string(TRAKT_ACCESS_TOKEN)?
                .filter(|token| !token.trim().is_empty()),
        })
    }
}

/// Trakt v2 client over blocking HTTP.
pub struct TraktClient {
    base_url: String,
    policy: RetryPolicy,
    settings: SettingsStore,
    credentials: Mutex<TraktCredentials>,
}

impl TraktClient {
    pub fn new(settings: SettingsStore) -> anyhow::Result<Self> {
        Self::with_base_url(TRAKT_API_URL, settings, RetryPolicy::default())
    }

    pub(crate) fn with_base_url(
        base_url: &str,
        settings: SettingsStore,
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let credentials = TraktCredentials::load(&settings)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            settings,
            credentials: Mutex::new(credentials),
        })
    }

    fn credentials(&self) -> ServiceResult<TraktCredentials> {
        self.credentials
            .lock()
            .map(|creds| creds.clone())
            .map_err(|_| ServiceError::Authentication("credential lock poisoned".to_string()))
    }

    fn headers(&self, authorized: bool) -> ServiceResult<Vec<(String, String)>> {
        let creds = self.credentials()?;
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("trakt-api-version".to_string(), "2".to_string()),
            ("trakt-api-key".to_string(), creds.client_id),
        ];
        if authorized {
            if let Some(token) = creds.access_token {
                headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }
        Ok(headers)
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<String, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.headers(true).map_err(|err| HttpError::Status {
            status: 401,
            body: err.to_string(),
        })?;
        let body = body.map(Value::to_string);
        debug!(method, path, "trakt request");
        send_with_retries(
            &HttpRequest {
                method,
                url: &url,
                headers: &headers,
                query,
                body: body.as_deref(),
            },
            &self.policy,
        )
    }

    /// GET that maps 404 to `None`.
    fn get_optional(&self, path: &str, query: &[(String, String)]) -> ServiceResult<Option<Value>> {
        match self.send("GET", path, query, None) {
            Ok(raw) => parse_body(&raw).map(Some),
            Err(err) if err.status() == Some(404) => Ok(None),
            Err(err) => Err(map_http_error(err)),
        }
    }

    fn get(&self, path: &str) -> ServiceResult<Value> {
        let raw = self.send("GET", path, &[], None).map_err(map_http_error)?;
        parse_body(&raw)
    }

    fn post(&self, path: &str, body: &Value) -> ServiceResult<Value> {
        let raw = self
            .send("POST", path, &[], Some(body))
            .map_err(map_http_error)?;
        parse_body(&raw)
    }

    fn show_progress(&self, show_id: &str, show_ids: &RemoteIds) -> ServiceResult<Vec<SeasonInfo>> {
        let progress = self.get_optional(&format!("/shows/{show_id}/progress/watched"), &[])?;
        Ok(progress
            .map(|value| parse_progress(&value, show_ids))
            .unwrap_or_default())
    }
}

fn parse_body(raw: &str) -> ServiceResult<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw)
        .map_err(|err| ServiceError::TransientRemote(format!("invalid JSON response: {err}")))
}

fn map_http_error(err: HttpError) -> ServiceError {
    match err.status() {
        Some(401) | Some(403) => ServiceError::Authentication(err.to_string()),
        _ => ServiceError::TransientRemote(err.to_string()),
    }
}

impl RemoteApi for TraktClient {
    fn authenticate(&self, pin: &str) -> ServiceResult<String> {
        let creds = self.credentials()?;
        let body = json!({
            "code": pin.trim(),
            "client_id": creds.client_id,
            "client_secret": creds.client_secret,
            "redirect_uri": OOB_REDIRECT_URI,
            "grant_type": "authorization_code",
        });
        let url = format!("{}/oauth/token", self.base_url);
        let headers = self.headers(false)?;
        let body = body.to_string();
        let raw = send_with_retries(
            &HttpRequest {
                method: "POST",
                url: &url,
                headers: &headers,
                query: &[],
                body: Some(&body),
            },
            &self.policy,
        )
        .map_err(|err| ServiceError::Authentication(err.to_string()))?;

        let value = parse_body(&raw)?;
        let token = value
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::Authentication("no access token in response".to_string()))?
            .to_string();

        self.settings
            .set(TRAKT_ACCESS_TOKEN, &token)
            .map_err(|err| ServiceError::Authentication(format!("failed to store token: {err}")))?;
        if let Ok(mut guard) = self.credentials.lock() {
            guard.access_token = Some(token.clone());
        }
        Ok(token)
    }

    fn reload_settings(&self) -> ServiceResult<()> {
        let creds = TraktCredentials::load(&self.settings)
            .map_err(|err| ServiceError::Host(format!("failed to read settings: {err}")))?;
        match self.credentials.lock() {
            Ok(mut guard) => {
                *guard = creds;
                Ok(())
            }
            Err(_) => Err(ServiceError::Authentication(
                "credential lock poisoned".to_string(),
            )),
        }
    }

    fn get_movie_summary(&self, id: &str) -> ServiceResult<Option<MovieSummary>> {
        let Some(value) = self.get_optional(&format!("/movies/{id}"), &[])? else {
            return Ok(None);
        };
        let Some(movie) = parse_titled(&value) else {
            return Ok(None);
        };
        let history_key = movie
            .ids
            .trakt
            .map(|trakt| trakt.to_string())
            .unwrap_or_else(|| id.to_string());
        let history = self.get_optional(
            &format!("/sync/history/movies/{history_key}"),
            &[("limit".to_string(), "1".to_string())],
        )?;
        let watched = history
            .as_ref()
            .and_then(Value::as_array)
            .is_some_and(|entries| !entries.is_empty());
        Ok(Some(MovieSummary {
            title: movie.title,
            year: movie.year,
            ids: movie.ids,
            watched,
        }))
    }

    fn get_episode_summary(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> ServiceResult<Option<EpisodeSummary>> {
        let Some(show) = self.get_optional(&format!("/shows/{show_id}"), &[])? else {
            return Ok(None);
        };
        let Some(show) = parse_titled(&show) else {
            return Ok(None);
        };
        let Some(ep) = self.get_optional(
            &format!("/shows/{show_id}/seasons/{season}/episodes/{episode}"),
            &[],
        )?
        else {
            return Ok(None);
        };

        let watched = self
            .show_progress(show_id, &show.ids)?
            .iter()
            .filter(|info| info.number == season)
            .flat_map(|info| info.episodes.iter())
            .any(|item| item.episode == episode && item.watched);

        Ok(Some(EpisodeSummary {
            show_title: show.title,
            show_year: show.year,
            show_ids: show.ids,
            season,
            episode,
            title: ep
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            watched,
        }))
    }

    fn get_show_summary(&self, id: &str, extended: bool) -> ServiceResult<Option<ShowSummary>> {
        let Some(value) = self.get_optional(&format!("/shows/{id}"), &[])? else {
            return Ok(None);
        };
        let Some(show) = parse_titled(&value) else {
            return Ok(None);
        };
        let seasons = if extended {
            self.show_progress(id, &show.ids)?
        } else {
            Vec::new()
        };
        Ok(Some(ShowSummary {
            title: show.title,
            year: show.year,
            ids: show.ids,
            seasons,
        }))
    }

    fn get_season_info(&self, id: &str, season: u32) -> ServiceResult<Option<SeasonInfo>> {
        let Some(value) = self.get_optional(&format!("/shows/{id}"), &[])? else {
            return Ok(None);
        };
        let Some(show) = parse_titled(&value) else {
            return Ok(None);
        };
        Ok(self
            .show_progress(id, &show.ids)?
            .into_iter()
            .find(|info| info.number == season))
    }

    fn update_seen_movie(&self, batch: &SeenMovieBatch) -> ServiceResult<()> {
        if batch.movies.is_empty() {
            return Ok(());
        }
        let response = self.post("/sync/history", &movie_history_body(batch))?;
        log_not_found(&response);
        Ok(())
    }

    fn update_seen_episode(&self, batch: &SeenEpisodeBatch) -> ServiceResult<()> {
        self.update_seen_shows(std::slice::from_ref(batch))
    }

    fn update_seen_shows(&self, batches: &[SeenEpisodeBatch]) -> ServiceResult<()> {
        if batches.iter().all(|batch| batch.episodes.is_empty()) {
            return Ok(());
        }
        let response = self.post("/sync/history", &show_history_body(batches))?;
        log_not_found(&response);
        Ok(())
    }

    fn scrobble(&self, verb: ScrobbleVerb, item: &MediaRef, progress: f64) -> ServiceResult<()> {
        // Trakt has no cancel; pausing keeps a resume point without a watched mark.
        let endpoint = match verb {
            ScrobbleVerb::Start => "start",
            ScrobbleVerb::Pause | ScrobbleVerb::Cancel => "pause",
            ScrobbleVerb::Stop => "stop",
        };
        let body = scrobble_body(item, progress);
        match self.send("POST", &format!("/scrobble/{endpoint}"), &[], Some(&body)) {
            Ok(_) => Ok(()),
            // 409: the same item was already scrobbled moments ago.
            Err(err) if err.status() == Some(409) => {
                debug!(verb = verb.as_str(), "duplicate scrobble ignored by remote");
                Ok(())
            }
            Err(err) => Err(map_http_error(err)),
        }
    }

    fn add_ratings(&self, ratings: &[Rated<MediaRef>]) -> ServiceResult<()> {
        if ratings.is_empty() {
            return Ok(());
        }
        let entries: Vec<(&MediaRef, Option<u8>)> = ratings
            .iter()
            .map(|rated| (&rated.item, Some(rated.rating)))
            .collect();
        self.post("/sync/ratings", &ratings_body(&entries))?;
        Ok(())
    }

    fn remove_ratings(&self, items: &[MediaRef]) -> ServiceResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let entries: Vec<(&MediaRef, Option<u8>)> = items.iter().map(|item| (item, None)).collect();
        self.post("/sync/ratings/remove", &ratings_body(&entries))?;
        Ok(())
    }

    fn watched_movies(&self) -> ServiceResult<Vec<MovieRecord>> {
        Ok(parse_watched_movies(&self.get("/sync/watched/movies")?))
    }

    fn watched_episodes(&self) -> ServiceResult<Vec<EpisodeRecord>> {
        Ok(parse_watched_shows(&self.get("/sync/watched/shows")?))
    }

    fn rated_movies(&self) -> ServiceResult<Vec<Rated<MovieRecord>>> {
        Ok(parse_rated_movies(&self.get("/sync/ratings/movies")?))
    }

    fn rated_episodes(&self) -> ServiceResult<Vec<Rated<EpisodeRecord>>> {
        Ok(parse_rated_episodes(&self.get("/sync/ratings/episodes")?))
    }
}

fn log_not_found(response: &Value) {
    let Some(not_found) = response.get("not_found").and_then(Value::as_object) else {
        return;
    };
    let missing: usize = not_found
        .values()
        .filter_map(Value::as_array)
        .map(Vec::len)
        .sum();
    if missing > 0 {
        warn!(missing, "remote did not recognise some submitted items");
    }
}

pub(crate) fn parse_ids(value: &Value) -> RemoteIds {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string)
    };
    let number = |key: &str| value.get(key).and_then(Value::as_u64);
    RemoteIds {
        trakt: number("trakt"),
        slug: text("slug"),
        imdb: text("imdb"),
        tmdb: number("tmdb"),
        tvdb: number("tvdb"),
    }
}

/// Parses the `{title, year, ids}` shape shared by movies and shows.
pub(crate) fn parse_titled(value: &Value) -> Option<MovieRecord> {
    let title = value.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    Some(MovieRecord {
        title: title.to_string(),
        year: value
            .get("year")
            .and_then(Value::as_u64)
            .and_then(|year| u32::try_from(year).ok()),
        ids: value.get("ids").map(parse_ids).unwrap_or_default(),
    })
}

fn as_u32(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .and_then(|number| u32::try_from(number).ok())
}

pub(crate) fn parse_progress(value: &Value, show_ids: &RemoteIds) -> Vec<SeasonInfo> {
    let Some(seasons) = value.get("seasons").and_then(Value::as_array) else {
        return Vec::new();
    };
    seasons
        .iter()
        .filter_map(|season| {
            let number = as_u32(season.get("number"))?;
            let episodes = season
                .get("episodes")
                .and_then(Value::as_array)
                .map(|episodes| {
                    episodes
                        .iter()
                        .filter_map(|ep| {
                            Some(SeasonEpisode {
                                season: number,
                                episode: as_u32(ep.get("number"))?,
                                watched: ep
                                    .get("completed")
                                    .and_then(Value::as_bool)
                                    .unwrap_or(false),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(SeasonInfo {
                show_ids: show_ids.clone(),
                number,
                episodes,
            })
        })
        .collect()
}

pub(crate) fn parse_watched_movies(value: &Value) -> Vec<MovieRecord> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| parse_titled(entry.get("movie")?))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_watched_shows(value: &Value) -> Vec<EpisodeRecord> {
    let mut out = Vec::new();
    let Some(entries) = value.as_array() else {
        return out;
    };
    for entry in entries {
        let Some(show) = entry.get("show").and_then(parse_titled) else {
            continue;
        };
        let Some(seasons) = entry.get("seasons").and_then(Value::as_array) else {
            continue;
        };
        for season in seasons {
            let Some(number) = as_u32(season.get("number")) else {
                continue;
            };
            let Some(episodes) = season.get("episodes").and_then(Value::as_array) else {
                continue;
            };
            for ep in episodes {
                if let Some(episode) = as_u32(ep.get("number")) {
                    out.push(EpisodeRecord {
                        show_title: show.title.clone(),
                        show_year: show.year,
                        show_ids: show.ids.clone(),
                        season: number,
                        episode,
                    });
                }
            }
        }
    }
    out
}

fn parse_rating(entry: &Value) -> Option<u8> {
    let rating = entry.get("rating")?.as_u64()?;
    u8::try_from(rating).ok().filter(|rating| (1..=10).contains(rating))
}

pub(crate) fn parse_rated_movies(value: &Value) -> Vec<Rated<MovieRecord>> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(Rated {
                        item: parse_titled(entry.get("movie")?)?,
                        rating: parse_rating(entry)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_rated_episodes(value: &Value) -> Vec<Rated<EpisodeRecord>> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let show = parse_titled(entry.get("show")?)?;
                    let episode = entry.get("episode")?;
                    Some(Rated {
                        item: EpisodeRecord {
                            show_title: show.title,
                            show_year: show.year,
                            show_ids: show.ids,
                            season: as_u32(episode.get("season"))?,
                            episode: as_u32(episode.get("number"))?,
                        },
                        rating: parse_rating(entry)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn ids_json(ids: &RemoteIds) -> Value {
    serde_json::to_value(ids).unwrap_or_else(|_| json!({}))
}

fn titled_json(title: &str, year: Option<u32>, ids: &RemoteIds) -> Value {
    let mut value = json!({ "title": title, "ids": ids_json(ids) });
    if let Some(year) = year {
        value["year"] = json!(year);
    }
    value
}

pub(crate) fn scrobble_body(item: &MediaRef, progress: f64) -> Value {
    let progress = (progress.clamp(0.0, 100.0) * 100.0).round() / 100.0;
    match item {
        MediaRef::Movie { title, year, ids } => json!({
            "movie": titled_json(title, *year, ids),
            "progress": progress,
        }),
        MediaRef::Show { title, year, ids } => json!({
            "show": titled_json(title, *year, ids),
            "progress": progress,
        }),
        MediaRef::Episode {
            show_title,
            show_year,
            show_ids,
            season,
            episode,
        } => json!({
            "show": titled_json(show_title, *show_year, show_ids),
            "episode": { "season": season, "number": episode },
            "progress": progress,
        }),
    }
}

pub(crate) fn movie_history_body(batch: &SeenMovieBatch) -> Value {
    let movies: Vec<Value> = batch
        .movies
        .iter()
        .map(|movie| {
            let ids = RemoteIds {
                imdb: Some(movie.imdb_id.clone()).filter(|id| !id.is_empty()),
                ..RemoteIds::default()
            };
            let mut value = titled_json(&movie.title, movie.year, &ids);
            if let Some(watched_at) = DateTime::from_timestamp(movie.last_played, 0) {
                value["watched_at"] = json!(watched_at.to_rfc3339());
            }
            value
        })
        .collect();
    json!({ "movies": movies })
}

pub(crate) fn show_history_body(batches: &[SeenEpisodeBatch]) -> Value {
    let shows: Vec<Value> = batches
        .iter()
        .filter(|batch| !batch.episodes.is_empty())
        .map(|batch| {
            let ids = RemoteIds {
                imdb: batch.imdb_id.clone().filter(|id| !id.is_empty()),
                tvdb: batch.tvdb_id,
                ..RemoteIds::default()
            };
            let mut seasons: BTreeMap<u32, Vec<Value>> = BTreeMap::new();
            for ep in &batch.episodes {
                seasons
                    .entry(ep.season)
                    .or_default()
                    .push(json!({ "number": ep.episode }));
            }
            let mut value = titled_json(&batch.title, batch.year, &ids);
            value["seasons"] = Value::Array(
                seasons
                    .into_iter()
                    .map(|(number, episodes)| json!({ "number": number, "episodes": episodes }))
                    .collect(),
            );
            value
        })
        .collect();
    json!({ "shows": shows })
}

pub(crate) fn ratings_body(entries: &[(&MediaRef, Option<u8>)]) -> Value {
    let mut movies = Vec::new();
    let mut shows = Vec::new();
    for (item, rating) in entries {
        let mut value = match item {
            MediaRef::Movie { title, year, ids } => titled_json(title, *year, ids),
            MediaRef::Show { title, year, ids } => titled_json(title, *year, ids),
            MediaRef::Episode {
                show_title,
                show_year,
                show_ids,
                season,
                episode,
            } => {
                let mut episode_value = json!({ "number": episode });
                if let Some(rating) = rating {
                    episode_value["rating"] = json!(rating);
                }
                let mut value = titled_json(show_title, *show_year, show_ids);
                value["seasons"] = json!([{ "number": season, "episodes": [episode_value] }]);
                shows.push(value);
                continue;
            }
        };
        if let Some(rating) = rating {
            value["rating"] = json!(rating);
        }
        match item {
            MediaRef::Movie { .. } => movies.push(value),
            _ => shows.push(value),
        }
    }
    json!({ "movies": movies, "shows": shows })
}
