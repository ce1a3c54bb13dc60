//! Kodi host adapter: queries over JSON-RPC/HTTP, callbacks from the
//! JSON-RPC notification socket.

mod events;

pub use events::KodiEventListener;

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::app::action::MediaKind;
use crate::app::host::{
    EpisodeDetails, InfoLabels, Library, LibraryEpisode, LibraryMovie, Notifier, PlaybackPosition,
    Player, PlayingItem, SeasonEpisodeFile,
};
use crate::error::{ServiceError, ServiceResult};
use crate::http::{HttpRequest, RetryPolicy, send_with_retries};

const VIDEO_PLAYER_ID: i64 = 1;
const VIDEO_PLAYLIST_ID: i64 = 1;
const MOVIE_PROPERTIES: [&str; 5] = ["title", "year", "imdbnumber", "playcount", "userrating"];

pub struct KodiHost {
    url: String,
    policy: RetryPolicy,
}

impl KodiHost {
    pub fn new(url: &str) -> Self {
        Self::with_policy(
            url,
            RetryPolicy {
                connect_timeout: Duration::from_secs(2),
                read_timeout: Duration::from_secs(10),
                attempts: 2,
                retry_delay: Duration::from_millis(250),
            },
        )
    }

    pub(crate) fn with_policy(url: &str, policy: RetryPolicy) -> Self {
        Self {
            url: url.to_string(),
            policy,
        }
    }

    fn post(&self, body: &Value) -> ServiceResult<Value> {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let body = body.to_string();
        let raw = send_with_retries(
            &HttpRequest {
                method: "POST",
                url: &self.url,
                headers: &headers,
                query: &[],
                body: Some(&body),
            },
            &self.policy,
        )
        .map_err(|err| ServiceError::Host(err.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|err| ServiceError::Host(format!("invalid JSON-RPC response: {err}")))
    }

    /// Single JSON-RPC call; a JSON-RPC error object becomes `ServiceError::Host`.
    fn call(&self, method: &str, params: Value) -> ServiceResult<Value> {
        let response = self.post(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        }))?;
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ServiceError::Host(format!("{method}: {message}")));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Like `call`, but a JSON-RPC error (unknown id) yields `None`.
    fn call_optional(&self, method: &str, params: Value) -> ServiceResult<Option<Value>> {
        match self.call(method, params) {
            Ok(value) => Ok(Some(value)),
            Err(ServiceError::Host(message)) if message.starts_with(method) => {
                debug!(method, %message, "host lookup returned no item");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Sends all calls as one JSON-RPC batch.
    fn batch(&self, calls: Vec<(&str, Value)>) -> ServiceResult<()> {
        if calls.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = calls
            .into_iter()
            .enumerate()
            .map(|(idx, (method, params))| {
                json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": idx + 1 })
            })
            .collect();
        let response = self.post(&Value::Array(body))?;
        let failures = response
            .as_array()
            .map(|items| items.iter().filter(|item| item.get("error").is_some()).count())
            .unwrap_or(0);
        if failures > 0 {
            return Err(ServiceError::Host(format!(
                "{failures} call(s) in batch failed"
            )));
        }
        Ok(())
    }

    fn tv_shows(&self) -> ServiceResult<Vec<Value>> {
        let result = self.call(
            "VideoLibrary.GetTVShows",
            json!({ "properties": ["title", "year", "imdbnumber", "uniqueid"] }),
        )?;
        Ok(result
            .get("tvshows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

pub(crate) fn parse_time(value: &Value) -> f64 {
    let part = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    part("hours") * 3600.0 + part("minutes") * 60.0 + part("seconds") + part("milliseconds") / 1000.0
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn number_u32(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|number| u32::try_from(number).ok())
}

fn positive_year(value: &Value) -> Option<u32> {
    number_u32(value, "year").filter(|year| *year > 0)
}

fn rating(value: &Value) -> u8 {
    value
        .get("userrating")
        .and_then(Value::as_u64)
        .and_then(|rating| u8::try_from(rating).ok())
        .filter(|rating| *rating <= 10)
        .unwrap_or(0)
}

pub(crate) fn parse_library_movie(value: &Value) -> Option<LibraryMovie> {
    let library_id = value.get("movieid")?.as_i64()?;
    let imdb = text(value, "imdbnumber");
    Some(LibraryMovie {
        library_id,
        title: text(value, "title"),
        year: positive_year(value),
        imdb_id: (!imdb.is_empty()).then_some(imdb),
        playcount: number_u32(value, "playcount").unwrap_or(0),
        rating: rating(value),
    })
}

/// Show-level fields shared by every episode of a show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ShowFields {
    pub(crate) title: String,
    pub(crate) year: Option<u32>,
    pub(crate) imdb: Option<String>,
    pub(crate) tvdb: Option<u64>,
}

pub(crate) fn parse_show_fields(value: &Value) -> ShowFields {
    let unique = value.get("uniqueid");
    let unique_text = |key: &str| {
        unique
            .and_then(|ids| ids.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string)
    };
    let imdbnumber = text(value, "imdbnumber");
    let imdb = unique_text("imdb").or_else(|| {
        imdbnumber
            .starts_with("tt")
            .then(|| imdbnumber.clone())
    });
    let tvdb = unique_text("tvdb")
        .or_else(|| (!imdbnumber.starts_with("tt")).then(|| imdbnumber.clone()))
        .and_then(|raw| raw.parse::<u64>().ok());
    ShowFields {
        title: text(value, "title"),
        year: positive_year(value),
        imdb,
        tvdb,
    }
}

pub(crate) fn parse_library_episode(value: &Value, show: &ShowFields) -> Option<LibraryEpisode> {
    Some(LibraryEpisode {
        library_id: value.get("episodeid")?.as_i64()?,
        show_title: show.title.clone(),
        show_year: show.year,
        show_imdb: show.imdb.clone(),
        show_tvdb: show.tvdb,
        season: number_u32(value, "season")?,
        episode: number_u32(value, "episode")?,
        title: text(value, "title"),
        playcount: number_u32(value, "playcount").unwrap_or(0),
        rating: rating(value),
    })
}

impl Player for KodiHost {
    fn is_playing_video(&self) -> bool {
        match self.call("Player.GetActivePlayers", json!({})) {
            Ok(players) => players.as_array().is_some_and(|players| {
                players
                    .iter()
                    .any(|player| player.get("type").and_then(Value::as_str) == Some("video"))
            }),
            Err(err) => {
                debug!(error = %err, "could not query active players");
                false
            }
        }
    }

    fn playing_item(&self) -> ServiceResult<PlayingItem> {
        let result = self.call(
            "Player.GetItem",
            json!({ "playerid": VIDEO_PLAYER_ID, "properties": ["title"] }),
        )?;
        let item = result
            .get("item")
            .ok_or_else(|| ServiceError::Host("Player.GetItem: no item".to_string()))?;
        Ok(PlayingItem {
            kind: text(item, "type"),
            library_id: item
                .get("id")
                .and_then(Value::as_i64)
                .filter(|id| *id > 0),
        })
    }

    fn playing_file(&self) -> ServiceResult<String> {
        let result = self.call(
            "Player.GetItem",
            json!({ "playerid": VIDEO_PLAYER_ID, "properties": ["file"] }),
        )?;
        let file = result.get("item").map(|item| text(item, "file")).unwrap_or_default();
        if file.is_empty() {
            return Err(ServiceError::Host("player is not playing a file".to_string()));
        }
        Ok(file)
    }

    fn info_labels(&self) -> ServiceResult<InfoLabels> {
        let result = self.call(
            "XBMC.GetInfoLabels",
            json!({ "labels": [
                "VideoPlayer.Title",
                "VideoPlayer.TVShowTitle",
                "VideoPlayer.Season",
                "VideoPlayer.Episode",
                "VideoPlayer.Year",
            ]}),
        )?;
        Ok(InfoLabels {
            title: text(&result, "VideoPlayer.Title"),
            show_title: text(&result, "VideoPlayer.TVShowTitle"),
            season: text(&result, "VideoPlayer.Season"),
            episode: text(&result, "VideoPlayer.Episode"),
            year: text(&result, "VideoPlayer.Year"),
        })
    }

    fn playlist_size(&self) -> usize {
        self.call(
            "Playlist.GetProperties",
            json!({ "playlistid": VIDEO_PLAYLIST_ID, "properties": ["size"] }),
        )
        .ok()
        .and_then(|result| result.get("size").and_then(Value::as_u64))
        .map(|size| size as usize)
        .unwrap_or(0)
    }

    fn playlist_position(&self) -> Option<i64> {
        self.call(
            "Player.GetProperties",
            json!({ "playerid": VIDEO_PLAYER_ID, "properties": ["position"] }),
        )
        .ok()
        .and_then(|result| result.get("position").and_then(Value::as_i64))
        .filter(|position| *position >= 0)
    }

    fn playback_position(&self) -> ServiceResult<PlaybackPosition> {
        let result = self.call(
            "Player.GetProperties",
            json!({ "playerid": VIDEO_PLAYER_ID, "properties": ["time", "totaltime"] }),
        )?;
        Ok(PlaybackPosition {
            time_secs: result.get("time").map(parse_time).unwrap_or(0.0),
            total_secs: result.get("totaltime").map(parse_time).unwrap_or(0.0),
        })
    }
}

impl Library for KodiHost {
    fn episode_details(&self, episode_id: i64) -> ServiceResult<Option<EpisodeDetails>> {
        let Some(result) = self.call_optional(
            "VideoLibrary.GetEpisodeDetails",
            json!({ "episodeid": episode_id, "properties": ["tvshowid", "season", "episode"] }),
        )?
        else {
            return Ok(None);
        };
        let Some(details) = result.get("episodedetails") else {
            return Ok(None);
        };
        Ok((|| {
            Some(EpisodeDetails {
                tvshow_id: details.get("tvshowid")?.as_i64()?,
                season: number_u32(details, "season")?,
                episode: number_u32(details, "episode")?,
            })
        })())
    }

    fn season_episodes(
        &self,
        tvshow_id: i64,
        season: u32,
    ) -> ServiceResult<Vec<SeasonEpisodeFile>> {
        let result = self.call(
            "VideoLibrary.GetEpisodes",
            json!({
                "tvshowid": tvshow_id,
                "season": season,
                "properties": ["episode", "file"],
                "sort": { "method": "episode" },
            }),
        )?;
        Ok(result
            .get("episodes")
            .and_then(Value::as_array)
            .map(|episodes| {
                episodes
                    .iter()
                    .filter_map(|ep| {
                        Some(SeasonEpisodeFile {
                            episode_id: ep.get("episodeid")?.as_i64()?,
                            episode: number_u32(ep, "episode")?,
                            file: text(ep, "file"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn movie(&self, library_id: i64) -> ServiceResult<Option<LibraryMovie>> {
        let Some(result) = self.call_optional(
            "VideoLibrary.GetMovieDetails",
            json!({ "movieid": library_id, "properties": MOVIE_PROPERTIES }),
        )?
        else {
            return Ok(None);
        };
        Ok(result.get("moviedetails").and_then(parse_library_movie))
    }

    fn episode(&self, library_id: i64) -> ServiceResult<Option<LibraryEpisode>> {
        let Some(result) = self.call_optional(
            "VideoLibrary.GetEpisodeDetails",
            json!({
                "episodeid": library_id,
                "properties": ["title", "season", "episode", "tvshowid", "playcount", "userrating"],
            }),
        )?
        else {
            return Ok(None);
        };
        let Some(details) = result.get("episodedetails") else {
            return Ok(None);
        };
        let Some(tvshow_id) = details.get("tvshowid").and_then(Value::as_i64) else {
            return Ok(None);
        };
        let Some(show) = self.call_optional(
            "VideoLibrary.GetTVShowDetails",
            json!({ "tvshowid": tvshow_id, "properties": ["title", "year", "imdbnumber", "uniqueid"] }),
        )?
        else {
            return Ok(None);
        };
        let show = show
            .get("tvshowdetails")
            .map(parse_show_fields)
            .unwrap_or_default();
        Ok(parse_library_episode(details, &show))
    }

    fn movies(&self) -> ServiceResult<Vec<LibraryMovie>> {
        let result = self.call(
            "VideoLibrary.GetMovies",
            json!({ "properties": MOVIE_PROPERTIES }),
        )?;
        Ok(result
            .get("movies")
            .and_then(Value::as_array)
            .map(|movies| movies.iter().filter_map(parse_library_movie).collect())
            .unwrap_or_default())
    }

    fn episodes(&self) -> ServiceResult<Vec<LibraryEpisode>> {
        let mut out = Vec::new();
        for show in self.tv_shows()? {
            let Some(tvshow_id) = show.get("tvshowid").and_then(Value::as_i64) else {
                continue;
            };
            let fields = parse_show_fields(&show);
            let result = self.call(
                "VideoLibrary.GetEpisodes",
                json!({
                    "tvshowid": tvshow_id,
                    "properties": ["title", "season", "episode", "playcount", "userrating"],
                }),
            )?;
            if let Some(episodes) = result.get("episodes").and_then(Value::as_array) {
                out.extend(
                    episodes
                        .iter()
                        .filter_map(|ep| parse_library_episode(ep, &fields)),
                );
            }
        }
        Ok(out)
    }

    fn set_watched(&self, kind: MediaKind, ids: &[i64]) -> ServiceResult<()> {
        let (method, key) = detail_setter(kind)?;
        self.batch(
            ids.iter()
                .map(|id| (method, json!({ key: id, "playcount": 1 })))
                .collect(),
        )
    }

    fn set_ratings(&self, kind: MediaKind, ratings: &[(i64, u8)]) -> ServiceResult<()> {
        let (method, key) = detail_setter(kind)?;
        self.batch(
            ratings
                .iter()
                .map(|(id, rating)| (method, json!({ key: id, "userrating": rating })))
                .collect(),
        )
    }
}

fn detail_setter(kind: MediaKind) -> ServiceResult<(&'static str, &'static str)> {
    match kind {
        MediaKind::Movie => Ok(("VideoLibrary.SetMovieDetails", "movieid")),
        MediaKind::Episode => Ok(("VideoLibrary.SetEpisodeDetails", "episodeid")),
        other => Err(ServiceError::Host(format!(
            "cannot update {other} items in the library"
        ))),
    }
}

impl Notifier for KodiHost {
    fn notify(&self, title: &str, message: &str, duration: Duration) {
        let result = self.call(
            "GUI.ShowNotification",
            json!({
                "title": title,
                "message": message,
                "displaytime": duration.as_millis() as u64,
            }),
        );
        if let Err(err) = result {
            warn!(error = %err, title, message, "failed to show notification");
        }
    }

    fn open_settings(&self) -> ServiceResult<()> {
        self.call(
            "GUI.ActivateWindow",
            json!({ "window": "addonsettings" }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::{Behavior, TestServer};

    fn host(server: &TestServer) -> KodiHost {
        KodiHost::with_policy(
            &server.base_url,
            RetryPolicy {
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(500),
                attempts: 1,
                retry_delay: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn parse_time_sums_all_components() {
        let value = json!({ "hours": 1, "minutes": 2, "seconds": 3, "milliseconds": 500 });
        assert_eq!(parse_time(&value), 3723.5);
    }

    #[test]
    fn show_fields_prefer_unique_ids() {
        let value = json!({
            "title": "Dark",
            "year": 2017,
            "imdbnumber": "334824",
            "uniqueid": { "imdb": "tt5753856", "tvdb": "334824" },
        });
        let fields = parse_show_fields(&value);
        assert_eq!(fields.imdb.as_deref(), Some("tt5753856"));
        assert_eq!(fields.tvdb, Some(334824));
        assert_eq!(fields.year, Some(2017));
    }

    #[test]
    fn library_movie_without_imdb_number_has_no_id() {
        let value = json!({ "movieid": 4, "title": "Home Video", "year": 0, "imdbnumber": "" });
        let movie = parse_library_movie(&value).expect("movie");
        assert_eq!(movie.imdb_id, None);
        assert_eq!(movie.year, None);
        assert_eq!(movie.rating, 0);
    }

    #[test]
    fn playing_item_ignores_missing_library_id() {
        let server = TestServer::spawn(vec![Behavior::Respond(
            200,
            r#"{"id":1,"jsonrpc":"2.0","result":{"item":{"type":"unknown","label":"clip.mkv"}}}"#
                .to_string(),
        )]);
        let item = host(&server).playing_item().unwrap();
        assert_eq!(item.kind, "unknown");
        assert_eq!(item.library_id, None);
    }

    #[test]
    fn unknown_movie_id_resolves_to_none() {
        let server = TestServer::spawn(vec![Behavior::Respond(
            200,
            r#"{"id":1,"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params."}}"#
                .to_string(),
        )]);
        assert_eq!(host(&server).movie(999).unwrap(), None);
    }

    #[test]
    fn set_watched_sends_single_batch_request() {
        let server = TestServer::spawn(vec![Behavior::Respond(
            200,
            r#"[{"id":1,"result":"OK"},{"id":2,"result":"OK"}]"#.to_string(),
        )]);
        host(&server)
            .set_watched(MediaKind::Episode, &[11, 12])
            .unwrap();

        assert_eq!(server.request_count(), 1);
        let raw = &server.seen_requests()[0];
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let calls: Value = serde_json::from_str(body).unwrap();
        assert_eq!(calls.as_array().unwrap().len(), 2);
        assert_eq!(calls[1]["params"]["episodeid"], 12);
        assert_eq!(calls[1]["method"], "VideoLibrary.SetEpisodeDetails");
    }
}
