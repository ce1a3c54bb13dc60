use std::sync::Arc;

use anyhow::Result;

use crate::db::Database;

pub const STARTUP_DELAY: &str = "startup_delay";
pub const SYNC_ON_UPDATE: &str = "sync_on_update";
pub const CLEAN_TRAKT_MOVIES: &str = "clean_trakt_movies";
pub const CLEAN_TRAKT_EPISODES: &str = "clean_trakt_episodes";
pub const SHOW_MARKED_NOTIFICATION: &str = "show_marked_notification";
pub const SCROBBLE_MOVIE: &str = "scrobble_movie";
pub const SCROBBLE_EPISODE: &str = "scrobble_episode";
pub const SCROBBLE_THRESHOLD: &str = "scrobble_threshold";
pub const EXCLUDE_LIVE_TV: &str = "exclude_live_tv";
pub const EXCLUDE_HTTP: &str = "exclude_http";
pub const EXCLUDE_PATHS: [&str; 3] = ["exclude_path_1", "exclude_path_2", "exclude_path_3"];
pub const TRAKT_CLIENT_ID: &str = "trakt_client_id";
pub const TRAKT_CLIENT_SECRET: &str = "trakt_client_secret";
pub const TRAKT_ACCESS_TOKEN: &str = "trakt_access_token";

/// Key/value settings backed by the `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    db: Arc<Database>,
}

impl SettingsStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.db.setting(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get_string(key)?
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(default))
    }

    pub fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_string(key)?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(default))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_setting(key, value)
    }

    pub fn all(&self) -> Result<Vec<(String, String)>> {
        self.db.list_settings()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    pub live_tv: bool,
    pub http: bool,
    pub paths: Vec<String>,
}

impl ExclusionRules {
    pub fn is_excluded(&self, file: &str) -> bool {
        let file = file.trim();
        if file.is_empty() {
            return false;
        }
        if self.live_tv && file.starts_with("pvr://") {
            return true;
        }
        if self.http && (file.starts_with("http://") || file.starts_with("https://")) {
            return true;
        }
        self.paths
            .iter()
            .any(|prefix| !prefix.is_empty() && file.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub startup_delay_secs: u64,
    pub sync_on_update: bool,
    pub clean_trakt_movies: bool,
    pub clean_trakt_episodes: bool,
    pub show_marked_notification: bool,
    pub scrobble_movie: bool,
    pub scrobble_episode: bool,
    pub scrobble_threshold: f64,
    pub exclusions: ExclusionRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            startup_delay_secs: 0,
            sync_on_update: true,
            clean_trakt_movies: false,
            clean_trakt_episodes: false,
            show_marked_notification: true,
            scrobble_movie: true,
            scrobble_episode: true,
            scrobble_threshold: 80.0,
            exclusions: ExclusionRules {
                live_tv: true,
                http: true,
                paths: Vec::new(),
            },
        }
    }
}

impl Settings {
    pub fn load(store: &SettingsStore) -> Result<Self> {
        let defaults = Settings::default();
        let mut paths = Vec::new();
        for key in EXCLUDE_PATHS {
            if let Some(path) = store.get_string(key)? {
                let path = path.trim().to_string();
                if !path.is_empty() {
                    paths.push(path);
                }
            }
        }

        Ok(Self {
            startup_delay_secs: store
                .get_int(STARTUP_DELAY, defaults.startup_delay_secs as i64)?
                .max(0) as u64,
            sync_on_update: store.get_bool(SYNC_ON_UPDATE, defaults.sync_on_update)?,
            clean_trakt_movies: store.get_bool(CLEAN_TRAKT_MOVIES, defaults.clean_trakt_movies)?,
            clean_trakt_episodes: store
                .get_bool(CLEAN_TRAKT_EPISODES, defaults.clean_trakt_episodes)?,
            show_marked_notification: store
                .get_bool(SHOW_MARKED_NOTIFICATION, defaults.show_marked_notification)?,
            scrobble_movie: store.get_bool(SCROBBLE_MOVIE, defaults.scrobble_movie)?,
            scrobble_episode: store.get_bool(SCROBBLE_EPISODE, defaults.scrobble_episode)?,
            scrobble_threshold: store
                .get_int(SCROBBLE_THRESHOLD, defaults.scrobble_threshold as i64)?
                .clamp(1, 100) as f64,
            exclusions: ExclusionRules {
                live_tv: store.get_bool(EXCLUDE_LIVE_TV, defaults.exclusions.live_tv)?,
                http: store.get_bool(EXCLUDE_HTTP, defaults.exclusions.http)?,
                paths,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_to_defaults_for_missing_or_garbled_values() {
        let store = SettingsStore::new(Arc::new(Database::open_in_memory().unwrap()));
        store.set(SYNC_ON_UPDATE, "maybe").unwrap();
        store.set(SCROBBLE_THRESHOLD, "250").unwrap();
        store.set("exclude_path_2", "  /media/trailers/ ").unwrap();

        let settings = Settings::load(&store).unwrap();
        assert!(settings.sync_on_update);
        assert_eq!(settings.scrobble_threshold, 100.0);
        assert_eq!(settings.exclusions.paths, vec!["/media/trailers/".to_string()]);
    }

    #[test]
    fn exclusion_rules_match_live_tv_http_and_prefixes() {
        let rules = ExclusionRules {
            live_tv: true,
            http: false,
            paths: vec!["/media/home-videos/".to_string()],
        };
        assert!(rules.is_excluded("pvr://channels/tv/1.pvr"));
        assert!(!rules.is_excluded("http://example.test/stream.m3u8"));
        assert!(rules.is_excluded("/media/home-videos/birthday.mkv"));
        assert!(!rules.is_excluded("/media/movies/Heat (1995).mkv"));
        assert!(!rules.is_excluded(""));
    }
}
