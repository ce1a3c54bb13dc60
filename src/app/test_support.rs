use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::action::MediaKind;
use super::host::{
    EpisodeDetails, InfoLabels, Library, LibraryEpisode, LibraryMovie, Notifier, PlaybackPosition,
    Player, PlayingItem, SeasonEpisodeFile,
};
use super::queue::DurableQueue;
use super::settings::SettingsStore;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::remote::{
    EpisodeRecord, EpisodeSummary, MediaRef, MovieRecord, MovieSummary, Rated, RemoteApi,
    ScrobbleVerb, SeasonInfo, SeenEpisodeBatch, SeenMovieBatch, ShowSummary,
};

pub(crate) struct MemoryStore {
    pub db: Arc<Database>,
    pub queue: DurableQueue,
    pub settings: SettingsStore,
}

pub(crate) fn memory_store() -> MemoryStore {
    let db = Arc::new(Database::open_in_memory().expect("in-memory database"));
    MemoryStore {
        queue: DurableQueue::new(Arc::clone(&db)),
        settings: SettingsStore::new(Arc::clone(&db)),
        db,
    }
}

#[derive(Default)]
pub(crate) struct HostState {
    pub playing_video: bool,
    pub playing_item: Option<PlayingItem>,
    pub playing_file: Option<String>,
    pub labels: InfoLabels,
    pub playlist_size: usize,
    pub playlist_position: Option<i64>,
    pub position: PlaybackPosition,
    pub episode_details: HashMap<i64, EpisodeDetails>,
    pub season_files: Vec<SeasonEpisodeFile>,
    pub movies: Vec<LibraryMovie>,
    pub episodes: Vec<LibraryEpisode>,
    pub prompt_rating: Option<u8>,

    pub watched_calls: Vec<(MediaKind, Vec<i64>)>,
    pub rating_calls: Vec<(MediaKind, Vec<(i64, u8)>)>,
    pub notifications: Vec<(String, String)>,
    pub settings_opened: usize,
}

#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().expect("host state")
    }

    pub fn play(&self, item: PlayingItem, file: &str) {
        let mut state = self.state();
        state.playing_video = true;
        state.playing_item = Some(item);
        state.playing_file = Some(file.to_string());
    }

    pub fn set_position(&self, time_secs: f64, total_secs: f64) {
        self.state().position = PlaybackPosition {
            time_secs,
            total_secs,
        };
    }
}

impl Player for FakeHost {
    fn is_playing_video(&self) -> bool {
        self.state().playing_video
    }

    fn playing_item(&self) -> ServiceResult<PlayingItem> {
        self.state()
            .playing_item
            .clone()
            .ok_or_else(|| ServiceError::Host("nothing playing".to_string()))
    }

    fn playing_file(&self) -> ServiceResult<String> {
        self.state()
            .playing_file
            .clone()
            .ok_or_else(|| ServiceError::Host("nothing playing".to_string()))
    }

    fn info_labels(&self) -> ServiceResult<InfoLabels> {
        Ok(self.state().labels.clone())
    }

    fn playlist_size(&self) -> usize {
        self.state().playlist_size
    }

    fn playlist_position(&self) -> Option<i64> {
        self.state().playlist_position
    }

    fn playback_position(&self) -> ServiceResult<PlaybackPosition> {
        Ok(self.state().position)
    }
}

impl Library for FakeHost {
    fn episode_details(&self, episode_id: i64) -> ServiceResult<Option<EpisodeDetails>> {
        Ok(self.state().episode_details.get(&episode_id).copied())
    }

    fn season_episodes(
        &self,
        _tvshow_id: i64,
        _season: u32,
    ) -> ServiceResult<Vec<SeasonEpisodeFile>> {
        Ok(self.state().season_files.clone())
    }

    fn movie(&self, library_id: i64) -> ServiceResult<Option<LibraryMovie>> {
        Ok(self
            .state()
            .movies
            .iter()
            .find(|movie| movie.library_id == library_id)
            .cloned())
    }

    fn episode(&self, library_id: i64) -> ServiceResult<Option<LibraryEpisode>> {
        Ok(self
            .state()
            .episodes
            .iter()
            .find(|episode| episode.library_id == library_id)
            .cloned())
    }

    fn movies(&self) -> ServiceResult<Vec<LibraryMovie>> {
        Ok(self.state().movies.clone())
    }

    fn episodes(&self) -> ServiceResult<Vec<LibraryEpisode>> {
        Ok(self.state().episodes.clone())
    }

    fn set_watched(&self, kind: MediaKind, ids: &[i64]) -> ServiceResult<()> {
        self.state().watched_calls.push((kind, ids.to_vec()));
        Ok(())
    }

    fn set_ratings(&self, kind: MediaKind, ratings: &[(i64, u8)]) -> ServiceResult<()> {
        self.state().rating_calls.push((kind, ratings.to_vec()));
        Ok(())
    }
}

impl Notifier for FakeHost {
    fn notify(&self, title: &str, message: &str, _duration: Duration) {
        self.state()
            .notifications
            .push((title.to_string(), message.to_string()));
    }

    fn open_settings(&self) -> ServiceResult<()> {
        self.state().settings_opened += 1;
        Ok(())
    }

    fn prompt_rating(&self, _item_name: &str) -> Option<u8> {
        self.state().prompt_rating
    }
}

#[derive(Default)]
pub(crate) struct RemoteState {
    pub movies: HashMap<String, MovieSummary>,
    pub episodes: HashMap<(String, u32, u32), EpisodeSummary>,
    pub shows: HashMap<String, ShowSummary>,
    pub seasons: HashMap<(String, u32), SeasonInfo>,
    pub watched_movies: Vec<MovieRecord>,
    pub watched_episodes: Vec<EpisodeRecord>,
    pub rated_movies: Vec<Rated<MovieRecord>>,
    pub rated_episodes: Vec<Rated<EpisodeRecord>>,
    pub fail_updates: bool,

    pub scrobbles: Vec<(ScrobbleVerb, MediaRef, f64)>,
    pub seen_movies: Vec<SeenMovieBatch>,
    pub seen_episodes: Vec<SeenEpisodeBatch>,
    pub seen_shows: Vec<Vec<SeenEpisodeBatch>>,
    pub added_ratings: Vec<Vec<Rated<MediaRef>>>,
    pub removed_ratings: Vec<Vec<MediaRef>>,
    pub reloads: usize,
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    state: Mutex<RemoteState>,
    /// When set, `watched_movies` blocks until the sender fires.
    gate: Mutex<Option<Receiver<()>>>,
}

impl FakeRemote {
    pub fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().expect("remote state")
    }

    pub fn hold_sync(&self, gate: Receiver<()>) {
        *self.gate.lock().expect("gate") = Some(gate);
    }

    pub fn verbs(&self) -> Vec<ScrobbleVerb> {
        self.state().scrobbles.iter().map(|(verb, _, _)| *verb).collect()
    }

    fn update_result(&self) -> ServiceResult<()> {
        if self.state().fail_updates {
            return Err(ServiceError::TransientRemote("HTTP 503".to_string()));
        }
        Ok(())
    }
}

impl RemoteApi for FakeRemote {
    fn authenticate(&self, pin: &str) -> ServiceResult<String> {
        Ok(format!("token-{pin}"))
    }

    fn reload_settings(&self) -> ServiceResult<()> {
        self.state().reloads += 1;
        Ok(())
    }

    fn get_movie_summary(&self, id: &str) -> ServiceResult<Option<MovieSummary>> {
        Ok(self.state().movies.get(id).cloned())
    }

    fn get_episode_summary(
        &self,
        show_id: &str,
        season: u32,
        episode: u32,
    ) -> ServiceResult<Option<EpisodeSummary>> {
        Ok(self
            .state()
            .episodes
            .get(&(show_id.to_string(), season, episode))
            .cloned())
    }

    fn get_show_summary(&self, id: &str, _extended: bool) -> ServiceResult<Option<ShowSummary>> {
        Ok(self.state().shows.get(id).cloned())
    }

    fn get_season_info(&self, id: &str, season: u32) -> ServiceResult<Option<SeasonInfo>> {
        Ok(self.state().seasons.get(&(id.to_string(), season)).cloned())
    }

    fn update_seen_movie(&self, batch: &SeenMovieBatch) -> ServiceResult<()> {
        self.update_result()?;
        self.state().seen_movies.push(batch.clone());
        Ok(())
    }

    fn update_seen_episode(&self, batch: &SeenEpisodeBatch) -> ServiceResult<()> {
        self.update_result()?;
        self.state().seen_episodes.push(batch.clone());
        Ok(())
    }

    fn update_seen_shows(&self, batches: &[SeenEpisodeBatch]) -> ServiceResult<()> {
        self.update_result()?;
        self.state().seen_shows.push(batches.to_vec());
        Ok(())
    }

    fn scrobble(&self, verb: ScrobbleVerb, item: &MediaRef, progress: f64) -> ServiceResult<()> {
        self.state().scrobbles.push((verb, item.clone(), progress));
        Ok(())
    }

    fn add_ratings(&self, ratings: &[Rated<MediaRef>]) -> ServiceResult<()> {
        self.state().added_ratings.push(ratings.to_vec());
        Ok(())
    }

    fn remove_ratings(&self, items: &[MediaRef]) -> ServiceResult<()> {
        self.state().removed_ratings.push(items.to_vec());
        Ok(())
    }

    fn watched_movies(&self) -> ServiceResult<Vec<MovieRecord>> {
        let gate = self.gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        Ok(self.state().watched_movies.clone())
    }

    fn watched_episodes(&self) -> ServiceResult<Vec<EpisodeRecord>> {
        Ok(self.state().watched_episodes.clone())
    }

    fn rated_movies(&self) -> ServiceResult<Vec<Rated<MovieRecord>>> {
        Ok(self.state().rated_movies.clone())
    }

    fn rated_episodes(&self) -> ServiceResult<Vec<Rated<EpisodeRecord>>> {
        Ok(self.state().rated_episodes.clone())
    }
}
