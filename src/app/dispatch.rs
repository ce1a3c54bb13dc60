use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::action::Action;
use super::host::{Host, NOTIFICATION_LONG};
use super::mark_watched::{MarkOutcome, mark_watched};
use super::queue::{DurableQueue, QueueEntry};
use super::rating::{RatingOutcome, manual_rating};
use super::scrobbler::{ScrobbleConfig, ScrobbleSession};
use super::settings::{Settings, SettingsStore};
use super::sync::{SyncOptions, run_sync};
use crate::error::ServiceError;
use crate::remote::RemoteApi;

const IDLE_INTERVAL: Duration = Duration::from_millis(500);
const ERROR_TITLE: &str = "Trakt scrobbler error";

/// Single consumer of the durable queue. Owns the scrobble session and the
/// remote client handle, and starts at most one sync thread at a time.
pub struct Dispatcher {
    queue: DurableQueue,
    host: Arc<dyn Host>,
    remote: Arc<dyn RemoteApi>,
    settings_store: SettingsStore,
    settings: Settings,
    session: ScrobbleSession,
    sync_thread: Option<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
    idle_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: DurableQueue,
        host: Arc<dyn Host>,
        remote: Arc<dyn RemoteApi>,
        settings_store: SettingsStore,
        abort: Arc<AtomicBool>,
    ) -> Result<Self> {
        let settings = Settings::load(&settings_store).context("failed to load settings")?;
        let session = ScrobbleSession::new(
            Arc::clone(&host),
            Arc::clone(&remote),
            ScrobbleConfig::from(&settings),
        );
        Ok(Self {
            queue,
            host,
            remote,
            settings_store,
            settings,
            session,
            sync_thread: None,
            abort,
            idle_interval: IDLE_INTERVAL,
        })
    }

    #[cfg(test)]
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    #[cfg(test)]
    pub fn session(&self) -> &ScrobbleSession {
        &self.session
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Runs until the abort flag is set, then waits for any running sync.
    pub fn run(&mut self) -> Result<()> {
        info!("dispatcher started");
        while !self.aborted() {
            if let Err(err) = self.drain() {
                error!(error = %format!("{err:#}"), "failed to read queue");
            }
            if self.aborted() {
                break;
            }
            if self.host.is_playing_video() {
                if let Err(err) = self.session.update() {
                    self.report("update", err.into());
                }
            }
            thread::sleep(self.idle_interval);
        }
        info!("dispatcher shutting down");
        self.wait_for_sync();
        Ok(())
    }

    /// Dispatches every pending entry in queue order. Returns the number of
    /// entries consumed.
    pub fn drain(&mut self) -> Result<usize> {
        let mut consumed = 0;
        while !self.aborted() && self.queue.length()? > 0 {
            let Some(entry) = self.queue.pop()? else {
                break;
            };
            self.dispatch_entry(&entry);
            consumed += 1;
        }
        Ok(consumed)
    }

    fn dispatch_entry(&mut self, entry: &QueueEntry) {
        let action = match entry.decode() {
            Ok(action) => action,
            Err(err) => {
                warn!(
                    sequence_no = entry.sequence_no,
                    payload = %entry.payload,
                    error = %err,
                    "dropping unreadable queue entry"
                );
                return;
            }
        };
        let kind = action.kind();
        debug!(sequence_no = entry.sequence_no, kind, "dispatching");
        if let Err(err) = self.handle(action) {
            self.report(kind, err);
        }
    }

    pub fn handle(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Started {
                identity,
                multi_episode,
                playlist_index,
            } => self
                .session
                .playback_started(identity, multi_episode, playlist_index)?,
            Action::Ended | Action::Stopped => self.session.playback_ended()?,
            Action::Paused => self.session.playback_paused()?,
            Action::Resumed => self.session.playback_resumed()?,
            Action::Seek { .. } | Action::SeekChapter { .. } => self.session.playback_seek(),
            Action::DatabaseUpdated => {
                if self.settings.sync_on_update {
                    debug!("library updated, starting sync");
                    self.start_sync(automatic_sync(), false)?;
                }
            }
            Action::DatabaseCleaned => {
                let clean = self.settings.clean_trakt_movies || self.settings.clean_trakt_episodes;
                if self.settings.sync_on_update && clean {
                    debug!("library cleaned, starting sync");
                    self.start_sync(automatic_sync(), false)?;
                }
            }
            Action::SettingsChanged => self.reload_settings()?,
            Action::MarkWatched { request } => {
                let outcome = mark_watched(
                    self.remote.as_ref(),
                    self.host.as_ref(),
                    &request,
                    self.settings.show_marked_notification,
                )?;
                match outcome {
                    MarkOutcome::Marked(count) => debug!(count, "mark watched done"),
                    other => debug!(outcome = ?other, "nothing marked"),
                }
            }
            Action::ManualRating { request } => {
                match manual_rating(self.host.as_ref(), self.remote.as_ref(), &request)? {
                    RatingOutcome::Rated(rating) => debug!(rating, "manual rating done"),
                    other => debug!(outcome = ?other, "manual rating finished"),
                }
            }
            Action::ManualSync { silent, library } => {
                self.start_sync(SyncOptions { library, silent }, true)?;
            }
            Action::ShowSettings => self.host.open_settings()?,
            Action::ScanStarted => debug!("library scan started"),
        }
        Ok(())
    }

    fn reload_settings(&mut self) -> Result<()> {
        debug!("settings changed, reloading");
        self.settings = Settings::load(&self.settings_store)?;
        self.session.set_config(ScrobbleConfig::from(&self.settings));
        self.remote.reload_settings()?;
        Ok(())
    }

    pub fn sync_in_progress(&mut self) -> bool {
        let finished = self
            .sync_thread
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if finished {
            self.wait_for_sync();
        }
        self.sync_thread.is_some()
    }

    /// Joins the sync thread, if one was started.
    pub fn wait_for_sync(&mut self) {
        if let Some(handle) = self.sync_thread.take() {
            if handle.join().is_err() {
                error!("sync thread panicked");
            }
        }
    }

    fn start_sync(&mut self, options: SyncOptions, manual: bool) -> Result<()> {
        if self.sync_in_progress() {
            if manual {
                return Err(ServiceError::ConcurrentSyncRejected.into());
            }
            debug!("sync already running, skipping automatic sync");
            return Ok(());
        }

        let host = Arc::clone(&self.host);
        let remote = Arc::clone(&self.remote);
        let handle = thread::Builder::new()
            .name("trakt-sync".to_string())
            .spawn(move || {
                if let Err(err) = run_sync(host.as_ref(), remote.as_ref(), options) {
                    error!(error = %err, "sync failed");
                    host.notify("Trakt sync failed", &err.to_string(), NOTIFICATION_LONG);
                }
            })
            .context("failed to spawn sync thread")?;
        if manual {
            info!(library = ?options.library, "manual sync started");
        }
        self.sync_thread = Some(handle);
        Ok(())
    }

    fn report(&self, kind: &str, err: anyhow::Error) {
        match err.downcast_ref::<ServiceError>() {
            Some(ServiceError::StaleIdentity(detail)) => {
                debug!(kind, detail = %detail, "item no longer in library, dropping action");
            }
            Some(ServiceError::MalformedAction(detail)) => {
                warn!(kind, detail = %detail, "malformed action dropped");
            }
            _ => {
                error!(kind, error = %format!("{err:#}"), "action failed");
                self.host
                    .notify(ERROR_TITLE, &err.to_string(), NOTIFICATION_LONG);
            }
        }
    }
}

/// Syncs started by library events run without progress notifications.
fn automatic_sync() -> SyncOptions {
    SyncOptions {
        silent: true,
        ..SyncOptions::default()
    }
}
