pub(crate) mod action;
mod dispatch;
pub(crate) mod host;
mod mark_watched;
mod normalizer;
mod queue;
mod rating;
mod scrobbler;
pub(crate) mod settings;
mod signals;
mod sync;
mod title;

#[cfg(test)]
mod test_support;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{Cli, Command, ConfigCommand, MarkWatchedArgs, RateArgs, RunArgs};
use crate::db::Database;
use crate::kodi::{KodiEventListener, KodiHost};
use crate::paths::resolve_database_path;
use crate::remote::{RemoteApi, TraktClient};

use self::action::{Action, MarkWatchedRequest, MediaKind, RatingAction, RatingRequest};
use self::dispatch::Dispatcher;
use self::host::Host;
use self::normalizer::EventNormalizer;
use self::queue::DurableQueue;
use self::settings::{Settings, SettingsStore};

pub fn run(cli: Cli) -> Result<()> {
    let db = Arc::new(open_db(cli.db)?);
    let queue = DurableQueue::new(Arc::clone(&db));
    let settings = SettingsStore::new(Arc::clone(&db));

    match cli.command {
        Command::Run(args) => run_service(&args, queue, settings)?,
        Command::Sync { library, silent } => {
            enqueue(&queue, &Action::ManualSync { silent, library })?
        }
        Command::MarkWatched(args) => {
            let request = mark_watched_request(&args)?;
            enqueue(&queue, &Action::MarkWatched { request })?
        }
        Command::Rate(args) => enqueue(
            &queue,
            &Action::ManualRating {
                request: rating_request(args),
            },
        )?,
        Command::Settings => enqueue(&queue, &Action::ShowSettings)?,
        Command::Config { command } => run_config(command, &queue, &settings)?,
        Command::Auth { pin } => run_auth(settings, &pin)?,
        Command::Queue => run_queue_list(&queue)?,
        Command::Purge => {
            let removed = queue.purge()?;
            println!("Removed {removed} pending entries.");
        }
    }

    Ok(())
}

fn run_service(args: &RunArgs, queue: DurableQueue, settings: SettingsStore) -> Result<()> {
    let abort = signals::install_abort_handlers()?;

    let startup = Settings::load(&settings)?;
    if startup.startup_delay_secs > 0 {
        info!(seconds = startup.startup_delay_secs, "delaying startup");
        sleep_unless_aborted(&abort, Duration::from_secs(startup.startup_delay_secs));
    }

    let removed = queue.purge()?;
    info!(removed, "service starting");

    let host: Arc<dyn Host> = Arc::new(KodiHost::new(&args.kodi_url));
    let remote: Arc<dyn RemoteApi> = Arc::new(TraktClient::new(settings.clone())?);

    let mut normalizer =
        EventNormalizer::new(Arc::clone(&host), queue.clone(), settings.clone());
    let listener = KodiEventListener::new(&args.kodi_events, Arc::clone(&abort));
    let events = thread::Builder::new()
        .name("host-events".to_string())
        .spawn(move || listener.run(&mut normalizer))
        .context("failed to spawn host event thread")?;

    let mut dispatcher = Dispatcher::new(queue, host, remote, settings, Arc::clone(&abort))?;
    let result = dispatcher.run();

    abort.store(true, Ordering::SeqCst);
    if events.join().is_err() {
        warn!("host event thread panicked");
    }
    info!("service stopped");
    result
}

fn sleep_unless_aborted(abort: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    while waited < total && !abort.load(Ordering::SeqCst) {
        thread::sleep(step);
        waited += step;
    }
}

fn enqueue(queue: &DurableQueue, action: &Action) -> Result<()> {
    let seq = queue.push(action)?;
    println!("Queued {} (#{seq}).", action.kind());
    Ok(())
}

fn mark_watched_request(args: &MarkWatchedArgs) -> Result<MarkWatchedRequest> {
    let id = args.id.clone();
    let request = match args.media_type {
        MediaKind::Movie => MarkWatchedRequest::Movie { id },
        MediaKind::Episode => {
            let (Some(season), Some(episode)) = (args.season, args.episode) else {
                bail!("--season and --episode are required for an episode");
            };
            MarkWatchedRequest::Episode {
                id,
                season,
                episode,
            }
        }
        MediaKind::Season => {
            let Some(season) = args.season else {
                bail!("--season is required for a season");
            };
            if args.episodes.is_empty() {
                bail!("--episodes is required for a season");
            }
            MarkWatchedRequest::Season {
                id,
                season,
                episodes: args.episodes.clone(),
            }
        }
        MediaKind::Show => {
            let Some(raw) = args.seasons.as_deref() else {
                bail!("--seasons is required for a show");
            };
            MarkWatchedRequest::Show {
                id,
                seasons: parse_season_map(raw)?,
            }
        }
    };
    Ok(request)
}

/// Parses `1=1,2;2=3` into season -> episodes.
fn parse_season_map(raw: &str) -> Result<BTreeMap<u32, Vec<u32>>> {
    let mut seasons = BTreeMap::new();
    for part in raw.split(';').map(str::trim).filter(|part| !part.is_empty()) {
        let Some((season, episodes)) = part.split_once('=') else {
            bail!("invalid season entry `{part}`, expected SEASON=EP,EP");
        };
        let season: u32 = season
            .trim()
            .parse()
            .with_context(|| format!("invalid season number `{season}`"))?;
        let episodes = episodes
            .split(',')
            .map(str::trim)
            .filter(|ep| !ep.is_empty())
            .map(|ep| {
                ep.parse::<u32>()
                    .with_context(|| format!("invalid episode number `{ep}`"))
            })
            .collect::<Result<Vec<_>>>()?;
        seasons.insert(season, episodes);
    }
    if seasons.is_empty() {
        bail!("no seasons given");
    }
    Ok(seasons)
}

fn rating_request(args: RateArgs) -> RatingRequest {
    RatingRequest {
        action: if args.unrate {
            RatingAction::Unrate
        } else {
            RatingAction::Rate
        },
        media_type: args.media_type,
        remote_id: args.id,
        library_id: args.library_id,
        season: args.season,
        episode: args.episode,
        rating: args.rating,
    }
}

fn run_config(command: ConfigCommand, queue: &DurableQueue, settings: &SettingsStore) -> Result<()> {
    match command {
        ConfigCommand::Get { key } => match settings.get_string(&key)? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set."),
        },
        ConfigCommand::Set { key, value } => {
            settings.set(&key, &value)?;
            queue.push(&Action::SettingsChanged)?;
            println!("{key} = {value}");
        }
        ConfigCommand::List => {
            let rows = settings.all()?;
            if rows.is_empty() {
                println!("No settings stored yet.");
            }
            for (key, value) in rows {
                println!("{key:<28} {value}");
            }
        }
    }
    Ok(())
}

fn run_auth(settings: SettingsStore, pin: &str) -> Result<()> {
    let client = TraktClient::new(settings)?;
    client
        .authenticate(pin.trim())
        .context("could not exchange PIN")?;
    println!("Authenticated with Trakt.");
    Ok(())
}

fn run_queue_list(queue: &DurableQueue) -> Result<()> {
    let entries = queue.entries()?;
    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<8} {:<20} {:<32}", "SEQ", "ACTION", "QUEUED AT");
    for entry in entries {
        let kind = entry
            .decode()
            .map(|action| action.kind())
            .unwrap_or("(unreadable)");
        println!("{:<8} {:<20} {:<32}", entry.sequence_no, kind, entry.queued_at);
    }
    Ok(())
}

fn open_db(override_path: Option<PathBuf>) -> Result<Database> {
    let db_path = resolve_database_path(override_path)?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
