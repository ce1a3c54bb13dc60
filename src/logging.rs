use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "trakt_scrobbler=info";

/// Installs the stderr subscriber. `RUST_LOG` overrides the default filter,
/// `verbose` raises it to debug.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "trakt_scrobbler=debug"
        } else {
            DEFAULT_FILTER
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
