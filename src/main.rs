mod app;
mod cli;
mod db;
mod error;
mod http;
mod kodi;
mod logging;
mod paths;
mod remote;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::init(cli.verbose);
    app::run(cli)
}
