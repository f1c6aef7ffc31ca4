//! Binary entry point.

use anyhow::Context;
use clap::Parser;
use ontoloom::cli::{self, Cli};
use ontoloom::observability::{self, LoggingConfig};
use ontoloom::services::EngineContainer;
use ontoloom::OntoloomConfig;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init(&LoggingConfig::from_env());

    let cli = Cli::parse();
    let config =
        OntoloomConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let container = EngineContainer::open(&config).context("opening engine")?;
    cli::run(&container, cli.command).map_err(Into::into)
}
