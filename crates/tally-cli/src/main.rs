use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tally_core::{SystemClock, Tracker};
use tally_store::SqliteStore;
use tracing_subscriber::EnvFilter;

use tally_cli::commands::{branch, session, status, timer, util, watch};
use tally_cli::{Cli, Commands, Config};

/// Load config, open the database and build a tracker over it.
fn open_tracker(config_path: Option<&Path>) -> Result<(Tracker, SqliteStore, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let store = util::open_store(&config)?;
    let tracker = util::open_tracker(&store, Arc::new(SystemClock), config.policy())?;
    Ok((tracker, store, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // try_init: tracing may already be initialized in tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let (mut tracker, mut store, config) = open_tracker(cli.config.as_deref())?;
    match command {
        Commands::Status { json, all } => status::run(&mut out, &tracker, *json, *all)?,
        Commands::Start { label, folder } => {
            timer::start(&mut out, &mut tracker, label, folder.as_deref())?;
        }
        Commands::Stop { timer: query } => timer::stop(&mut out, &mut tracker, query)?,
        Commands::StopAll => timer::stop_all(&mut out, &mut tracker)?,
        Commands::Resume { timer: query } => timer::resume(&mut out, &mut tracker, query)?,
        Commands::Archive { timer: query, undo } => {
            timer::archive(&mut out, &mut tracker, query, *undo)?;
        }
        Commands::Delete { timer: query } => timer::delete(&mut out, &mut tracker, query)?,
        Commands::Rename { timer: query, label } => {
            timer::rename(&mut out, &mut tracker, query, label)?;
        }
        Commands::Session(action) => session::run(&mut out, &mut tracker, action)?,
        Commands::Move {
            timer: query,
            folder,
            offset,
        } => timer::move_timer(&mut out, &mut tracker, query, folder.as_deref(), *offset)?,
        Commands::Checkout { branch: name } => {
            branch::checkout(&mut out, &mut tracker, &mut store, name)?;
        }
        Commands::Commit { message } => branch::commit(&mut out, &mut tracker, message)?,
        Commands::Ignore { branch: name } => branch::ignore(&mut out, &mut tracker, name)?,
        Commands::Enable => timer::set_enabled(&mut out, &mut tracker, true)?,
        Commands::Disable => timer::set_enabled(&mut out, &mut tracker, false)?,
        Commands::Log { timer: query } => timer::log(&mut out, &tracker, query)?,
        Commands::Watch { repo } => watch::run(&mut out, tracker, store, &config, repo.as_deref())?,
    }
    out.flush()?;

    Ok(())
}
