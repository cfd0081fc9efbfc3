//! Long-running watch mode.
//!
//! On launch the tracker recovers from the previous run and lines up with the
//! repository's branch. While running it snapshots elapsed time and feeds git
//! activity to branch automation. On Ctrl-C or SIGTERM every running session
//! is paused and recorded, so a quick restart picks up where it left off.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tally_core::{SharedTracker, Tracker, VcsEvent};
use tally_store::SqliteStore;
use tokio::time::MissedTickBehavior;

use super::util::save_current_branch;
use crate::Config;
use crate::git::{GitRepo, GitWatcher};

pub fn run<W: Write>(
    writer: &mut W,
    tracker: Tracker,
    store: SqliteStore,
    config: &Config,
    repo: Option<&Path>,
) -> Result<()> {
    let runtime =
        tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    runtime.block_on(watch(writer, tracker, store, config, repo))
}

async fn watch<W: Write>(
    writer: &mut W,
    tracker: Tracker,
    mut store: SqliteStore,
    config: &Config,
    repo: Option<&Path>,
) -> Result<()> {
    let shared = SharedTracker::new(tracker);

    let report = shared.with(Tracker::startup)??;
    tracing::info!(
        resumed = report.resumed,
        corrected = report.corrected,
        discarded_marker = report.discarded_marker,
        "startup recovery finished"
    );
    if report.resumed > 0 {
        writeln!(writer, "Resumed {} session(s) paused at last exit", report.resumed)?;
    }
    if report.corrected > 0 {
        writeln!(
            writer,
            "Corrected {} session(s) after an unexpected shutdown",
            report.corrected
        )?;
    }

    run_until(writer, &shared, &mut store, config, repo, shutdown_signal()).await
}

/// Follows the repository until `stop` resolves or something fails, then
/// pauses every running session whichever way the loop ended.
async fn run_until<W, F>(
    writer: &mut W,
    shared: &SharedTracker,
    store: &mut SqliteStore,
    config: &Config,
    repo: Option<&Path>,
    stop: F,
) -> Result<()>
where
    W: Write,
    F: Future<Output = Result<()>>,
{
    let outcome = follow(writer, shared, store, config, repo, stop).await;
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "watch stopped on error");
    }

    let paused = shared.with(Tracker::shutdown)?;
    writeln!(writer, "Paused {paused} session(s) on exit")?;
    outcome
}

async fn follow<W, F>(
    writer: &mut W,
    shared: &SharedTracker,
    store: &mut SqliteStore,
    config: &Config,
    repo: Option<&Path>,
    stop: F,
) -> Result<()>
where
    W: Write,
    F: Future<Output = Result<()>>,
{
    let mut watcher = match repo.or(config.repo_path.as_deref()) {
        Some(path) => {
            let watcher = GitWatcher::new(GitRepo::discover(path)?)?;
            let branch = watcher.branch().map(str::to_string);
            shared.with(|t| t.reconcile_branch(branch.as_deref()))??;
            shared.with(|t| save_current_branch(store, t))??;
            let shown = branch.as_deref().unwrap_or("(detached)");
            writeln!(writer, "Watching {} on {shown}", path.display())?;
            Some(watcher)
        }
        None => {
            writeln!(writer, "Watching without a repository")?;
            None
        }
    };
    writer.flush()?;

    let snapshot_every = Duration::from_secs(config.snapshot_interval_secs.max(1));
    let mut snapshot = tokio::time::interval(snapshot_every);
    snapshot.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(50)));
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(stop);
    loop {
        tokio::select! {
            result = &mut stop => return result,
            _ = snapshot.tick() => {
                match shared.with(Tracker::snapshot_running)? {
                    Ok(updated) => tracing::trace!(updated, "snapshot tick"),
                    Err(e) => tracing::warn!(error = %e, "snapshot failed"),
                }
            }
            _ = poll.tick(), if watcher.is_some() => {
                if let Some(watcher) = watcher.as_mut() {
                    match watcher.poll() {
                        Ok(events) => {
                            if let Err(e) = apply_vcs_events(shared, store, &events) {
                                tracing::warn!(error = %e, "failed to apply repository events");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to read repository state"),
                    }
                }
            }
        }
    }
}

/// Feeds repository events to the tracker and records the resulting branch.
pub fn apply_vcs_events(
    shared: &SharedTracker,
    store: &mut SqliteStore,
    events: &[VcsEvent],
) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    shared.with(|tracker| -> Result<()> {
        for event in events {
            tracing::debug!(?event, "repository event");
            if let Err(e) = tracker.handle_vcs_event(event) {
                tracing::warn!(error = %e, ?event, "failed to apply repository event");
            }
        }
        save_current_branch(store, tracker)
    })?
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;

    tracing::info!("shutdown signal received");
    Ok(())
}
