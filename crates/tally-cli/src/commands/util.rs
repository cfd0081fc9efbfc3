//! Shared utilities for CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tally_core::{
    Clock, KeyValueStore, RecoveryPolicy, SubTimerId, Timer, TimerId, Tracker,
};
use tally_store::SqliteStore;

use crate::Config;

/// Key holding the branch last seen by a checkout, so one-shot invocations
/// agree on which branch is current.
pub const CURRENT_BRANCH_KEY: &str = "tally.currentBranch";

/// Opens the configured database, ensuring the parent directory exists.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// Builds a tracker over `store` and restores the last known branch.
pub fn open_tracker(
    store: &SqliteStore,
    clock: Arc<dyn Clock>,
    policy: RecoveryPolicy,
) -> Result<Tracker> {
    let mut tracker = Tracker::open(store.clone(), store.clone(), clock, policy)
        .context("failed to load tracker state")?;
    let branch = store
        .get(CURRENT_BRANCH_KEY)
        .context("failed to read current branch")?
        .and_then(|value| value.as_str().map(str::to_string));
    tracker.set_current_branch(branch);
    Ok(tracker)
}

/// Writes the tracker's current branch back to the store.
pub fn save_current_branch(store: &mut SqliteStore, tracker: &Tracker) -> Result<()> {
    let result = match tracker.current_branch() {
        Some(branch) => store.set(CURRENT_BRANCH_KEY, serde_json::Value::from(branch)),
        None => store.remove(CURRENT_BRANCH_KEY),
    };
    result.context("failed to save current branch")
}

/// Finds a timer by id, or by label when the label is unambiguous.
///
/// Unarchived timers win over archived ones with the same label.
pub fn resolve_timer(tracker: &Tracker, query: &str) -> Result<TimerId> {
    let timers = tracker.config().timers();
    if let Some(timer) = timers.iter().find(|t| t.id.as_str() == query) {
        return Ok(timer.id.clone());
    }

    let matching: Vec<&&Timer> = timers.iter().filter(|t| t.label == query).collect();
    let active: Vec<&&Timer> = matching.iter().copied().filter(|t| !t.archived).collect();
    let candidates = if active.is_empty() { matching } else { active };
    match candidates.as_slice() {
        [] => bail!("no timer matching '{query}'"),
        [timer] => Ok(timer.id.clone()),
        _ => bail!("'{query}' matches {} timers; use the timer id", candidates.len()),
    }
}

/// Finds a session of `timer` by id, label, or 1-based position.
pub fn resolve_session(timer: &Timer, query: &str) -> Result<SubTimerId> {
    if let Some(sub) = timer.subtimers.iter().find(|s| s.id.as_str() == query) {
        return Ok(sub.id.clone());
    }
    let by_label: Vec<_> = timer.subtimers.iter().filter(|s| s.label == query).collect();
    match by_label.as_slice() {
        [sub] => return Ok(sub.id.clone()),
        [] => {}
        _ => bail!("'{query}' matches {} sessions; use the session id", by_label.len()),
    }
    if let Ok(position) = query.parse::<usize>() {
        if let Some(sub) = position.checked_sub(1).and_then(|i| timer.subtimers.get(i)) {
            return Ok(sub.id.clone());
        }
    }
    bail!("no session matching '{query}' in {}", timer.label)
}

/// Looks up a timer that was just resolved.
pub fn timer<'a>(tracker: &'a Tracker, id: &TimerId) -> Result<&'a Timer> {
    tracker
        .timer(id)
        .with_context(|| format!("timer {id} disappeared"))
}
