//! Timer lifecycle commands.

use std::io::Write;

use anyhow::{Result, bail};
use tally_core::elapsed::format_duration;
use tally_core::{TimerUpdate, Tracker};

use super::util::{resolve_timer, timer};

pub fn start<W: Write>(
    writer: &mut W,
    tracker: &mut Tracker,
    label: &str,
    folder: Option<&str>,
) -> Result<()> {
    let timer = tracker.start_timer(label, folder)?;
    writeln!(writer, "Started {} ({})", timer.label, timer.id)?;
    Ok(())
}

pub fn stop<W: Write>(writer: &mut W, tracker: &mut Tracker, query: &str) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    let stopped = tracker.stop_timer(&id)?;
    let timer = timer(tracker, &id)?;
    if stopped {
        let elapsed = tracker.timer_elapsed_ms(&id).unwrap_or_default();
        writeln!(writer, "Stopped {} at {}", timer.label, format_duration(elapsed))?;
    } else {
        writeln!(writer, "{} was not running", timer.label)?;
    }
    Ok(())
}

pub fn stop_all<W: Write>(writer: &mut W, tracker: &mut Tracker) -> Result<()> {
    let paused = tracker.stop_all_timers(None)?;
    writeln!(writer, "Paused {paused} session(s)")?;
    Ok(())
}

pub fn resume<W: Write>(writer: &mut W, tracker: &mut Tracker, query: &str) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    if tracker.is_timer_running(&id) {
        writeln!(writer, "{} is already running", timer(tracker, &id)?.label)?;
        return Ok(());
    }
    let resumed = tracker.resume_timer(&id)?;
    let timer = timer(tracker, &id)?;
    if resumed {
        writeln!(writer, "Resumed {}", timer.label)?;
    } else {
        writeln!(writer, "{} has no session to resume", timer.label)?;
    }
    Ok(())
}

pub fn archive<W: Write>(
    writer: &mut W,
    tracker: &mut Tracker,
    query: &str,
    undo: bool,
) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    let changed = tracker.archive_timer(&id, !undo)?;
    let timer = timer(tracker, &id)?;
    let state = if timer.archived { "archived" } else { "active" };
    if changed {
        writeln!(writer, "{} is now {state}", timer.label)?;
    } else {
        writeln!(writer, "{} is already {state}", timer.label)?;
    }
    Ok(())
}

pub fn delete<W: Write>(writer: &mut W, tracker: &mut Tracker, query: &str) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    let label = timer(tracker, &id)?.label.clone();
    tracker.delete_timer(&id)?;
    writeln!(writer, "Deleted {label}")?;
    Ok(())
}

pub fn rename<W: Write>(
    writer: &mut W,
    tracker: &mut Tracker,
    query: &str,
    label: &str,
) -> Result<()> {
    if label.trim().is_empty() {
        bail!("timer label cannot be empty");
    }
    let id = resolve_timer(tracker, query)?;
    let timer = tracker.edit_timer(
        &id,
        TimerUpdate {
            label: Some(label.to_string()),
            ..TimerUpdate::default()
        },
    )?;
    writeln!(writer, "Renamed to {}", timer.label)?;
    Ok(())
}

pub fn move_timer<W: Write>(
    writer: &mut W,
    tracker: &mut Tracker,
    query: &str,
    folder: Option<&str>,
    offset: Option<isize>,
) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    let moved = match (folder, offset) {
        (Some(folder), None) => tracker.move_timer_to_folder(&id, Some(folder))?,
        (None, Some(offset)) => tracker.move_timer_by_offset(&id, offset)?,
        _ => bail!("pass exactly one of --folder or --offset"),
    };
    let timer = timer(tracker, &id)?;
    if moved {
        let folder = timer.folder_path.as_deref().unwrap_or("(top level)");
        writeln!(writer, "Moved {} in {folder}", timer.label)?;
    } else {
        writeln!(writer, "{} did not move", timer.label)?;
    }
    Ok(())
}

pub fn log<W: Write>(writer: &mut W, tracker: &Tracker, query: &str) -> Result<()> {
    let id = resolve_timer(tracker, query)?;
    for line in &timer(tracker, &id)?.logs {
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

pub fn set_enabled<W: Write>(writer: &mut W, tracker: &mut Tracker, enabled: bool) -> Result<()> {
    tracker.set_enabled(enabled)?;
    let state = if enabled { "enabled" } else { "disabled" };
    writeln!(writer, "Tracking {state}")?;
    Ok(())
}
