//! Status command: timers grouped by folder with their elapsed time.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;
use tally_core::elapsed::{
    format_duration, is_running, subtimer_elapsed_ms, timer_elapsed_ms, timer_is_running,
};
use tally_core::{Timer, Tracker};

#[derive(Serialize)]
struct StatusView<'a> {
    enabled: bool,
    current_branch: Option<&'a str>,
    timers: Vec<TimerView<'a>>,
}

#[derive(Serialize)]
struct TimerView<'a> {
    id: &'a str,
    label: &'a str,
    folder_path: Option<&'a str>,
    branch_name: Option<&'a str>,
    archived: bool,
    running: bool,
    elapsed_ms: i64,
    sessions: Vec<SessionView<'a>>,
}

#[derive(Serialize)]
struct SessionView<'a> {
    id: &'a str,
    label: &'a str,
    description: Option<&'a str>,
    running: bool,
    elapsed_ms: i64,
}

const fn mark(running: bool) -> char {
    if running { '*' } else { ' ' }
}

pub fn run<W: Write>(writer: &mut W, tracker: &Tracker, json: bool, all: bool) -> Result<()> {
    let now = tracker.now();
    let timers: Vec<&Timer> = tracker
        .config()
        .timers()
        .into_iter()
        .filter(|t| all || !t.archived)
        .collect();

    if json {
        let view = StatusView {
            enabled: tracker.config().enabled,
            current_branch: tracker.current_branch(),
            timers: timers
                .iter()
                .map(|t| TimerView {
                    id: t.id.as_str(),
                    label: &t.label,
                    folder_path: t.folder_path.as_deref(),
                    branch_name: t.branch_name.as_deref(),
                    archived: t.archived,
                    running: timer_is_running(t),
                    elapsed_ms: timer_elapsed_ms(t, now),
                    sessions: t
                        .subtimers
                        .iter()
                        .map(|s| SessionView {
                            id: s.id.as_str(),
                            label: &s.label,
                            description: s.description.as_deref(),
                            running: is_running(s),
                            elapsed_ms: subtimer_elapsed_ms(s, now),
                        })
                        .collect(),
                })
                .collect(),
        };
        writeln!(writer, "{}", serde_json::to_string_pretty(&view)?)?;
        return Ok(());
    }

    let enabled = if tracker.config().enabled { "enabled" } else { "disabled" };
    writeln!(writer, "Tracking: {enabled}")?;
    writeln!(writer, "Current branch: {}", tracker.current_branch().unwrap_or("(none)"))?;

    if timers.is_empty() {
        writeln!(writer, "No timers.")?;
        return Ok(());
    }

    writeln!(writer)?;
    let mut group: Option<Option<&str>> = None;
    for timer in timers {
        let folder = timer.folder_path.as_deref();
        if group != Some(folder) {
            writeln!(writer, "{}", folder.unwrap_or("(top level)"))?;
            group = Some(folder);
        }

        let mut tags = String::new();
        if timer.branch_name.is_some() {
            tags.push_str("  [branch]");
        }
        if timer.archived {
            tags.push_str("  (archived)");
        }
        writeln!(
            writer,
            "  {} {}  {}{tags}",
            mark(timer_is_running(timer)),
            timer.label,
            format_duration(timer_elapsed_ms(timer, now))
        )?;

        for sub in &timer.subtimers {
            let description = sub
                .description
                .as_deref()
                .map(|d| format!(" - {d}"))
                .unwrap_or_default();
            writeln!(
                writer,
                "      {} {}  {}{description}",
                mark(is_running(sub)),
                sub.label,
                format_duration(subtimer_elapsed_ms(sub, now))
            )?;
        }
    }

    Ok(())
}
