//! Session commands.

use std::io::Write;

use anyhow::Result;
use tally_core::{SubTimerUpdate, Tracker};

use super::util::{resolve_session, resolve_timer, timer};
use crate::SessionAction;

pub fn run<W: Write>(writer: &mut W, tracker: &mut Tracker, action: &SessionAction) -> Result<()> {
    match action {
        SessionAction::New {
            timer: query,
            label,
            description,
            start,
        } => {
            let id = resolve_timer(tracker, query)?;
            let sub = tracker.create_subtimer(&id, label, description.clone(), *start)?;
            let state = if *start { "started" } else { "created" };
            writeln!(writer, "Session {} {state} ({})", sub.label, sub.id)?;
        }
        SessionAction::Start { timer: query, session } => {
            let id = resolve_timer(tracker, query)?;
            let sub_id = resolve_session(timer(tracker, &id)?, session)?;
            if tracker.start_subtimer(&id, &sub_id)? {
                writeln!(writer, "Resumed session {session}")?;
            } else {
                writeln!(writer, "Session {session} is already running")?;
            }
        }
        SessionAction::Stop { timer: query, session } => {
            let id = resolve_timer(tracker, query)?;
            let sub_id = resolve_session(timer(tracker, &id)?, session)?;
            if tracker.stop_subtimer(&id, &sub_id)? {
                writeln!(writer, "Paused session {session}")?;
            } else {
                writeln!(writer, "Session {session} was not running")?;
            }
        }
        SessionAction::Delete { timer: query, session } => {
            let id = resolve_timer(tracker, query)?;
            let sub_id = resolve_session(timer(tracker, &id)?, session)?;
            tracker.delete_subtimer(&id, &sub_id)?;
            writeln!(writer, "Deleted session {session}")?;
        }
        SessionAction::Rename {
            timer: query,
            session,
            label,
        } => {
            let id = resolve_timer(tracker, query)?;
            let sub_id = resolve_session(timer(tracker, &id)?, session)?;
            let sub = tracker.edit_subtimer(
                &id,
                &sub_id,
                SubTimerUpdate {
                    label: Some(label.clone()),
                    ..SubTimerUpdate::default()
                },
            )?;
            writeln!(writer, "Renamed session to {}", sub.label)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use insta::assert_snapshot;
    use tally_core::{ManualClock, MemoryStore, RecoveryPolicy};

    #[test]
    fn session_lifecycle() {
        let store = MemoryStore::new();
        let mut tracker = Tracker::open(
            store.clone(),
            store,
            Arc::new(ManualClock::at_millis(0)),
            RecoveryPolicy::default(),
        )
        .unwrap();
        tracker.start_timer("Work", None).unwrap();

        let mut output = Vec::new();
        let actions = [
            SessionAction::New {
                timer: "Work".to_string(),
                label: "Review".to_string(),
                description: None,
                start: false,
            },
            SessionAction::Start {
                timer: "Work".to_string(),
                session: "Review".to_string(),
            },
            SessionAction::Start {
                timer: "Work".to_string(),
                session: "2".to_string(),
            },
            SessionAction::Stop {
                timer: "Work".to_string(),
                session: "1".to_string(),
            },
            SessionAction::Rename {
                timer: "Work".to_string(),
                session: "Review".to_string(),
                label: "Code review".to_string(),
            },
            SessionAction::Delete {
                timer: "Work".to_string(),
                session: "Session 1:".to_string(),
            },
        ];
        for action in &actions {
            run(&mut output, &mut tracker, action).unwrap();
        }

        let output = String::from_utf8(output).unwrap();
        let first = output.lines().next().unwrap().to_string();
        assert!(first.starts_with("Session Review created ("));
        let rest: Vec<&str> = output.lines().skip(1).collect();
        assert_snapshot!(rest.join("\n"), @r"
        Resumed session Review
        Session 2 is already running
        Session 1 was not running
        Renamed session to Code review
        Deleted session Session 1:
        ");

        let id = resolve_timer(&tracker, "Work").unwrap();
        let labels: Vec<_> = timer(&tracker, &id)
            .unwrap()
            .subtimers
            .iter()
            .map(|s| s.label.clone())
            .collect();
        assert_eq!(labels, vec!["Code review"]);
    }
}
