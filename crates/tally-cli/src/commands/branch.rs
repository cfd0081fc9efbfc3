//! Branch automation commands.

use std::io::Write;

use anyhow::Result;
use tally_core::Tracker;
use tally_store::SqliteStore;

use super::util::save_current_branch;

pub fn checkout<W: Write>(
    writer: &mut W,
    tracker: &mut Tracker,
    store: &mut SqliteStore,
    branch: &str,
) -> Result<()> {
    if tracker.on_branch_checkout(branch)? {
        save_current_branch(store, tracker)?;
        writeln!(writer, "Tracking branch {branch}")?;
    } else {
        writeln!(writer, "Branch {branch} unchanged")?;
    }
    Ok(())
}

pub fn commit<W: Write>(writer: &mut W, tracker: &mut Tracker, message: &str) -> Result<()> {
    if tracker.on_commit(message)? {
        let subject = message.lines().next().unwrap_or_default().trim();
        writeln!(writer, "Recorded commit: {subject}")?;
    } else {
        writeln!(writer, "No running branch session to commit")?;
    }
    Ok(())
}

pub fn ignore<W: Write>(writer: &mut W, tracker: &mut Tracker, branch: &str) -> Result<()> {
    if tracker.add_ignored_branch(branch)? {
        writeln!(writer, "Ignoring branch {branch}")?;
    } else {
        writeln!(writer, "Branch {branch} is already ignored")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use insta::assert_snapshot;
    use tally_core::{ManualClock, RecoveryPolicy};

    use crate::commands::util::open_tracker;

    #[test]
    fn checkout_commit_ignore() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("tally.db")).unwrap();
        let clock = ManualClock::at_millis(0);
        let mut tracker =
            open_tracker(&store, Arc::new(clock.clone()), RecoveryPolicy::default()).unwrap();

        let mut output = Vec::new();
        commit(&mut output, &mut tracker, "too early").unwrap();
        checkout(&mut output, &mut tracker, &mut store, "feature/x").unwrap();
        checkout(&mut output, &mut tracker, &mut store, "feature/x").unwrap();
        clock.advance_millis(1_000);
        commit(&mut output, &mut tracker, "Add parser\n\ndetails").unwrap();
        ignore(&mut output, &mut tracker, "main").unwrap();
        ignore(&mut output, &mut tracker, "main").unwrap();
        checkout(&mut output, &mut tracker, &mut store, "main").unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        No running branch session to commit
        Tracking branch feature/x
        Branch feature/x unchanged
        Recorded commit: Add parser
        Ignoring branch main
        Branch main is already ignored
        Branch main unchanged
        ");

        let reopened = open_tracker(&store, Arc::new(clock), RecoveryPolicy::default()).unwrap();
        assert_eq!(reopened.current_branch(), Some("feature/x"));
    }
}
