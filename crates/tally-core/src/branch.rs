//! Branch automation.
//!
//! Timers tagged with a `branch_name` follow version-control activity: a
//! checkout moves tracking to the branch's timer and a commit closes the
//! running session under the commit's subject line.

use crate::elapsed::is_running;
use crate::error::TrackerError;
use crate::model::{DEFAULT_SESSION_LABEL, Timer};
use crate::tracker::{Tracker, pause_session, pause_timer_sessions, start_new_session};

/// An event reported by the version-control watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsEvent {
    BranchCheckout(String),
    Commit(String),
}

fn is_branch_timer(timer: &Timer, name: &str) -> bool {
    !timer.archived && timer.branch_name.as_deref() == Some(name)
}

impl Tracker {
    pub fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    /// Records the branch without running any automation.
    pub fn set_current_branch(&mut self, branch: Option<String>) {
        self.current_branch = branch;
    }

    /// Moves tracking to the timer of branch `name`.
    ///
    /// Running sessions of other branch timers are paused; untagged timers are
    /// left alone. Returns false when tracking is disabled, the branch is
    /// ignored, or it is already current.
    pub fn on_branch_checkout(&mut self, name: &str) -> Result<bool, TrackerError> {
        self.refresh()?;
        if !self.config.enabled {
            tracing::debug!(branch = name, "checkout ignored: tracking disabled");
            return Ok(false);
        }
        if self.config.ignored_branches.iter().any(|b| b == name) {
            tracing::debug!(branch = name, "checkout ignored: branch is ignored");
            return Ok(false);
        }
        if self.current_branch.as_deref() == Some(name) {
            return Ok(false);
        }

        let now = self.now();
        let previous = self.current_branch.take();
        let previous_label = previous.as_deref().unwrap_or("(none)").to_string();

        self.config.for_each_timer_mut(|timer| {
            if timer.branch_name.as_deref().is_some_and(|b| b != name) {
                pause_timer_sessions(timer, now, "");
            }
        });

        let switched = format!("Switched from {previous_label} to {name}");
        if let Some(old) = previous.as_deref() {
            if let Some(timer) = self.config.find_timer_by_mut(|t| is_branch_timer(t, old)) {
                timer.push_log(now, &switched);
            }
        }

        if let Some(timer) = self.config.find_timer_by_mut(|t| is_branch_timer(t, name)) {
            pause_timer_sessions(timer, now, "");
            timer.push_log(now, &switched);
            let label = timer.next_session_label();
            start_new_session(timer, label, None, now);
            tracing::info!(branch = name, timer_id = %timer.id, "switched branch timer");
        } else if self.config.auto_create_on_branch_checkout {
            let mut timer = Timer::new(name, None, Some(name.to_string()), now);
            timer.push_log(now, "Branch timer created");
            timer.push_log(now, format!("Checked out {name}"));
            start_new_session(&mut timer, DEFAULT_SESSION_LABEL.to_string(), None, now);
            tracing::info!(branch = name, timer_id = %timer.id, "created branch timer");
            self.config.insert_timer(timer);
        } else {
            tracing::debug!(branch = name, "no branch timer and auto-create is off");
        }

        self.current_branch = Some(name.to_string());
        self.persist()?;
        Ok(true)
    }

    /// Closes the running session of the current branch timer under the
    /// commit's first line and starts the next session.
    pub fn on_commit(&mut self, message: &str) -> Result<bool, TrackerError> {
        let Some(branch) = self.current_branch.clone() else {
            tracing::debug!("commit ignored: no current branch");
            return Ok(false);
        };
        let subject = message.lines().next().unwrap_or_default().trim().to_string();
        let now = self.begin()?;

        let Some(timer) = self.config.find_timer_by_mut(|t| is_branch_timer(t, &branch)) else {
            tracing::debug!(%branch, "commit ignored: no branch timer");
            return Ok(false);
        };
        let Some(index) = timer.subtimers.iter().rposition(is_running) else {
            tracing::debug!(%branch, "commit ignored: no running session");
            return Ok(false);
        };

        let sub = &mut timer.subtimers[index];
        sub.label = format!("Session {} - Commit: {subject}", index + 1);
        pause_session(sub, now);
        timer.push_log(now, format!("Commit: {subject}"));
        let label = timer.next_session_label();
        start_new_session(timer, label, None, now);
        tracing::info!(%branch, commit = %subject, "closed session on commit");

        self.persist()?;
        Ok(true)
    }

    /// Aligns the tracker with the branch checked out right now.
    ///
    /// Used at startup: a branch different from the last known one is treated
    /// as a checkout. `None` (detached or not a repository) changes nothing.
    pub fn reconcile_branch(&mut self, current: Option<&str>) -> Result<bool, TrackerError> {
        match current {
            Some(name) if self.current_branch.as_deref() != Some(name) => {
                self.on_branch_checkout(name)
            }
            _ => Ok(false),
        }
    }

    pub fn handle_vcs_event(&mut self, event: &VcsEvent) -> Result<bool, TrackerError> {
        match event {
            VcsEvent::BranchCheckout(name) => self.on_branch_checkout(name),
            VcsEvent::Commit(message) => self.on_commit(message),
        }
    }
}
