//! Timer and session lifecycle.
//!
//! [`Tracker`] owns the [`TrackerConfig`] aggregate. Every mutating operation
//! samples the clock once, mutates in memory, then saves the whole aggregate
//! and broadcasts [`ConfigChanged`]. Operations that find nothing to change
//! return without saving.
//!
//! # Exclusivity
//!
//! The scope of "only one thing runs" differs per operation:
//! - [`Tracker::start_timer`] and [`Tracker::resume_timer`] pause every running
//!   session in the tree.
//! - [`Tracker::create_subtimer`] and [`Tracker::start_subtimer`] only pause
//!   sibling sessions of the same timer.
//! - Branch checkout only pauses other branch timers.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use chrono::{DateTime, Utc};

use crate::elapsed::{is_running, running_segment_ms, timer_elapsed_ms, timer_is_running};
use crate::error::TrackerError;
use crate::model::{DEFAULT_SESSION_LABEL, SubTimer, Timer, TrackerConfig};
use crate::ports::{Clock, KeyValueStore, Persistence, StoreError};
use crate::recovery::{RecoveryPolicy, apply_drift_check};
use crate::store::normalize_folder_path;
use crate::types::{SubTimerId, TimerId};

/// Broadcast after every successful save, and after reloading a config
/// saved by another writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChanged {
    /// Stored revision now held in memory.
    pub revision: u64,
}

/// Fields of a timer that may be edited directly.
///
/// Running state is derived from sessions, so there is deliberately no end
/// time here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerUpdate {
    pub label: Option<String>,
    /// `Some(None)` clears the branch tag.
    pub branch_name: Option<Option<String>>,
}

/// Fields of a session that may be edited directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubTimerUpdate {
    pub label: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

/// Pauses a running session, folding its current segment into the total.
///
/// Returns false if it was already paused.
pub(crate) fn pause_session(sub: &mut SubTimer, now: DateTime<Utc>) -> bool {
    if !is_running(sub) {
        return false;
    }
    let total = sub.total_elapsed_ms.unwrap_or(0) + running_segment_ms(sub, now);
    sub.total_elapsed_ms = Some(total);
    sub.end_time = Some(now);
    sub.last_persisted_elapsed_ms = Some(total);
    true
}

/// Pauses every running session of a timer, logging each one.
pub(crate) fn pause_timer_sessions(timer: &mut Timer, now: DateTime<Utc>, reason: &str) -> usize {
    let mut paused = Vec::new();
    for sub in &mut timer.subtimers {
        if pause_session(sub, now) {
            paused.push(sub.label.clone());
        }
    }
    for label in &paused {
        timer.push_log(now, format!("Paused {label}{reason}"));
    }
    paused.len()
}

/// Appends a running session, pausing the timer's other sessions first.
pub(crate) fn start_new_session(
    timer: &mut Timer,
    label: String,
    description: Option<String>,
    now: DateTime<Utc>,
) -> SubTimer {
    for sub in &mut timer.subtimers {
        pause_session(sub, now);
    }
    let sub = SubTimer::running(label, description, now);
    timer.push_log(now, format!("Started {}", sub.label));
    timer.subtimers.push(sub.clone());
    sub
}

/// Owner of the timer aggregate and its collaborators.
pub struct Tracker {
    pub(crate) config: TrackerConfig,
    persistence: Box<dyn Persistence>,
    pub(crate) kv: Box<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    pub(crate) policy: RecoveryPolicy,
    pub(crate) current_branch: Option<String>,
    subscribers: Vec<Sender<ConfigChanged>>,
    revision: u64,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("policy", &self.policy)
            .field("current_branch", &self.current_branch)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Loads the aggregate from `persistence`, starting empty if nothing was
    /// saved before.
    pub fn open(
        persistence: impl Persistence + 'static,
        kv: impl KeyValueStore + 'static,
        clock: Arc<dyn Clock>,
        policy: RecoveryPolicy,
    ) -> Result<Self, TrackerError> {
        let (config, revision) = persistence
            .load()?
            .map_or_else(|| (TrackerConfig::default(), 0), |s| (s.config, s.revision));
        tracing::debug!(timers = config.timers().len(), revision, "loaded tracker config");
        Ok(Self {
            config,
            persistence: Box::new(persistence),
            kv: Box::new(kv),
            clock,
            policy,
            current_branch: None,
            subscribers: Vec::new(),
            revision,
        })
    }

    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub const fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Receives a [`ConfigChanged`] after every save or reload.
    pub fn subscribe(&mut self) -> Receiver<ConfigChanged> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Saves the whole aggregate and notifies subscribers.
    ///
    /// The save only lands if nobody else saved since this tracker last read
    /// the store. On a conflict the local change is dropped, the stored
    /// aggregate is reloaded and the conflict is returned. On any other
    /// failure the in-memory state is kept, so calling this again retries
    /// the same save.
    pub fn persist(&mut self) -> Result<(), TrackerError> {
        match self.persistence.save(&self.config, self.revision) {
            Ok(revision) => self.revision = revision,
            Err(StoreError::Conflict { expected, found }) => {
                tracing::warn!(
                    expected,
                    found,
                    "config changed by another writer; dropping local change"
                );
                self.refresh()?;
                return Err(StoreError::Conflict { expected, found }.into());
            }
            Err(e) => return Err(e.into()),
        }
        self.notify();
        Ok(())
    }

    /// Reloads the aggregate if another writer saved since it was last read.
    pub fn refresh(&mut self) -> Result<bool, TrackerError> {
        let stored = self.persistence.revision()?;
        if stored == self.revision {
            return Ok(false);
        }
        let (config, revision) = self
            .persistence
            .load()?
            .map_or_else(|| (TrackerConfig::default(), 0), |s| (s.config, s.revision));
        tracing::debug!(from = self.revision, to = revision, "reloaded config saved elsewhere");
        self.config = config;
        self.revision = revision;
        self.notify();
        Ok(true)
    }

    /// Picks up saves from other writers, then samples the clock once for
    /// the operation about to run.
    pub(crate) fn begin(&mut self) -> Result<DateTime<Utc>, TrackerError> {
        self.refresh()?;
        Ok(self.clock.now())
    }

    fn notify(&mut self) {
        let event = ConfigChanged {
            revision: self.revision,
        };
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn timer(&self, id: &TimerId) -> Option<&Timer> {
        self.config.find_timer(id)
    }

    /// True if any session of the timer is running.
    pub fn is_timer_running(&self, id: &TimerId) -> bool {
        self.config.find_timer(id).is_some_and(timer_is_running)
    }

    pub fn running_timers(&self) -> Vec<&Timer> {
        self.config
            .timers()
            .into_iter()
            .filter(|t| timer_is_running(t))
            .collect()
    }

    /// Elapsed time of a timer right now.
    pub fn timer_elapsed_ms(&self, id: &TimerId) -> Option<i64> {
        let now = self.clock.now();
        self.config.find_timer(id).map(|t| timer_elapsed_ms(t, now))
    }

    fn timer_mut(&mut self, id: &TimerId) -> Result<&mut Timer, TrackerError> {
        self.config
            .find_timer_mut(id)
            .ok_or_else(|| TrackerError::timer_not_found(id))
    }

    /// Pauses running sessions in every timer except `exclude`.
    fn pause_all_except(&mut self, exclude: Option<&TimerId>, now: DateTime<Utc>) -> usize {
        let mut paused = 0;
        self.config.for_each_timer_mut(|timer| {
            if exclude != Some(&timer.id) {
                paused += pause_timer_sessions(timer, now, "");
            }
        });
        paused
    }

    /// Resumes one paused session without saving.
    ///
    /// Pauses its siblings, backfills legacy totals and runs the drift check
    /// before the session starts running again.
    pub(crate) fn resume_session(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
        now: DateTime<Utc>,
    ) -> bool {
        let policy = self.policy;
        let Some(timer) = self.config.find_timer_mut(timer_id) else {
            tracing::debug!(%timer_id, "resume skipped: timer not found");
            return false;
        };
        let Some(index) = timer.subtimers.iter().position(|s| &s.id == subtimer_id) else {
            tracing::debug!(%timer_id, %subtimer_id, "resume skipped: session not found");
            return false;
        };
        if is_running(&timer.subtimers[index]) {
            return false;
        }

        for (i, sibling) in timer.subtimers.iter_mut().enumerate() {
            if i != index {
                pause_session(sibling, now);
            }
        }

        let sub = &mut timer.subtimers[index];
        if sub.total_elapsed_ms.is_none() {
            let end = sub.end_time.unwrap_or(now);
            sub.total_elapsed_ms = Some((end - sub.start_time).num_milliseconds().max(0));
        }
        let correction = apply_drift_check(sub, now, &policy);
        sub.end_time = None;
        sub.last_resume_time = Some(now);
        let label = sub.label.clone();

        if let Some(correction) = correction {
            tracing::warn!(
                %timer_id,
                session = %label,
                from_ms = correction.from_ms,
                to_ms = correction.to_ms,
                "clamped elapsed time after unexpected shutdown"
            );
            timer.push_log(now, correction.log_message(&label));
        }
        timer.push_log(now, format!("Resumed {label}"));
        true
    }

    /// Creates a timer with one running session, pausing everything else.
    pub fn start_timer(
        &mut self,
        label: &str,
        folder_path: Option<&str>,
    ) -> Result<Timer, TrackerError> {
        let now = self.begin()?;
        let paused = self.pause_all_except(None, now);

        let mut timer = Timer::new(label, normalize_folder_path(folder_path), None, now);
        timer.push_log(now, "Timer created");
        timer.push_log(now, "Timer started");
        let id = timer.id.clone();
        self.config.insert_timer(timer);
        self.persist()?;
        tracing::info!(timer_id = %id, label, paused, "started timer");

        self.create_subtimer(&id, DEFAULT_SESSION_LABEL, None, true)?;
        self.config
            .find_timer(&id)
            .cloned()
            .ok_or_else(|| TrackerError::timer_not_found(&id))
    }

    /// Pauses every running session of one timer.
    pub fn stop_timer(&mut self, id: &TimerId) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        let Some(timer) = self.config.find_timer_mut(id) else {
            tracing::debug!(timer_id = %id, "stop skipped: timer not found");
            return Ok(false);
        };
        if pause_timer_sessions(timer, now, "") == 0 {
            return Ok(false);
        }
        self.persist()?;
        tracing::info!(timer_id = %id, "stopped timer");
        Ok(true)
    }

    /// Pauses every running session in the tree except in `exclude`.
    ///
    /// Returns the number of sessions paused.
    pub fn stop_all_timers(&mut self, exclude: Option<&TimerId>) -> Result<usize, TrackerError> {
        let now = self.begin()?;
        let paused = self.pause_all_except(exclude, now);
        if paused > 0 {
            self.persist()?;
            tracing::info!(paused, "stopped all timers");
        }
        Ok(paused)
    }

    /// Pauses everything, then resumes the timer's last session.
    pub fn resume_timer(&mut self, id: &TimerId) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        let Some(last) = self
            .config
            .find_timer(id)
            .and_then(|t| t.subtimers.last())
            .map(|s| s.id.clone())
        else {
            tracing::debug!(timer_id = %id, "resume skipped: timer not found or empty");
            return Ok(false);
        };

        let paused = self.pause_all_except(None, now);
        let resumed = self.resume_session(id, &last, now);
        if paused == 0 && !resumed {
            return Ok(false);
        }
        self.persist()?;
        tracing::info!(timer_id = %id, resumed, "resumed timer");
        Ok(resumed)
    }

    /// Archives or unarchives a timer. Archiving pauses it first.
    pub fn archive_timer(&mut self, id: &TimerId, archived: bool) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        let Some(timer) = self.config.find_timer_mut(id) else {
            tracing::debug!(timer_id = %id, "archive skipped: timer not found");
            return Ok(false);
        };
        let paused = if archived {
            pause_timer_sessions(timer, now, "")
        } else {
            0
        };
        if timer.archived == archived && paused == 0 {
            return Ok(false);
        }
        if timer.archived != archived {
            timer.archived = archived;
            timer.push_log(now, if archived { "Timer archived" } else { "Timer unarchived" });
        }
        self.persist()?;
        Ok(true)
    }

    /// Removes a timer and all of its sessions.
    pub fn delete_timer(&mut self, id: &TimerId) -> Result<bool, TrackerError> {
        self.refresh()?;
        if self.config.remove_timer(id).is_none() {
            return Ok(false);
        }
        self.persist()?;
        tracing::info!(timer_id = %id, "deleted timer");
        Ok(true)
    }

    /// Appends a session to a timer.
    ///
    /// When `start_immediately` is set, the timer's other sessions are paused
    /// and the new one runs from now; otherwise it is created already paused.
    pub fn create_subtimer(
        &mut self,
        timer_id: &TimerId,
        label: &str,
        description: Option<String>,
        start_immediately: bool,
    ) -> Result<SubTimer, TrackerError> {
        let now = self.begin()?;
        let timer = self.timer_mut(timer_id)?;
        let sub = if start_immediately {
            start_new_session(timer, label.to_string(), description, now)
        } else {
            let sub = SubTimer::stopped(label, description, now);
            timer.push_log(now, format!("Created {}", sub.label));
            timer.subtimers.push(sub.clone());
            sub
        };
        self.persist()?;
        tracing::debug!(%timer_id, subtimer_id = %sub.id, start_immediately, "created session");
        Ok(sub)
    }

    /// Resumes a paused session, pausing its siblings.
    pub fn start_subtimer(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
    ) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        if !self.resume_session(timer_id, subtimer_id, now) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Pauses one session.
    pub fn stop_subtimer(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
    ) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        let Some(timer) = self.config.find_timer_mut(timer_id) else {
            return Ok(false);
        };
        let Some(sub) = timer.subtimer_mut(subtimer_id) else {
            return Ok(false);
        };
        if !pause_session(sub, now) {
            return Ok(false);
        }
        let label = sub.label.clone();
        timer.push_log(now, format!("Paused {label}"));
        self.persist()?;
        Ok(true)
    }

    /// Removes a session. A timer left without sessions gets a fresh paused
    /// `Session 1:`.
    pub fn delete_subtimer(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
    ) -> Result<bool, TrackerError> {
        let now = self.begin()?;
        let Some(timer) = self.config.find_timer_mut(timer_id) else {
            return Ok(false);
        };
        let Some(index) = timer.subtimers.iter().position(|s| &s.id == subtimer_id) else {
            return Ok(false);
        };
        let removed = timer.subtimers.remove(index);
        timer.push_log(now, format!("Deleted {}", removed.label));
        if timer.subtimers.is_empty() {
            timer
                .subtimers
                .push(SubTimer::stopped(DEFAULT_SESSION_LABEL, None, now));
        }
        self.persist()?;
        Ok(true)
    }

    /// Shallow-merges `update` into a timer and returns the result.
    pub fn edit_timer(&mut self, id: &TimerId, update: TimerUpdate) -> Result<Timer, TrackerError> {
        let now = self.begin()?;
        let timer = self.timer_mut(id)?;
        let before = timer.clone();
        if let Some(label) = update.label {
            timer.label = label;
        }
        if let Some(branch_name) = update.branch_name {
            timer.branch_name = branch_name;
        }
        if *timer == before {
            return Ok(before);
        }
        if timer.label != before.label {
            let message = format!("Renamed from {} to {}", before.label, timer.label);
            timer.push_log(now, message);
        }
        let edited = timer.clone();
        self.persist()?;
        Ok(edited)
    }

    /// Shallow-merges `update` into a session and returns the result.
    pub fn edit_subtimer(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
        update: SubTimerUpdate,
    ) -> Result<SubTimer, TrackerError> {
        self.refresh()?;
        let timer = self.timer_mut(timer_id)?;
        let sub = timer
            .subtimer_mut(subtimer_id)
            .ok_or_else(|| TrackerError::subtimer_not_found(subtimer_id))?;
        let before = sub.clone();
        if let Some(label) = update.label {
            sub.label = label;
        }
        if let Some(description) = update.description {
            sub.description = description;
        }
        let edited = sub.clone();
        if edited != before {
            self.persist()?;
        }
        Ok(edited)
    }

    /// Rewrites the bounds of a session.
    ///
    /// With an `end`, the session becomes paused with `end - start` elapsed.
    /// Without one, a paused session is recomputed against its existing end
    /// and a running session that was never paused restarts its segment at
    /// `start`.
    pub fn update_subtimer_dates(
        &mut self,
        timer_id: &TimerId,
        subtimer_id: &SubTimerId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SubTimer, TrackerError> {
        let now = self.begin()?;
        let timer = self.timer_mut(timer_id)?;
        let sub = timer
            .subtimer_mut(subtimer_id)
            .ok_or_else(|| TrackerError::subtimer_not_found(subtimer_id))?;

        sub.start_time = start;
        match end.or(sub.end_time) {
            Some(end) => {
                let total = (end - start).num_milliseconds().max(0);
                sub.end_time = Some(end);
                sub.total_elapsed_ms = Some(total);
                sub.last_persisted_elapsed_ms = Some(total);
            }
            None => {
                if sub.total_elapsed_ms.unwrap_or(0) == 0 {
                    sub.last_resume_time = Some(start);
                }
            }
        }
        let updated = sub.clone();
        timer.push_log(now, format!("Updated dates of {}", updated.label));
        self.persist()?;
        Ok(updated)
    }

    /// Reorders a timer within its folder.
    pub fn move_timer_by_offset(
        &mut self,
        id: &TimerId,
        offset: isize,
    ) -> Result<bool, TrackerError> {
        self.refresh()?;
        if !self.config.move_timer_by_offset(id, offset) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Moves a timer to the end of another folder, creating it if needed.
    pub fn move_timer_to_folder(
        &mut self,
        id: &TimerId,
        folder_path: Option<&str>,
    ) -> Result<bool, TrackerError> {
        self.refresh()?;
        let target = normalize_folder_path(folder_path);
        match self.config.find_timer(id) {
            None => return Ok(false),
            Some(timer) if timer.folder_path == target => return Ok(false),
            Some(_) => {}
        }
        self.config.move_timer_to_folder(id, target.as_deref());
        self.persist()?;
        Ok(true)
    }

    /// Creates an empty folder. Returns false if it already exists.
    pub fn create_folder(&mut self, path: &str) -> Result<bool, TrackerError> {
        self.refresh()?;
        if normalize_folder_path(Some(path)).is_none()
            || self.config.find_folder(Some(path)).is_some()
        {
            return Ok(false);
        }
        self.config.ensure_folder(Some(path));
        self.persist()?;
        Ok(true)
    }

    pub fn rename_folder(&mut self, path: &str, new_name: &str) -> Result<bool, TrackerError> {
        self.refresh()?;
        if !self.config.rename_folder(path, new_name) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Turns tracking on or off. Turning it off pauses every running session.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<bool, TrackerError> {
        self.refresh()?;
        if self.config.enabled == enabled {
            return Ok(false);
        }
        let now = self.clock.now();
        self.config.enabled = enabled;
        if !enabled {
            self.config.for_each_timer_mut(|timer| {
                pause_timer_sessions(timer, now, " (tracking disabled)");
            });
        }
        self.persist()?;
        tracing::info!(enabled, "tracking toggled");
        Ok(true)
    }

    pub fn set_auto_create_on_branch_checkout(
        &mut self,
        enabled: bool,
    ) -> Result<bool, TrackerError> {
        self.refresh()?;
        if self.config.auto_create_on_branch_checkout == enabled {
            return Ok(false);
        }
        self.config.auto_create_on_branch_checkout = enabled;
        self.persist()?;
        Ok(true)
    }

    pub fn set_ignored_branches(&mut self, branches: Vec<String>) -> Result<bool, TrackerError> {
        self.refresh()?;
        if self.config.ignored_branches == branches {
            return Ok(false);
        }
        self.config.ignored_branches = branches;
        self.persist()?;
        Ok(true)
    }

    pub fn add_ignored_branch(&mut self, branch: &str) -> Result<bool, TrackerError> {
        self.refresh()?;
        if self.config.ignored_branches.iter().any(|b| b == branch) {
            return Ok(false);
        }
        self.config.ignored_branches.push(branch.to_string());
        self.persist()?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::elapsed::subtimer_elapsed_ms;
    use crate::ports::{ManualClock, MemoryStore};

    pub(crate) fn fixture() -> (Tracker, ManualClock, MemoryStore) {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        let store = MemoryStore::new();
        let tracker = Tracker::open(
            store.clone(),
            store.clone(),
            Arc::new(clock.clone()),
            RecoveryPolicy::default(),
        )
        .unwrap();
        (tracker, clock, store)
    }

    pub(crate) fn running_count(tracker: &Tracker, id: &TimerId) -> usize {
        tracker
            .timer(id)
            .unwrap()
            .subtimers
            .iter()
            .filter(|s| is_running(s))
            .count()
    }

    #[test]
    fn start_timer_creates_one_running_session() {
        let (mut tracker, _clock, store) = fixture();
        let timer = tracker.start_timer("Write docs", None).unwrap();

        assert_eq!(timer.subtimers.len(), 1);
        assert_eq!(timer.subtimers[0].label, "Session 1:");
        assert!(is_running(&timer.subtimers[0]));
        assert!(timer.logs.iter().any(|l| l.ends_with("Timer created")));
        assert!(timer.logs.iter().any(|l| l.ends_with("Timer started")));
        assert_eq!(tracker.config().find_folder(None).unwrap().timers.len(), 1);
        assert!(store.saved().unwrap().find_timer(&timer.id).is_some());
    }

    #[test]
    fn start_timer_is_globally_exclusive() {
        let (mut tracker, clock, _store) = fixture();
        let a = tracker.start_timer("A", None).unwrap();
        clock.advance_millis(1000);
        let b = tracker.start_timer("B", Some("Work")).unwrap();

        assert_eq!(running_count(&tracker, &a.id), 0);
        assert_eq!(running_count(&tracker, &b.id), 1);
        assert_eq!(tracker.timer_elapsed_ms(&a.id), Some(1000));
    }

    #[test]
    fn pause_and_resume_conserve_running_time() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("Focus", None).unwrap();
        clock.advance_millis(1500);
        assert!(tracker.stop_timer(&timer.id).unwrap());

        clock.advance_millis(3_600_000);
        assert!(tracker.resume_timer(&timer.id).unwrap());
        clock.advance_millis(2500);

        assert_eq!(tracker.timer_elapsed_ms(&timer.id), Some(4000));
    }

    #[test]
    fn resume_timer_pauses_everything_else() {
        let (mut tracker, clock, _store) = fixture();
        let a = tracker.start_timer("A", None).unwrap();
        let b = tracker.start_timer("B", None).unwrap();
        clock.advance_millis(10);

        assert!(tracker.resume_timer(&a.id).unwrap());
        assert_eq!(running_count(&tracker, &a.id), 1);
        assert_eq!(running_count(&tracker, &b.id), 0);
    }

    #[test]
    fn stop_timer_without_running_sessions_does_not_save() {
        let (mut tracker, _clock, store) = fixture();
        let timer = tracker.start_timer("Idle", None).unwrap();
        assert!(tracker.stop_timer(&timer.id).unwrap());
        let saves = store.save_count();

        assert!(!tracker.stop_timer(&timer.id).unwrap());
        assert_eq!(tracker.stop_all_timers(None).unwrap(), 0);
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn unknown_ids_are_noops_for_actions() {
        let (mut tracker, _clock, store) = fixture();
        let missing = TimerId::new("missing").unwrap();
        let missing_sub = SubTimerId::new("missing").unwrap();

        assert!(!tracker.stop_timer(&missing).unwrap());
        assert!(!tracker.resume_timer(&missing).unwrap());
        assert!(!tracker.archive_timer(&missing, true).unwrap());
        assert!(!tracker.start_subtimer(&missing, &missing_sub).unwrap());
        assert!(!tracker.stop_subtimer(&missing, &missing_sub).unwrap());
        assert!(!tracker.delete_subtimer(&missing, &missing_sub).unwrap());
        assert!(!tracker.delete_timer(&missing).unwrap());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn unknown_ids_are_errors_for_entity_returning_operations() {
        let (mut tracker, clock, _store) = fixture();
        let missing = TimerId::new("missing").unwrap();
        let err = tracker.create_subtimer(&missing, "x", None, true).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { entity: "timer", .. }));

        let timer = tracker.start_timer("Real", None).unwrap();
        let missing_sub = SubTimerId::new("missing").unwrap();
        let err = tracker
            .update_subtimer_dates(&timer.id, &missing_sub, clock.now(), None)
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { entity: "session", .. }));
    }

    #[test]
    fn stop_all_respects_exclusion_and_logs() {
        let (mut tracker, _clock, _store) = fixture();
        let a = tracker.start_timer("A", None).unwrap();
        let b_sub = tracker.create_subtimer(&a.id, "Session 2:", None, false).unwrap();
        let b = tracker.start_timer("B", None).unwrap();
        // start_timer paused A; restart A's session so both timers run.
        assert!(tracker.start_subtimer(&a.id, &b_sub.id).unwrap());

        assert_eq!(tracker.stop_all_timers(Some(&b.id)).unwrap(), 1);
        assert_eq!(running_count(&tracker, &a.id), 0);
        assert_eq!(running_count(&tracker, &b.id), 1);
        let logs = &tracker.timer(&a.id).unwrap().logs;
        assert!(logs.last().unwrap().ends_with("Paused Session 2:"));
    }

    #[test]
    fn create_subtimer_is_exclusive_within_timer_only() {
        let (mut tracker, _clock, _store) = fixture();
        let a = tracker.start_timer("A", None).unwrap();
        let a_first = a.subtimers[0].id.clone();
        let b = tracker.start_timer("B", None).unwrap();
        tracker.start_subtimer(&a.id, &a_first).unwrap();

        // Both timers run: subtimer operations do not reach across timers.
        assert_eq!(running_count(&tracker, &a.id), 1);
        assert_eq!(running_count(&tracker, &b.id), 1);

        let created = tracker.create_subtimer(&a.id, "Session 2:", None, true).unwrap();
        let a_now = tracker.timer(&a.id).unwrap();
        assert!(!is_running(a_now.subtimer(&a_first).unwrap()));
        assert!(is_running(a_now.subtimer(&created.id).unwrap()));
        assert_eq!(running_count(&tracker, &b.id), 1);
    }

    #[test]
    fn create_subtimer_without_start_is_paused() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let sub = tracker.create_subtimer(&timer.id, "Later", Some("notes".into()), false).unwrap();

        assert_eq!(sub.end_time, Some(clock.now()));
        assert_eq!(sub.total_elapsed_ms, Some(0));
        assert_eq!(running_count(&tracker, &timer.id), 1);
    }

    #[test]
    fn start_subtimer_backfills_legacy_totals() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("Legacy", None).unwrap();
        let sub_id = timer.subtimers[0].id.clone();
        clock.advance_millis(5000);
        tracker.stop_subtimer(&timer.id, &sub_id).unwrap();
        {
            let timer = tracker.config.find_timer_mut(&timer.id).unwrap();
            let sub = timer.subtimer_mut(&sub_id).unwrap();
            sub.total_elapsed_ms = None;
            sub.last_persisted_elapsed_ms = None;
        }
        clock.advance_millis(1000);
        assert!(tracker.start_subtimer(&timer.id, &sub_id).unwrap());

        let sub = tracker.timer(&timer.id).unwrap().subtimer(&sub_id).unwrap().clone();
        assert_eq!(sub.total_elapsed_ms, Some(5000));
        assert_eq!(sub.last_resume_time, Some(clock.now()));
        clock.advance_millis(250);
        assert_eq!(subtimer_elapsed_ms(&sub, clock.now()), 5250);
    }

    #[test]
    fn start_subtimer_on_running_session_is_noop() {
        let (mut tracker, _clock, store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let saves = store.save_count();
        assert!(!tracker.start_subtimer(&timer.id, &timer.subtimers[0].id).unwrap());
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn stop_subtimer_accumulates_and_snapshots() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let sub_id = timer.subtimers[0].id.clone();
        clock.advance_millis(1234);

        assert!(tracker.stop_subtimer(&timer.id, &sub_id).unwrap());
        assert!(!tracker.stop_subtimer(&timer.id, &sub_id).unwrap());
        let sub = tracker.timer(&timer.id).unwrap().subtimer(&sub_id).unwrap();
        assert_eq!(sub.total_elapsed_ms, Some(1234));
        assert_eq!(sub.last_persisted_elapsed_ms, Some(1234));
        assert_eq!(sub.end_time, Some(clock.now()));
    }

    #[test]
    fn deleting_last_session_synthesizes_default() {
        let (mut tracker, _clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let original = timer.subtimers[0].id.clone();
        assert!(tracker.delete_subtimer(&timer.id, &original).unwrap());

        let timer = tracker.timer(&timer.id).unwrap();
        assert_eq!(timer.subtimers.len(), 1);
        assert_eq!(timer.subtimers[0].label, "Session 1:");
        assert!(!is_running(&timer.subtimers[0]));
        assert_ne!(timer.subtimers[0].id, original);
    }

    #[test]
    fn archive_pauses_running_sessions() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        clock.advance_millis(700);

        assert!(tracker.archive_timer(&timer.id, true).unwrap());
        assert!(!tracker.is_timer_running(&timer.id));
        assert!(tracker.timer(&timer.id).unwrap().archived);
        assert_eq!(tracker.timer_elapsed_ms(&timer.id), Some(700));
        assert!(!tracker.archive_timer(&timer.id, true).unwrap());

        assert!(tracker.archive_timer(&timer.id, false).unwrap());
        assert!(!tracker.timer(&timer.id).unwrap().archived);
        assert!(!tracker.is_timer_running(&timer.id));
    }

    #[test]
    fn edit_timer_merges_fields() {
        let (mut tracker, _clock, store) = fixture();
        let timer = tracker.start_timer("Old", None).unwrap();
        let saves = store.save_count();

        let edited = tracker
            .edit_timer(
                &timer.id,
                TimerUpdate {
                    label: Some("New".to_string()),
                    ..TimerUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(edited.label, "New");
        assert_eq!(edited.subtimers, timer.subtimers);
        assert!(edited.logs.last().unwrap().ends_with("Renamed from Old to New"));
        assert_eq!(store.save_count(), saves + 1);

        tracker.edit_timer(&timer.id, TimerUpdate::default()).unwrap();
        assert_eq!(store.save_count(), saves + 1);
    }

    #[test]
    fn edit_subtimer_merges_fields() {
        let (mut tracker, _clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let sub_id = timer.subtimers[0].id.clone();

        let edited = tracker
            .edit_subtimer(
                &timer.id,
                &sub_id,
                SubTimerUpdate {
                    label: None,
                    description: Some(Some("pairing".to_string())),
                },
            )
            .unwrap();
        assert_eq!(edited.label, "Session 1:");
        assert_eq!(edited.description.as_deref(), Some("pairing"));
        assert!(is_running(&edited));
    }

    #[test]
    fn update_subtimer_dates_with_end_stops_session() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let sub_id = timer.subtimers[0].id.clone();
        let start = clock.now() - chrono::Duration::hours(2);
        let end = start + chrono::Duration::minutes(90);

        let sub = tracker.update_subtimer_dates(&timer.id, &sub_id, start, Some(end)).unwrap();
        assert_eq!(sub.total_elapsed_ms, Some(90 * 60 * 1000));
        assert!(!is_running(&sub));
    }

    #[test]
    fn update_subtimer_dates_moves_fresh_running_start() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        let sub_id = timer.subtimers[0].id.clone();
        let start = clock.now() - chrono::Duration::minutes(10);

        tracker.update_subtimer_dates(&timer.id, &sub_id, start, None).unwrap();
        assert_eq!(tracker.timer_elapsed_ms(&timer.id), Some(10 * 60 * 1000));
    }

    #[test]
    fn move_operations_only_save_on_change() {
        let (mut tracker, _clock, store) = fixture();
        let a = tracker.start_timer("A", None).unwrap();
        let b = tracker.start_timer("B", None).unwrap();
        let saves = store.save_count();

        assert!(tracker.move_timer_by_offset(&a.id, 1).unwrap());
        assert!(!tracker.move_timer_by_offset(&a.id, 1).unwrap());
        assert!(tracker.move_timer_to_folder(&a.id, Some("Work")).unwrap());
        assert!(!tracker.move_timer_to_folder(&a.id, Some("Work/")).unwrap());
        assert_eq!(store.save_count(), saves + 2);
        assert_eq!(tracker.timer(&a.id).unwrap().folder_path.as_deref(), Some("Work"));
        assert!(tracker.is_timer_running(&b.id));
    }

    #[test]
    fn disabling_pauses_everything() {
        let (mut tracker, clock, _store) = fixture();
        let timer = tracker.start_timer("A", None).unwrap();
        clock.advance_millis(100);

        assert!(tracker.set_enabled(false).unwrap());
        assert!(tracker.running_timers().is_empty());
        assert!(!tracker.set_enabled(false).unwrap());
        let logs = &tracker.timer(&timer.id).unwrap().logs;
        assert!(logs.last().unwrap().ends_with("Paused Session 1: (tracking disabled)"));
    }

    #[test]
    fn subscribers_are_notified_after_saves() {
        let (mut tracker, _clock, _store) = fixture();
        let rx = tracker.subscribe();
        tracker.start_timer("A", None).unwrap();

        let revisions: Vec<u64> = rx.try_iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
    }

    #[test]
    fn saves_from_another_tracker_are_picked_up_before_mutating() {
        let (mut first, clock, store) = fixture();
        let mut second = Tracker::open(
            store.clone(),
            store.clone(),
            Arc::new(clock.clone()),
            RecoveryPolicy::default(),
        )
        .unwrap();

        let a = first.start_timer("A", None).unwrap();
        clock.advance_millis(1_000);
        let b = second.start_timer("B", None).unwrap();

        // The second tracker saw A and paused it.
        assert_eq!(running_count(&second, &a.id), 0);
        clock.advance_millis(1_000);
        assert_eq!(first.stop_all_timers(None).unwrap(), 1);

        let saved = store.saved().unwrap();
        assert!(saved.find_timer(&a.id).is_some());
        assert!(saved.find_timer(&b.id).is_some());
        assert_eq!(first.timer_elapsed_ms(&a.id), Some(1_000));
        assert_eq!(first.timer_elapsed_ms(&b.id), Some(1_000));
    }

    #[test]
    fn stale_persist_is_rejected_and_reloads() {
        let (mut first, clock, store) = fixture();
        let mut second = Tracker::open(
            store.clone(),
            store.clone(),
            Arc::new(clock),
            RecoveryPolicy::default(),
        )
        .unwrap();
        let rx = first.subscribe();
        let kept = second.start_timer("Kept", None).unwrap();

        // Mutate behind persist's back so no refresh runs first.
        first.config.ensure_folder(Some("Lost"));
        let err = first.persist().unwrap_err();
        assert!(matches!(err, TrackerError::Store(StoreError::Conflict { .. })));

        assert!(first.config().find_folder(Some("Lost")).is_none());
        assert!(first.timer(&kept.id).is_some());
        assert!(store.saved().unwrap().find_folder(Some("Lost")).is_none());
        assert_eq!(rx.try_iter().last().map(|e| e.revision), Some(2));
    }

    #[test]
    fn refresh_without_other_writers_is_a_noop() {
        let (mut tracker, _clock, store) = fixture();
        tracker.start_timer("A", None).unwrap();
        assert!(!tracker.refresh().unwrap());
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn folder_operations() {
        let (mut tracker, _clock, _store) = fixture();
        assert!(tracker.create_folder("Clients/Acme").unwrap());
        assert!(!tracker.create_folder("Clients/Acme").unwrap());
        assert!(!tracker.create_folder("  ").unwrap());
        let timer = tracker.start_timer("Audit", Some("Clients/Acme")).unwrap();

        assert!(tracker.rename_folder("Clients", "Customers").unwrap());
        let timer = tracker.timer(&timer.id).unwrap();
        assert_eq!(timer.folder_path.as_deref(), Some("Customers/Acme"));
    }

    #[test]
    fn ignored_branch_settings() {
        let (mut tracker, _clock, _store) = fixture();
        assert!(tracker.add_ignored_branch("HEAD").unwrap());
        assert!(!tracker.add_ignored_branch("HEAD").unwrap());
        assert!(tracker.set_ignored_branches(vec!["main".into()]).unwrap());
        assert_eq!(tracker.config().ignored_branches, vec!["main".to_string()]);
        assert!(tracker.set_auto_create_on_branch_checkout(false).unwrap());
        assert!(!tracker.config().auto_create_on_branch_checkout);
    }
}
