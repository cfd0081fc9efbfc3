//! Crash recovery.
//!
//! Two mechanisms keep recorded time honest when the process dies without a
//! clean pause:
//!
//! 1. A periodic snapshot copies each running session's elapsed time into
//!    `last_persisted_elapsed_ms`, the last value known to be good.
//! 2. A drift check compares a session's computed elapsed time against that
//!    snapshot. A gap larger than the tolerance means time passed that nobody
//!    observed, so the session is clamped down to the smaller of the two.
//!
//! On top of these sits the shutdown/startup protocol: shutdown pauses all
//! running sessions and records them in the key-value store; startup resumes
//! them if the process comes back within the resume window.
//!
//! A [`TrackingLease`] in the key-value store marks which process owns the
//! running sessions. Startup only clamps sessions when it finds a lease left
//! behind by an owner that never shut down. Sessions left running while no
//! owner held the lease were started by short-lived commands and keep their
//! time.

use chrono::{DateTime, Utc};

use crate::elapsed::{format_duration, is_running, resume_instant, subtimer_elapsed_ms};
use crate::error::TrackerError;
use crate::model::SubTimer;
use crate::ports::{AutoPauseMarker, SubTimerRef, TrackingLease};
use crate::tracker::{Tracker, pause_session};

/// Tunable constants of the crash heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// How often running sessions are snapshotted.
    pub snapshot_interval_ms: i64,
    /// Tolerance is this many snapshot intervals.
    pub drift_multiplier: i64,
    /// Snapshot differences at or below this are not written.
    pub snapshot_noise_ms: i64,
    /// Sessions auto-paused at shutdown resume only within this window.
    pub resume_window_ms: i64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 30_000, // 30 seconds
            drift_multiplier: 3,
            snapshot_noise_ms: 10,
            resume_window_ms: 300_000, // 5 minutes
        }
    }
}

impl RecoveryPolicy {
    /// Largest unexplained gap accepted before a session is clamped.
    pub const fn tolerance_ms(&self) -> i64 {
        self.snapshot_interval_ms.saturating_mul(self.drift_multiplier)
    }
}

/// A clamp applied to a session after an unexpected shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftCorrection {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl DriftCorrection {
    pub(crate) fn log_message(&self, label: &str) -> String {
        format!(
            "Unexpected shutdown detected for '{label}': elapsed corrected from {} to {}",
            format_duration(self.from_ms),
            format_duration(self.to_ms)
        )
    }
}

/// Decides whether a session needs clamping at `now`.
///
/// The session is suspicious when its elapsed time has drifted from the last
/// snapshot by more than the tolerance, or when the last pause/resume
/// boundary is older than the tolerance. A suspicious session is corrected
/// down to the snapshot if the snapshot is smaller; it is never raised.
/// Sessions without a snapshot are never clamped.
pub fn check_drift(
    sub: &SubTimer,
    now: DateTime<Utc>,
    policy: &RecoveryPolicy,
) -> Option<DriftCorrection> {
    let persisted = sub.last_persisted_elapsed_ms?;
    let current = subtimer_elapsed_ms(sub, now);
    let tolerance = policy.tolerance_ms();

    let boundary = sub.end_time.unwrap_or_else(|| resume_instant(sub));
    let gap = (now - boundary).num_milliseconds();
    let suspicious = (current - persisted).abs() > tolerance || gap > tolerance;

    let clamped = current.min(persisted);
    (suspicious && clamped < current).then_some(DriftCorrection {
        from_ms: current,
        to_ms: clamped,
    })
}

/// Runs [`check_drift`] and applies the outcome to the session.
///
/// A correction overwrites the total and snapshot; a running session then
/// continues from `now`. Without a correction the snapshot is refreshed.
pub(crate) fn apply_drift_check(
    sub: &mut SubTimer,
    now: DateTime<Utc>,
    policy: &RecoveryPolicy,
) -> Option<DriftCorrection> {
    match check_drift(sub, now, policy) {
        Some(correction) => {
            sub.total_elapsed_ms = Some(correction.to_ms);
            sub.last_persisted_elapsed_ms = Some(correction.to_ms);
            if is_running(sub) {
                sub.last_resume_time = Some(now);
            }
            Some(correction)
        }
        None => {
            sub.last_persisted_elapsed_ms = Some(subtimer_elapsed_ms(sub, now));
            None
        }
    }
}

/// What happened during [`Tracker::startup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Sessions resumed from the auto-pause marker.
    pub resumed: usize,
    /// A marker was found but was older than the resume window.
    pub discarded_marker: bool,
    /// Sessions clamped by the drift check.
    pub corrected: usize,
}

impl Tracker {
    /// Refreshes the elapsed snapshot of every running session.
    ///
    /// Saves only if some snapshot moved by more than the noise threshold.
    /// Returns the number of sessions updated.
    pub fn snapshot_running(&mut self) -> Result<usize, TrackerError> {
        let now = self.begin()?;
        let noise = self.policy.snapshot_noise_ms;
        let mut updated = 0;
        self.config.for_each_timer_mut(|timer| {
            for sub in timer.subtimers.iter_mut().filter(|s| is_running(s)) {
                let elapsed = subtimer_elapsed_ms(sub, now);
                let stale = sub
                    .last_persisted_elapsed_ms
                    .is_none_or(|persisted| (elapsed - persisted).abs() > noise);
                if stale {
                    sub.last_persisted_elapsed_ms = Some(elapsed);
                    updated += 1;
                }
            }
        });
        if updated > 0 {
            self.persist()?;
            tracing::trace!(updated, "snapshotted running sessions");
        }
        Ok(updated)
    }

    /// Drift-checks sessions still marked running by a previous process.
    ///
    /// Clamped sessions keep running from now. Returns the number clamped.
    pub fn recover_running_on_startup(&mut self) -> Result<usize, TrackerError> {
        let now = self.begin()?;
        let policy = self.policy;
        let mut checked = 0;
        let mut corrected = 0;
        self.config.for_each_timer_mut(|timer| {
            let mut messages = Vec::new();
            for sub in timer.subtimers.iter_mut().filter(|s| is_running(s)) {
                checked += 1;
                if let Some(correction) = apply_drift_check(sub, now, &policy) {
                    tracing::warn!(
                        timer_id = %timer.id,
                        session = %sub.label,
                        from_ms = correction.from_ms,
                        to_ms = correction.to_ms,
                        "clamped running session after unexpected shutdown"
                    );
                    messages.push(correction.log_message(&sub.label));
                    corrected += 1;
                }
            }
            for message in messages {
                timer.push_log(now, message);
            }
        });
        if checked > 0 {
            self.persist()?;
        }
        Ok(corrected)
    }

    /// Shutdown hook: pauses every running session, records which ones and
    /// releases the tracking lease.
    ///
    /// Never fails. Store errors are logged and the process is free to exit.
    /// Calling it again finds nothing running and leaves the first marker in
    /// place. Returns the number of sessions paused.
    pub fn shutdown(&mut self) -> usize {
        if let Err(e) = self.refresh() {
            tracing::warn!(error = %e, "failed to reload config on shutdown");
        }
        let now = self.now();
        let mut refs = Vec::new();
        let mut timer_ids = Vec::new();
        self.config.for_each_timer_mut(|timer| {
            let mut paused = 0;
            for sub in &mut timer.subtimers {
                if pause_session(sub, now) {
                    refs.push(SubTimerRef {
                        timer_id: timer.id.clone(),
                        subtimer_id: sub.id.clone(),
                    });
                    paused += 1;
                }
            }
            if paused > 0 {
                timer_ids.push(timer.id.clone());
                timer.push_log(now, "Auto-paused on shutdown");
            }
        });

        let paused = refs.len();
        if paused == 0 {
            tracing::debug!("shutdown: nothing running");
        } else {
            let marker = AutoPauseMarker {
                timer_ids,
                subtimer_refs: refs,
                paused_at: now,
            };
            if let Err(e) = marker.store(self.kv.as_mut()) {
                tracing::warn!(error = %e, "failed to record auto-paused sessions");
            }
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to save config on shutdown");
            }
            tracing::info!(paused, "auto-paused running sessions on shutdown");
        }

        if let Err(e) = TrackingLease::release(self.kv.as_mut()) {
            tracing::warn!(error = %e, "failed to release tracking lease");
        }
        paused
    }

    /// Startup hook: settles sessions a previous owner left running, resumes
    /// sessions auto-paused at shutdown if that happened recently enough, and
    /// takes the tracking lease.
    ///
    /// Running sessions are drift-checked only if the previous owner's lease
    /// is still there. Otherwise they only get a fresh snapshot. The marker is
    /// cleared whether or not it was used.
    pub fn startup(&mut self) -> Result<StartupReport, TrackerError> {
        self.refresh()?;
        let mut report = StartupReport::default();

        let owner_died = match TrackingLease::load(self.kv.as_ref()) {
            Ok(lease) => lease.is_some(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to read tracking lease; treating owner as crashed"
                );
                true
            }
        };
        if owner_died {
            report.corrected = self.recover_running_on_startup()?;
        } else {
            let adopted = self.snapshot_running()?;
            tracing::debug!(adopted, "no previous owner; kept running sessions as they are");
        }

        let marker = match AutoPauseMarker::load(self.kv.as_ref()) {
            Ok(marker) => marker,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read auto-pause marker");
                None
            }
        };
        if let Some(marker) = marker {
            self.resume_marked(&marker, &mut report)?;
        }

        let lease = TrackingLease {
            acquired_at: self.now(),
        };
        if let Err(e) = lease.store(self.kv.as_mut()) {
            tracing::warn!(error = %e, "failed to take tracking lease");
        }
        Ok(report)
    }

    fn resume_marked(
        &mut self,
        marker: &AutoPauseMarker,
        report: &mut StartupReport,
    ) -> Result<(), TrackerError> {
        let now = self.now();
        let age_ms = (now - marker.paused_at).num_milliseconds();
        if age_ms <= self.policy.resume_window_ms {
            for r in &marker.subtimer_refs {
                if self.resume_session(&r.timer_id, &r.subtimer_id, now) {
                    report.resumed += 1;
                }
            }
        } else {
            tracing::info!(age_ms, "auto-pause marker expired; leaving sessions paused");
            report.discarded_marker = true;
        }

        if let Err(e) = AutoPauseMarker::clear(self.kv.as_mut()) {
            tracing::warn!(error = %e, "failed to clear auto-pause marker");
        }
        if report.resumed > 0 {
            self.persist()?;
            tracing::info!(resumed = report.resumed, "resumed auto-paused sessions");
        }
        Ok(())
    }
}
