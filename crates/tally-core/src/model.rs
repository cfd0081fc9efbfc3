//! Timers, sessions and the folder tree that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SubTimerId, TimerId};

/// Maximum number of log lines retained per timer.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Label given to the first session of every timer.
pub const DEFAULT_SESSION_LABEL: &str = "Session 1:";

/// One work session within a timer.
///
/// A session is running exactly when `end_time` is absent. Elapsed time is
/// always derived through [`crate::elapsed::subtimer_elapsed_ms`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTimer {
    pub id: SubTimerId,

    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Creation instant.
    pub start_time: DateTime<Utc>,

    /// Set while paused, absent while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Milliseconds accumulated from completed running segments.
    ///
    /// Absent only in data written before accumulation was tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_elapsed_ms: Option<i64>,

    /// Start of the current running segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resume_time: Option<DateTime<Utc>>,

    /// Most recent elapsed snapshot, used for drift detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_persisted_elapsed_ms: Option<i64>,
}

impl SubTimer {
    /// Creates a session that starts running at `now`.
    pub fn running(
        label: impl Into<String>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubTimerId::generate(),
            label: label.into(),
            description,
            start_time: now,
            end_time: None,
            total_elapsed_ms: Some(0),
            last_resume_time: Some(now),
            last_persisted_elapsed_ms: Some(0),
        }
    }

    /// Creates a session that is already paused.
    pub fn stopped(
        label: impl Into<String>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubTimerId::generate(),
            label: label.into(),
            description,
            start_time: now,
            end_time: Some(now),
            total_elapsed_ms: Some(0),
            last_resume_time: None,
            last_persisted_elapsed_ms: Some(0),
        }
    }
}

/// A tracked activity made of sequential sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timer {
    pub id: TimerId,

    pub label: String,

    pub start_time: DateTime<Utc>,

    /// Set only for timers driven by branch automation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    #[serde(default)]
    pub archived: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,

    #[serde(default)]
    pub subtimers: Vec<SubTimer>,

    #[serde(default)]
    pub logs: Vec<String>,
}

impl Timer {
    /// Creates a timer with no sessions yet.
    ///
    /// Callers outside this crate go through [`crate::Tracker::start_timer`],
    /// which adds the first session immediately.
    pub(crate) fn new(
        label: impl Into<String>,
        folder_path: Option<String>,
        branch_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TimerId::generate(),
            label: label.into(),
            start_time: now,
            branch_name,
            archived: false,
            folder_path,
            subtimers: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Appends a timestamped log line, dropping the oldest beyond the cap.
    pub fn push_log(&mut self, now: DateTime<Utc>, message: impl AsRef<str>) {
        self.logs.push(format!(
            "{} - {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        ));
        if self.logs.len() > MAX_LOG_ENTRIES {
            let overflow = self.logs.len() - MAX_LOG_ENTRIES;
            self.logs.drain(..overflow);
        }
    }

    pub fn subtimer(&self, id: &SubTimerId) -> Option<&SubTimer> {
        self.subtimers.iter().find(|s| &s.id == id)
    }

    pub fn subtimer_mut(&mut self, id: &SubTimerId) -> Option<&mut SubTimer> {
        self.subtimers.iter_mut().find(|s| &s.id == id)
    }

    /// Label for the next session appended to this timer.
    pub fn next_session_label(&self) -> String {
        format!("Session {}:", self.subtimers.len() + 1)
    }
}

/// A named bucket of timers. The empty name denotes the implicit root bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerFolder {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default)]
    pub timers: Vec<Timer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subfolders: Vec<TimerFolder>,
}

impl TimerFolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Root aggregate persisted as a whole after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackerConfig {
    #[serde(default)]
    pub folders: Vec<TimerFolder>,

    /// Branches that never get a branch timer.
    #[serde(default)]
    pub ignored_branches: Vec<String>,

    #[serde(default = "default_true")]
    pub auto_create_on_branch_checkout: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            ignored_branches: Vec::new(),
            auto_create_on_branch_checkout: true,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn push_log_caps_entries_dropping_oldest() {
        let mut timer = Timer::new("Capped", None, None, at(0));
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            timer.push_log(at(0), format!("entry {i}"));
        }
        assert_eq!(timer.logs.len(), MAX_LOG_ENTRIES);
        assert!(timer.logs[0].ends_with("entry 5"));
        let newest = format!("entry {}", MAX_LOG_ENTRIES + 4);
        assert!(timer.logs[MAX_LOG_ENTRIES - 1].ends_with(&newest));
    }

    #[test]
    fn log_lines_are_timestamped() {
        let mut timer = Timer::new("Logged", None, None, at(0));
        timer.push_log(at(0), "Timer created");
        assert_eq!(timer.logs, vec!["1970-01-01 00:00:00 - Timer created".to_string()]);
    }

    #[test]
    fn config_defaults_enable_automation() {
        let config: TrackerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert!(config.auto_create_on_branch_checkout);
        assert!(config.folders.is_empty());
    }

    #[test]
    fn config_serde_roundtrip_is_lossless() {
        let mut timer = Timer::new(
            "Roundtrip",
            Some("Work".to_string()),
            Some("main".to_string()),
            at(10),
        );
        timer.subtimers.push(SubTimer::running("Session 1:", Some("notes".to_string()), at(10)));
        timer.subtimers.push(SubTimer::stopped("Session 2:", None, at(20)));
        timer.push_log(at(10), "Timer created");
        let config = TrackerConfig {
            folders: vec![TimerFolder {
                name: "Work".to_string(),
                icon: Some("briefcase".to_string()),
                timers: vec![timer],
                subfolders: vec![TimerFolder::new("Nested")],
            }],
            ignored_branches: vec!["HEAD".to_string()],
            auto_create_on_branch_checkout: false,
            enabled: true,
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: TrackerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn legacy_subtimer_without_total_parses() {
        let json = r#"{
            "id": "s1",
            "label": "Session 1:",
            "start_time": "2025-01-01T00:00:00Z",
            "end_time": "2025-01-01T00:10:00Z"
        }"#;
        let sub: SubTimer = serde_json::from_str(json).unwrap();
        assert_eq!(sub.total_elapsed_ms, None);
        assert_eq!(sub.last_resume_time, None);
    }

    #[test]
    fn next_session_label_counts_existing_sessions() {
        let mut timer = Timer::new("Sessions", None, None, at(0));
        assert_eq!(timer.next_session_label(), "Session 1:");
        timer.subtimers.push(SubTimer::stopped(DEFAULT_SESSION_LABEL, None, at(0)));
        assert_eq!(timer.next_session_label(), "Session 2:");
    }
}
