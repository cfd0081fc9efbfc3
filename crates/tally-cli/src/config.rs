//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tally_core::RecoveryPolicy;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Seconds between elapsed-time snapshots while watching.
    pub snapshot_interval_secs: u64,

    /// Unexplained gaps longer than this many snapshot intervals are clamped.
    pub drift_multiplier: u32,

    /// Sessions paused by `watch` on exit resume if it restarts within this
    /// many seconds.
    pub resume_window_secs: u64,

    /// How often `watch` polls the repository for branch changes and commits.
    pub poll_interval_ms: u64,

    /// Repository watched by `watch` when `--repo` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("tally.db"),
            snapshot_interval_secs: 30,
            drift_multiplier: 3,
            resume_window_secs: 300,
            poll_interval_ms: 1000,
            repo_path: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // TALLY_DATABASE_PATH, TALLY_SNAPSHOT_INTERVAL_SECS, ...
        figment = figment.merge(Env::prefixed("TALLY_"));

        figment.extract()
    }

    /// Crash-recovery constants derived from this configuration.
    pub fn policy(&self) -> RecoveryPolicy {
        let secs_to_ms = |secs: u64| i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        RecoveryPolicy {
            snapshot_interval_ms: secs_to_ms(self.snapshot_interval_secs.max(1)),
            drift_multiplier: i64::from(self.drift_multiplier.max(1)),
            resume_window_ms: secs_to_ms(self.resume_window_secs),
            ..RecoveryPolicy::default()
        }
    }
}

/// Returns the platform-specific config directory for tally.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tally"))
}

/// Returns the platform-specific data directory for tally.
///
/// On Linux: `~/.local/share/tally`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tally"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_dirs_data_path_ends_with_tally() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "tally");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("tally.db"));
    }

    #[test]
    fn test_default_policy_matches_core_defaults() {
        assert_eq!(Config::default().policy(), RecoveryPolicy::default());
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"database_path = "/tmp/other.db""#).unwrap();
        writeln!(file, "snapshot_interval_secs = 10").unwrap();
        writeln!(file, "resume_window_secs = 60").unwrap();
        file.flush().unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.poll_interval_ms, 1000);

        let policy = config.policy();
        assert_eq!(policy.snapshot_interval_ms, 10_000);
        assert_eq!(policy.tolerance_ms(), 30_000);
        assert_eq!(policy.resume_window_ms, 60_000);
    }
}
