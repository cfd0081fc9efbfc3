//! Collaborator interfaces the tracker is written against.
//!
//! The tracker never talks to a file, database or wall clock directly. It
//! receives implementations of these traits when it is built, which keeps
//! every time calculation reproducible under a [`ManualClock`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TrackerConfig;
use crate::types::{SubTimerId, TimerId};

/// Key under which the auto-pause marker is stored.
pub const AUTO_PAUSE_KEY: &str = "tally.autoPausedTimers";

/// Key held by a tracking process between `startup` and `shutdown`.
pub const TRACKING_LEASE_KEY: &str = "tally.trackingLease";

/// Errors raised by persistence and key-value collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Another writer saved the aggregate since it was last read.
    #[error("config was changed by another writer (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
    /// Shared state guarded by a mutex was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn backend(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock reading `millis` since the Unix epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis())
            .single()
            .unwrap_or_default()
    }
}

/// The aggregate as stored, with the revision it was saved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfig {
    pub config: TrackerConfig,
    pub revision: u64,
}

/// Loads and saves the whole tracker aggregate.
///
/// Every save bumps a revision counter. Several processes may share one
/// store, so saves are compare-and-swap against the revision last read.
pub trait Persistence: Send {
    /// Returns `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<StoredConfig>, StoreError>;

    /// Current revision; 0 when nothing has been saved yet.
    fn revision(&self) -> Result<u64, StoreError>;

    /// Saves `config` if the stored revision is still `expected` and returns
    /// the new revision. Fails with [`StoreError::Conflict`] otherwise.
    fn save(&mut self, config: &TrackerConfig, expected: u64) -> Result<u64, StoreError>;
}

/// Small key-value store that survives process restarts.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// A session that was paused by the shutdown hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTimerRef {
    pub timer_id: TimerId,
    pub subtimer_id: SubTimerId,
}

/// Record of sessions force-paused at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPauseMarker {
    #[serde(rename = "timerIds", default)]
    pub timer_ids: Vec<TimerId>,
    #[serde(rename = "subtimerRefs", default)]
    pub subtimer_refs: Vec<SubTimerRef>,
    #[serde(rename = "pausedAtIso")]
    pub paused_at: DateTime<Utc>,
}

/// Held by the process that owns running sessions, from `startup` until a
/// clean `shutdown`. Finding one at startup means its owner died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingLease {
    #[serde(rename = "acquiredAtIso")]
    pub acquired_at: DateTime<Utc>,
}

impl TrackingLease {
    pub fn load(kv: &dyn KeyValueStore) -> Result<Option<Self>, StoreError> {
        kv.get(TRACKING_LEASE_KEY)?
            .map(serde_json::from_value::<Self>)
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn store(&self, kv: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        kv.set(TRACKING_LEASE_KEY, serde_json::to_value(self)?)
    }

    pub fn release(kv: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        kv.remove(TRACKING_LEASE_KEY)
    }
}

impl AutoPauseMarker {
    pub fn load(kv: &dyn KeyValueStore) -> Result<Option<Self>, StoreError> {
        kv.get(AUTO_PAUSE_KEY)?
            .map(serde_json::from_value::<Self>)
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn store(&self, kv: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        kv.set(AUTO_PAUSE_KEY, serde_json::to_value(self)?)
    }

    pub fn clear(kv: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        kv.remove(AUTO_PAUSE_KEY)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    config: Option<TrackerConfig>,
    revision: u64,
    values: HashMap<String, serde_json::Value>,
    saves: usize,
}

/// In-memory [`Persistence`] and [`KeyValueStore`].
///
/// Clones share state, so a test can hand one clone to the tracker and
/// inspect what was saved through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an already-saved aggregate.
    pub fn with_config(config: TrackerConfig) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.config = Some(config);
            inner.revision = 1;
        }
        store
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.saves).unwrap_or_default()
    }

    /// Last saved aggregate.
    pub fn saved(&self) -> Option<TrackerConfig> {
        self.inner.lock().ok().and_then(|inner| inner.config.clone())
    }
}

impl Persistence for MemoryStore {
    fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.config.clone().map(|config| StoredConfig {
            config,
            revision: inner.revision,
        }))
    }

    fn revision(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.revision)
    }

    fn save(&mut self, config: &TrackerConfig, expected: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        if inner.revision != expected {
            return Err(StoreError::Conflict {
                expected,
                found: inner.revision,
            });
        }
        inner.config = Some(config.clone());
        inner.revision += 1;
        inner.saves += 1;
        Ok(inner.revision)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        inner.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        inner.values.remove(key);
        Ok(())
    }
}
