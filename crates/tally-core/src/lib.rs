//! Core domain logic for tally.
//!
//! This crate contains:
//! - The timer/session data model and the folder tree that holds it
//! - Elapsed-time accounting across pause/resume cycles
//! - The [`Tracker`] controller that owns the aggregate and persists it
//! - Crash recovery: periodic snapshots, drift clamping, auto-pause on shutdown
//! - Branch automation driven by checkout and commit events

mod branch;
pub mod elapsed;
mod error;
pub mod model;
pub mod ports;
mod recovery;
mod shared;
mod store;
mod tracker;
pub mod types;

pub use branch::VcsEvent;
pub use error::TrackerError;
pub use model::{SubTimer, Timer, TimerFolder, TrackerConfig};
pub use ports::{
    AutoPauseMarker, Clock, KeyValueStore, ManualClock, MemoryStore, Persistence, StoreError,
    StoredConfig, SubTimerRef, SystemClock, TrackingLease,
};
pub use recovery::{DriftCorrection, RecoveryPolicy, StartupReport, check_drift};
pub use shared::SharedTracker;
pub use store::normalize_folder_path;
pub use tracker::{ConfigChanged, SubTimerUpdate, TimerUpdate, Tracker};
pub use types::{SubTimerId, TimerId, ValidationError};
