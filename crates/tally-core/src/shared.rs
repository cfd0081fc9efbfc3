use std::sync::{Arc, Mutex};

use crate::error::TrackerError;
use crate::tracker::Tracker;

/// A [`Tracker`] shared between tasks.
///
/// Every access runs under one lock, so operations are applied one at a time
/// and never interleave their read-modify-save cycles.
#[derive(Debug, Clone)]
pub struct SharedTracker {
    inner: Arc<Mutex<Tracker>>,
}

impl SharedTracker {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    /// Runs `f` with exclusive access to the tracker.
    pub fn with<T>(&self, f: impl FnOnce(&mut Tracker) -> T) -> Result<T, TrackerError> {
        let mut tracker = self.inner.lock().map_err(|_| TrackerError::LockPoisoned)?;
        Ok(f(&mut tracker))
    }
}
