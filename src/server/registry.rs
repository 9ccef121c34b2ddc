//! Run registry
//!
//! Tracks the status handles of live simulations for the polling endpoint.
//! All access goes through one mutex; handles are added when a run starts
//! and pruned once it finishes, fails, or is cancelled.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::simulator::{SimStatus, StatusHandle};

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<Vec<Arc<StatusHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: Arc<StatusHandle>) {
        self.lock().push(handle);
    }

    /// Snapshot the still-running simulations and prune the rest.
    pub fn active(&self) -> Vec<SimStatus> {
        let mut runs = self.lock();
        runs.retain(|handle| !handle.is_finished() && !handle.is_cancelled());
        runs.iter().map(|handle| handle.snapshot()).collect()
    }

    /// Raise the cancellation flag on every registered run.
    pub fn cancel_all(&self) {
        for handle in self.lock().iter() {
            handle.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<StatusHandle>>> {
        match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
