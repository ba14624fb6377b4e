//! Domain admission control consulted before a launch.

use crate::core::{Stage, State};
use crate::errors::Result;
use crate::store::SharedStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Decision returned by an [`AdmissionControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The launch may proceed.
    Granted,
    /// The launch must not be attempted now.
    Denied {
        /// Why admission was denied.
        reason: String,
    },
}

/// A per-stage gate checked before every launch attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Decides whether another document may be launched at `stage`.
    async fn admit(&self, stage: Stage) -> Result<Admission>;
}

/// Admission handle.
pub type SharedAdmission = Arc<dyn AdmissionControl>;

/// Caps the number of documents `RUNNING` at a stage.
///
/// Used for stages whose external work is expensive to leave open, such as
/// human review loops.
#[derive(Clone)]
pub struct RunningCap {
    store: SharedStore,
    cap: usize,
}

impl RunningCap {
    /// Creates a cap over the given store.
    #[must_use]
    pub fn new(store: SharedStore, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Returns the configured cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }
}

impl std::fmt::Debug for RunningCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningCap").field("cap", &self.cap).finish()
    }
}

#[async_trait]
impl AdmissionControl for RunningCap {
    async fn admit(&self, stage: Stage) -> Result<Admission> {
        let running = self.store.count(stage, &[State::Running]).await?;
        if running >= self.cap {
            return Ok(Admission::Denied {
                reason: format!("{running} running at {stage}, cap is {}", self.cap),
            });
        }
        Ok(Admission::Granted)
    }
}
