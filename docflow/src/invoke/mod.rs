//! The invocation facility: launching stage work.
//!
//! Begin hands a serialized document to an [`Invoker`] and only cares whether
//! the launch was accepted. The work itself reports back through the stage
//! channel, either from the actor or from a completion adapter.

mod actor;
mod admission;
mod local;

pub use actor::{Actor, ActorOutcome, FnActor, NoOpActor, SharedActor};
pub use admission::{Admission, AdmissionControl, RunningCap, SharedAdmission};
pub use local::LocalInvoker;

#[cfg(test)]
pub use admission::MockAdmissionControl;

use crate::core::MapUpdate;
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of a launch request.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// The facility took the work.
    Accepted {
        /// Fields known at launch time, merged into the current map.
        update: Option<MapUpdate>,
    },
    /// The facility declined the work; the document is held for retry.
    Rejected {
        /// Why the launch was declined.
        reason: String,
    },
}

impl Invocation {
    /// An acceptance with nothing to merge.
    #[must_use]
    pub fn accepted() -> Self {
        Self::Accepted { update: None }
    }

    /// A rejection with a reason.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns true for an accepted launch.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Fire-and-forget launcher for stage actors.
///
/// `invoke` must return promptly; it never waits for the actor to finish.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Requests an asynchronous run of `actor_ref` with a document payload.
    async fn invoke(&self, actor_ref: &str, payload: Vec<u8>) -> Result<Invocation>;
}

/// Invoker handle shared between phases.
pub type SharedInvoker = Arc<dyn Invoker>;
