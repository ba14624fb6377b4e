//! The per-stage phases: begin (submit) and await (absorb).

mod await_phase;
mod begin;

pub use await_phase::{AwaitPhase, AwaitReport};
pub use begin::{BeginPhase, BeginReport};

use crate::core::Stage;
use crate::errors::Result;
use crate::events::SharedEventSink;
use crate::store::SharedStore;
use crate::utils::SharedClock;
use serde::Serialize;
use tracing::error;

/// Collaborators every phase needs.
#[derive(Clone)]
pub struct PhaseContext {
    /// The document store.
    pub store: SharedStore,
    /// Source of "now".
    pub clock: SharedClock,
    /// Where lifecycle events go.
    pub events: SharedEventSink,
}

impl PhaseContext {
    /// Bundles the shared collaborators.
    #[must_use]
    pub fn new(store: SharedStore, clock: SharedClock, events: SharedEventSink) -> Self {
        Self { store, clock, events }
    }
}

impl std::fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Outcome of one stage chain.
///
/// A phase that failed on a collaborator error reports `None`; the next
/// scheduler iteration simply tries again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// The stage the chain served.
    pub stage: Stage,
    /// Begin counts.
    pub begin: Option<BeginReport>,
    /// Await counts.
    #[serde(rename = "await")]
    pub await_: Option<AwaitReport>,
}

impl ChainReport {
    /// Returns true if either phase failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.begin.is_none() || self.await_.is_none()
    }
}

/// A stage's begin phase followed by its await phase.
///
/// Begin finishes submitting before await runs, so the timeout sweep sees
/// start stamps written in the same pass.
#[derive(Debug)]
pub struct StageChain {
    begin: BeginPhase,
    await_phase: AwaitPhase,
}

impl StageChain {
    /// Pairs the two phases of one stage.
    #[must_use]
    pub fn new(begin: BeginPhase, await_phase: AwaitPhase) -> Self {
        debug_assert_eq!(begin.stage(), await_phase.stage());
        Self { begin, await_phase }
    }

    /// The stage this chain serves.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.begin.stage()
    }

    /// Runs begin, then await.
    ///
    /// A begin failure is logged and await still runs; completions and
    /// timeouts do not depend on new launches.
    pub async fn run(&self) -> ChainReport {
        let stage = self.stage();
        let begin = log_phase_error(stage, "begin", self.begin.run().await);
        let await_ = log_phase_error(stage, "await", self.await_phase.run().await);
        ChainReport { stage, begin, await_ }
    }
}

fn log_phase_error<T>(stage: Stage, phase: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            error!(stage = %stage, phase = phase, error = %e, transient = e.is_transient(), "Phase failed");
            None
        }
    }
}
