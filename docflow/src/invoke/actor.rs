//! Stage actors: one execution attempt per launch.

use crate::core::{Document, MapUpdate};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// What one actor run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorOutcome {
    /// The work finished; the update is reported with a PASS grade.
    Pass(MapUpdate),
    /// The work failed; the message is reported with a FAIL grade.
    Fail(String),
    /// The work was handed to an external service whose completion adapter
    /// reports the outcome later.
    Submitted,
}

/// A stage's business logic.
///
/// Actors never retry. Launch retries belong to the begin phase and
/// stalled work is caught by the await phase's timeout sweep.
#[async_trait]
pub trait Actor: Send + Sync {
    /// Runs the stage once for a document snapshot.
    async fn run(&self, document: Document) -> ActorOutcome;
}

/// Actor handle.
pub type SharedActor = Arc<dyn Actor>;

/// An actor that passes every document through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpActor;

#[async_trait]
impl Actor for NoOpActor {
    async fn run(&self, _document: Document) -> ActorOutcome {
        ActorOutcome::Pass(MapUpdate::new())
    }
}

/// An actor backed by a synchronous closure.
pub struct FnActor<F> {
    func: F,
}

impl<F> FnActor<F>
where
    F: Fn(&Document) -> ActorOutcome + Send + Sync,
{
    /// Wraps a closure as an actor.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnActor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnActor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Actor for FnActor<F>
where
    F: Fn(&Document) -> ActorOutcome + Send + Sync,
{
    async fn run(&self, document: Document) -> ActorOutcome {
        (self.func)(&document)
    }
}
