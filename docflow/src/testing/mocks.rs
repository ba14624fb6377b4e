//! Mock collaborators for testing.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{Document, DocumentId, Stage, State};
use crate::errors::{DocflowError, Result};
use crate::invoke::{Actor, ActorOutcome, Invocation, Invoker};
use crate::store::{DocumentStore, SharedStore};

/// An invoker that replays a script of outcomes and records every call.
///
/// Once the script runs out every launch is accepted.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<Invocation>>>,
    calls: Mutex<Vec<(String, DocumentId)>>,
}

impl ScriptedInvoker {
    /// Creates an invoker that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome.
    #[must_use]
    pub fn then(self, outcome: Invocation) -> Self {
        self.script.lock().push_back(Ok(outcome));
        self
    }

    /// Queues `count` rejections.
    #[must_use]
    pub fn reject_times(self, count: usize, reason: &str) -> Self {
        (0..count).fold(self, |invoker, _| invoker.then(Invocation::rejected(reason)))
    }

    /// Queues a facility error.
    #[must_use]
    pub fn then_error(self, message: &str) -> Self {
        self.script.lock().push_back(Err(DocflowError::invocation(message)));
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the documents launched, in call order.
    #[must_use]
    pub fn launched(&self) -> Vec<DocumentId> {
        self.calls.lock().iter().map(|(_, id)| id.clone()).collect()
    }

    /// Returns the actor references invoked, in call order.
    #[must_use]
    pub fn actor_refs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(actor, _)| actor.clone()).collect()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, actor_ref: &str, payload: Vec<u8>) -> Result<Invocation> {
        let document = Document::from_payload(&payload)?;
        self.calls.lock().push((actor_ref.to_string(), document.document_id));
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Invocation::accepted()))
    }
}

/// An actor that returns a fixed outcome and records what it ran on.
#[derive(Debug)]
pub struct RecordingActor {
    outcome: ActorOutcome,
    seen: Mutex<Vec<Document>>,
}

impl RecordingActor {
    /// Creates an actor returning `outcome` for every document.
    #[must_use]
    pub fn new(outcome: ActorOutcome) -> Self {
        Self {
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the snapshots the actor was run with.
    #[must_use]
    pub fn seen(&self) -> Vec<Document> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Actor for RecordingActor {
    async fn run(&self, document: Document) -> ActorOutcome {
        self.seen.lock().push(document);
        self.outcome.clone()
    }
}

/// A store whose every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, _document_id: &DocumentId) -> Result<Option<Document>> {
        Err(DocflowError::store("store unavailable"))
    }

    async fn put(&self, _document: &Document) -> Result<()> {
        Err(DocflowError::store("store unavailable"))
    }

    fn query(&self, _stage: Stage, _states: &[State]) -> BoxStream<'_, Result<Document>> {
        stream::once(async { Err(DocflowError::store("store unavailable")) }).boxed()
    }
}

/// Wraps a store and fails its first `failures` queries.
///
/// Every later call goes to the wrapped store, so a pipeline over it
/// recovers once the failures are used up.
pub struct FlakyStore {
    inner: SharedStore,
    remaining: AtomicUsize,
}

impl FlakyStore {
    /// Fails the next `failures` queries against `inner`.
    #[must_use]
    pub fn new(inner: SharedStore, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
        }
    }

    /// Failures not yet served.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, document_id: &DocumentId) -> Result<Option<Document>> {
        self.inner.get(document_id).await
    }

    async fn put(&self, document: &Document) -> Result<()> {
        self.inner.put(document).await
    }

    fn query(&self, stage: Stage, states: &[State]) -> BoxStream<'_, Result<Document>> {
        if self.take_failure() {
            return stream::once(async { Err(DocflowError::store("transient")) }).boxed();
        }
        self.inner.query(stage, states)
    }
}
