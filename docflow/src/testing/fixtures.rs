//! Test fixtures for pipeline testing.

use std::sync::Arc;

use crate::channel::{send_message, ChannelRegistry, SharedChannel};
use crate::config::PipelineConfig;
use crate::core::{Document, DocumentId, Grade, Message, Stage, State};
use crate::events::CollectingEventSink;
use crate::invoke::{LocalInvoker, SharedInvoker};
use crate::phases::{AwaitPhase, BeginPhase, PhaseContext};
use crate::pipeline::{PipelineScheduler, PromotionManager};
use crate::store::{DocumentStore, InMemoryDocumentStore};
use crate::utils::{parse_stamp, FakeClock, Timestamp};

/// Fixed instant every fixture clock starts at.
pub const FIXTURE_EPOCH: &str = "2021-03-01T08:00:00Z";

fn epoch() -> Timestamp {
    parse_stamp(FIXTURE_EPOCH).unwrap_or_default()
}

/// Builder for documents placed at an arbitrary pipeline position.
#[derive(Debug, Clone)]
pub struct DocumentFixture {
    document: Document,
}

impl DocumentFixture {
    /// A fresh document at `(acquire, WAITING)` in priority bucket `"0"`.
    #[must_use]
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            document: Document::new(id, "0", epoch()),
        }
    }

    /// Sets the priority bucket.
    #[must_use]
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.document.order_stamp.order = order.into();
        self
    }

    /// Sets the ingestion stamp.
    #[must_use]
    pub fn stamp(mut self, stamp: Timestamp) -> Self {
        self.document.order_stamp.stamp = stamp;
        self
    }

    /// Places the document at a stage and state.
    #[must_use]
    pub fn at(mut self, stage: Stage, state: State) -> Self {
        self.document = self.document.at(stage, state);
        self
    }

    /// Marks the document launched at `start`.
    #[must_use]
    pub fn running_since(mut self, stage: Stage, start: Timestamp) -> Self {
        self.document = self.document.at(stage, State::Running);
        let map = self.document.current_map_mut();
        map.actor_grade = Grade::Busy;
        map.start_stamp = Some(start);
        self
    }

    /// Sets the current map's retry count.
    #[must_use]
    pub fn retries(mut self, count: u32) -> Self {
        self.document.current_map_mut().retry_count = count;
        self
    }

    /// Returns the document.
    #[must_use]
    pub fn build(self) -> Document {
        self.document
    }
}

/// An in-memory pipeline with a fake clock.
///
/// Every collaborator is shared, so phases built from the harness see the
/// same store, channels, and events.
pub struct TestPipeline {
    /// Configuration phases are built from.
    pub config: PipelineConfig,
    /// The document store.
    pub store: Arc<InMemoryDocumentStore>,
    /// The clock phases read.
    pub clock: FakeClock,
    /// Every emitted event.
    pub events: Arc<CollectingEventSink>,
    /// One channel per stage.
    pub channels: ChannelRegistry,
}

impl TestPipeline {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Creates a harness with the given configuration.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        let channels = ChannelRegistry::in_memory(&config);
        Self {
            config,
            store: Arc::new(InMemoryDocumentStore::new()),
            clock: FakeClock::new(epoch()),
            events: Arc::new(CollectingEventSink::new()),
            channels,
        }
    }

    /// The shared phase collaborators.
    #[must_use]
    pub fn context(&self) -> PhaseContext {
        PhaseContext::new(self.store.clone(), Arc::new(self.clock.clone()), self.events.clone())
    }

    /// A begin phase for `stage` using the configured policy.
    #[must_use]
    pub fn begin(&self, stage: Stage, invoker: SharedInvoker) -> BeginPhase {
        BeginPhase::new(
            stage,
            self.config.actor_ref(stage),
            self.config.policy(stage),
            invoker,
            self.context(),
        )
    }

    /// An await phase for `stage` using the configured policy.
    ///
    /// # Panics
    ///
    /// Panics if the registry has no channel for `stage`.
    #[must_use]
    pub fn await_phase(&self, stage: Stage) -> AwaitPhase {
        AwaitPhase::new(stage, self.config.policy(stage), self.channel(stage), self.context())
    }

    /// A promotion manager over the harness store.
    #[must_use]
    pub fn promotion(&self) -> PromotionManager {
        PromotionManager::new(self.context())
    }

    /// A scheduler over the harness collaborators.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn scheduler(&self, invoker: SharedInvoker) -> PipelineScheduler {
        PipelineScheduler::new(&self.config, self.context(), &self.channels, invoker)
            .unwrap_or_else(|e| panic!("invalid test configuration: {e}"))
    }

    /// A local invoker with a pass-through actor for every stage.
    #[must_use]
    pub fn pass_through(&self) -> Arc<LocalInvoker> {
        Arc::new(LocalInvoker::pass_through(
            &self.config,
            self.channels.clone(),
            Arc::new(self.clock.clone()),
        ))
    }

    /// The channel for `stage`.
    ///
    /// # Panics
    ///
    /// Panics if the registry has no channel for `stage`.
    #[must_use]
    pub fn channel(&self, stage: Stage) -> SharedChannel {
        self.channels
            .channel(stage)
            .unwrap_or_else(|e| panic!("no channel for {stage}: {e}"))
    }

    /// Stores a document.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the write.
    pub async fn seed(&self, document: Document) {
        self.store
            .put(&document)
            .await
            .unwrap_or_else(|e| panic!("seeding {} failed: {e}", document.document_id));
    }

    /// Loads a document that must exist.
    ///
    /// # Panics
    ///
    /// Panics if the document is missing.
    pub async fn load(&self, id: &str) -> Document {
        match self.store.get(&id.into()).await {
            Ok(Some(document)) => document,
            Ok(None) => panic!("document {id} not found"),
            Err(e) => panic!("loading {id} failed: {e}"),
        }
    }

    /// Enqueues a completion message on its stage's channel.
    ///
    /// # Panics
    ///
    /// Panics if the channel rejects the message.
    pub async fn complete(&self, stage: Stage, message: &Message) {
        send_message(self.channel(stage).as_ref(), message)
            .await
            .unwrap_or_else(|e| panic!("sending to {stage} failed: {e}"));
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPipeline")
            .field("config", &self.config)
            .field("documents", &self.store.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Clock;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_document_fixture() {
        let start = epoch();
        let document = DocumentFixture::new("d1")
            .order("3")
            .running_since(Stage::Extract, start)
            .retries(2)
            .build();

        assert_eq!(document.stage_state.to_string(), "Extract#Running");
        assert_eq!(document.order_stamp.order, "3");
        assert_eq!(document.current_map().start_stamp, Some(start));
        assert_eq!(document.current_map().retry_count, 2);
        assert_eq!(document.maps.acquire.retry_count, 0);
    }

    #[tokio::test]
    async fn test_pipeline_shares_collaborators() {
        let pipeline = TestPipeline::new();
        pipeline.seed(DocumentFixture::new("D1").build()).await;

        assert_eq!(pipeline.load("d1").await.document_id.as_str(), "d1");
        assert_eq!(pipeline.clock.now(), epoch());
        assert_eq!(pipeline.context().clock.now(), epoch());
    }
}
