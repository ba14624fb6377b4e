//! Promotion: advance successful documents one stage.

use crate::core::{Stage, State};
use crate::errors::Result;
use crate::events::{document_payload, types};
use crate::phases::PhaseContext;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};

/// Documents promoted per source stage in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Count of promotions out of each stage.
    pub promoted: BTreeMap<Stage, usize>,
}

impl PromotionReport {
    /// Total promotions across all stages.
    #[must_use]
    pub fn total(&self) -> usize {
        self.promoted.values().sum()
    }
}

/// Moves `SUCCESS` documents to `WAITING` at the next stage.
///
/// Stage pairs are handled strictly in pipeline order. A document promoted
/// out of one stage lands in `WAITING`, so the later pairs in the same pass
/// never pick it up again.
#[derive(Debug, Clone)]
pub struct PromotionManager {
    ctx: PhaseContext,
}

impl PromotionManager {
    /// Creates a promotion manager.
    #[must_use]
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    /// Runs one pass over every stage pair.
    pub async fn run(&self) -> Result<PromotionReport> {
        async {
            let mut report = PromotionReport::default();
            for (current, next) in Stage::transitions() {
                let count = self.promote(current, next).await?;
                if count > 0 {
                    report.promoted.insert(current, count);
                }
            }
            debug!(total = report.total(), "Promotion pass complete");
            Ok(report)
        }
        .instrument(info_span!("promote"))
        .await
    }

    async fn promote(&self, current: Stage, next: Stage) -> Result<usize> {
        let mut promoted = 0;
        let mut documents = self.ctx.store.query(current, &[State::Success]);

        while let Some(mut document) = documents.try_next().await? {
            document.set_stage(next);
            document.set_state(State::Waiting);
            self.ctx.store.put(&document).await?;

            info!(
                document_id = %document.document_id,
                from = %current,
                to = %next,
                "Promoted document"
            );
            self.ctx
                .events
                .try_emit(types::DOCUMENT_PROMOTED, Some(document_payload(&document)));
            promoted += 1;
        }

        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Document;
    use crate::events::CollectingEventSink;
    use crate::store::{collect, DocumentStore, InMemoryDocumentStore};
    use crate::utils::{parse_stamp, FakeClock};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryDocumentStore>, Arc<CollectingEventSink>, PromotionManager) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let ctx = PhaseContext::new(store.clone(), Arc::new(FakeClock::default()), events.clone());
        (store, events, PromotionManager::new(ctx))
    }

    async fn seed(store: &InMemoryDocumentStore, id: &str, stage: Stage, state: State) {
        let doc = Document::new(id, "0", parse_stamp("2021-01-01T00:00:00Z").unwrap()).at(stage, state);
        store.put(&doc).await.unwrap();
    }

    #[tokio::test]
    async fn test_success_moves_one_stage() {
        let (store, events, manager) = setup();
        seed(&store, "a", Stage::Extract, State::Success).await;
        seed(&store, "b", Stage::Extract, State::Success).await;

        let report = manager.run().await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.promoted.get(&Stage::Extract), Some(&2));
        let waiting = collect(store.as_ref(), Stage::Reshape, &[State::Waiting]).await.unwrap();
        assert_eq!(waiting.len(), 2);
        assert_eq!(store.count(Stage::Operate, &State::ALL).await.unwrap(), 0);
        assert_eq!(events.count(types::DOCUMENT_PROMOTED), 2);
    }

    #[tokio::test]
    async fn test_other_states_stay_put() {
        let (store, _, manager) = setup();
        for (id, state) in [
            ("w", State::Waiting),
            ("r", State::Running),
            ("h", State::Holding),
            ("f", State::Failure),
            ("t", State::Timeout),
        ] {
            seed(&store, id, Stage::Convert, state).await;
        }

        assert_eq!(manager.run().await.unwrap().total(), 0);
        assert_eq!(store.count(Stage::Convert, &State::ALL).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_final_stage_success_is_retained() {
        let (store, _, manager) = setup();
        seed(&store, "done", Stage::Catalog, State::Success).await;

        assert_eq!(manager.run().await.unwrap().total(), 0);
        let doc = store.get(&"done".into()).await.unwrap().unwrap();
        assert_eq!(doc.stage_state.to_string(), "Catalog#Success");
    }

    #[tokio::test]
    async fn test_chain_of_successes_advances_each_once() {
        let (store, _, manager) = setup();
        seed(&store, "a", Stage::Acquire, State::Success).await;
        seed(&store, "c", Stage::Convert, State::Success).await;

        manager.run().await.unwrap();

        let a = store.get(&"a".into()).await.unwrap().unwrap();
        let c = store.get(&"c".into()).await.unwrap().unwrap();
        assert_eq!(a.stage_state.to_string(), "Convert#Waiting");
        assert_eq!(c.stage_state.to_string(), "Extract#Waiting");
    }

    #[tokio::test]
    async fn test_promotion_keeps_maps() {
        let (store, _, manager) = setup();
        let mut doc = Document::new("d1", "0", parse_stamp("2021-01-01T00:00:00Z").unwrap())
            .at(Stage::Acquire, State::Success);
        doc.maps.acquire.retry_count = 2;
        store.put(&doc).await.unwrap();

        manager.run().await.unwrap();

        let promoted = store.get(&"d1".into()).await.unwrap().unwrap();
        assert_eq!(promoted.maps.acquire.retry_count, 2);
        assert_eq!(promoted.current_map().retry_count, 0);
    }
}
