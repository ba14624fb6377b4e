//! In-process document store backed by `DashMap`.

use super::DocumentStore;
use crate::core::{Document, DocumentId, OrderStamp, Stage, StageState, State};
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

type IndexEntry = (OrderStamp, DocumentId);

/// A thread-safe in-memory [`DocumentStore`].
///
/// Records live in a `DashMap`; the `Stage#State` secondary index is a sorted
/// set per key so range scans come out in `OrderStamp` order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    records: DashMap<DocumentId, Document>,
    index: RwLock<BTreeMap<StageState, BTreeSet<IndexEntry>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns every document, sorted by `(StageState, OrderStamp)`.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        let index = self.index.read();
        index
            .values()
            .flat_map(|entries| entries.iter())
            .filter_map(|(_, id)| self.records.get(id).map(|r| r.value().clone()))
            .collect()
    }

    /// Removes every document.
    pub fn clear(&self) {
        let mut index = self.index.write();
        index.clear();
        self.records.clear();
    }

    fn keys_for(&self, stage: Stage, states: &[State]) -> Vec<DocumentId> {
        let index = self.index.read();
        let mut entries: Vec<&IndexEntry> = states
            .iter()
            .filter_map(|state| index.get(&StageState::new(stage, *state)))
            .flat_map(|set| set.iter())
            .collect();
        // One state is already sorted; several need merging.
        if states.len() > 1 {
            entries.sort();
        }
        entries.into_iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, document_id: &DocumentId) -> Result<Option<Document>> {
        let key = document_id.normalized();
        Ok(self.records.get(&key).map(|r| r.value().clone()))
    }

    async fn put(&self, document: &Document) -> Result<()> {
        let key = document.document_id.normalized();
        let mut record = document.clone();
        record.document_id = key.clone();

        let mut index = self.index.write();
        if let Some(previous) = self.records.get(&key) {
            let old_key = previous.stage_state;
            let old_entry = (previous.order_stamp.clone(), key.clone());
            drop(previous);
            if let Some(set) = index.get_mut(&old_key) {
                set.remove(&old_entry);
                if set.is_empty() {
                    index.remove(&old_key);
                }
            }
        }
        index
            .entry(record.stage_state)
            .or_default()
            .insert((record.order_stamp.clone(), key.clone()));
        self.records.insert(key, record);

        Ok(())
    }

    fn query(&self, stage: Stage, states: &[State]) -> BoxStream<'_, Result<Document>> {
        let states = states.to_vec();
        let keys = self.keys_for(stage, &states);

        let live = keys.into_iter().filter_map(move |id| {
            self.records
                .get(&id)
                .map(|r| r.value().clone())
                .filter(|doc| doc.stage() == stage && states.contains(&doc.state()))
                .map(Ok)
        });

        stream::iter(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::collect;
    use crate::utils::parse_stamp;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;

    fn doc(id: &str, order: &str, stamp: &str) -> Document {
        Document::new(id, order, parse_stamp(stamp).unwrap())
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.document_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_get_normalizes_case() {
        let store = InMemoryDocumentStore::new();
        store.put(&doc("D000", "0", "2021-01-01T00:00:00Z")).await.unwrap();

        let found = store.get(&DocumentId::new("d000")).await.unwrap().unwrap();
        assert_eq!(found.document_id.as_str(), "d000");
        assert!(store.get(&DocumentId::new("D000 ")).await.unwrap().is_some());
        assert!(store.get(&DocumentId::new("d001")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_is_upsert() {
        let store = InMemoryDocumentStore::new();
        let mut d = doc("d1", "0", "2021-01-01T00:00:00Z");
        store.put(&d).await.unwrap();

        d.set_state(State::Running);
        store.put(&d).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.count(Stage::Acquire, &[State::Waiting]).await.unwrap(), 0);
        assert_eq!(store.count(Stage::Acquire, &[State::Running]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_orders_by_order_stamp() {
        let store = InMemoryDocumentStore::new();
        store.put(&doc("late", "0", "2021-01-03T00:00:00Z")).await.unwrap();
        store.put(&doc("low", "1", "2021-01-01T00:00:00Z")).await.unwrap();
        store.put(&doc("early", "0", "2021-01-02T00:00:00Z")).await.unwrap();

        let docs = collect(&store, Stage::Acquire, &[State::Waiting]).await.unwrap();

        assert_eq!(ids(&docs), vec!["early", "late", "low"]);
    }

    #[tokio::test]
    async fn test_query_merges_states() {
        let store = InMemoryDocumentStore::new();
        store.put(&doc("a", "0", "2021-01-01T00:00:00Z").at(Stage::Extract, State::Holding)).await.unwrap();
        store.put(&doc("b", "0", "2021-01-02T00:00:00Z").at(Stage::Extract, State::Waiting)).await.unwrap();
        store.put(&doc("c", "0", "2021-01-03T00:00:00Z").at(Stage::Extract, State::Holding)).await.unwrap();
        store.put(&doc("d", "0", "2021-01-01T00:00:00Z").at(Stage::Convert, State::Waiting)).await.unwrap();

        let docs = collect(&store, Stage::Extract, &State::LAUNCHABLE).await.unwrap();

        assert_eq!(ids(&docs), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_query_is_live() {
        let store = InMemoryDocumentStore::new();
        store.put(&doc("a", "0", "2021-01-01T00:00:00Z")).await.unwrap();
        store.put(&doc("b", "0", "2021-01-02T00:00:00Z")).await.unwrap();

        let mut stream = store.query(Stage::Acquire, &[State::Waiting]);
        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.document_id.as_str(), "a");

        // Moving "b" before it is yielded removes it from this walk.
        let moved = doc("b", "0", "2021-01-02T00:00:00Z").at(Stage::Acquire, State::Running);
        store.put(&moved).await.unwrap();
        assert!(stream.try_next().await.unwrap().is_none());
        drop(stream);

        // A fresh query sees the current positions.
        let running = collect(&store, Stage::Acquire, &[State::Running]).await.unwrap();
        assert_eq!(ids(&running), vec!["b"]);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let store = InMemoryDocumentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.count(Stage::Catalog, &State::ALL).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_and_clear() {
        let store = InMemoryDocumentStore::new();
        store.put(&doc("x", "0", "2021-01-01T00:00:00Z").at(Stage::Catalog, State::Success)).await.unwrap();
        store.put(&doc("y", "0", "2021-01-01T00:00:00Z")).await.unwrap();

        let all = store.snapshot();
        assert_eq!(ids(&all), vec!["y", "x"]);

        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }
}
