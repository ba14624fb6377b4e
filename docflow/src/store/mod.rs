//! Keyed document persistence with `(stage, state)` lookups.
//!
//! The store is the single source of truth for document positions. Every
//! phase finds its work through [`DocumentStore::query`], which walks the
//! `Stage#State` index in `OrderStamp` order.

mod memory;

pub use memory::InMemoryDocumentStore;

use crate::core::{Document, DocumentId, Stage, State};
use crate::errors::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::sync::Arc;

/// Persistence contract the pipeline needs from a document store.
///
/// Implementations own identifier normalization: `get` and `put` must treat
/// ids that differ only by letter case as the same document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by id, or `None` if it does not exist.
    async fn get(&self, document_id: &DocumentId) -> Result<Option<Document>>;

    /// Upserts the full record. Last writer wins.
    async fn put(&self, document: &Document) -> Result<()>;

    /// Streams documents at `stage` whose state is one of `states`, ordered
    /// by `OrderStamp` ascending.
    ///
    /// The stream is a live view: a document that changes position before it
    /// is yielded is skipped. Calling `query` again starts a fresh walk.
    fn query(&self, stage: Stage, states: &[State]) -> BoxStream<'_, Result<Document>>;

    /// Counts documents at `stage` in any of `states`.
    async fn count(&self, stage: Stage, states: &[State]) -> Result<usize> {
        self.query(stage, states)
            .try_fold(0usize, |n, _| async move { Ok(n + 1) })
            .await
    }
}

/// Store handle shared between phases.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Loads every document at `stage` in any of `states` into memory.
pub async fn collect(store: &dyn DocumentStore, stage: Stage, states: &[State]) -> Result<Vec<Document>> {
    store.query(stage, states).try_collect().await
}
