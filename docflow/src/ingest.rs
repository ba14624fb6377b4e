//! Document ingestion from blob-arrival notifications.
//!
//! An arrival creates a document at `(acquire, WAITING)` and then fires the
//! pipeline trigger once for the whole batch.

use crate::core::{BlobRef, Document, DocumentId};
use crate::errors::{DocflowError, Result};
use crate::events::{document_payload, types, SharedEventSink};
use crate::pipeline::{FireOutcome, PipelineTrigger};
use crate::store::SharedStore;
use crate::utils::{parse_stamp, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A new artifact landed in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalNotice {
    /// Container the artifact landed in.
    pub container: String,
    /// Object path, conventionally `acquire/<priority>/<document>.<ext>`.
    pub path: String,
    /// When the artifact arrived.
    pub event_time: Timestamp,
    /// Explicit priority bucket, overriding the one in the path.
    #[serde(default)]
    pub priority: Option<String>,
}

impl ArrivalNotice {
    /// Creates a notice with no explicit priority.
    #[must_use]
    pub fn new(container: impl Into<String>, path: impl Into<String>, event_time: Timestamp) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
            event_time,
            priority: None,
        }
    }

    /// Sets an explicit priority bucket.
    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// File stem of the last path segment, lower-cased.
    ///
    /// Only the final extension is stripped, so `scan.v2.pdf` becomes
    /// `scan.v2`. A name that is all extension (`.pdf`) is kept whole.
    #[must_use]
    pub fn document_id(&self) -> DocumentId {
        let last = self.path.rsplit('/').next().unwrap_or_default();
        let stem = match last.rsplit_once('.') {
            Some((stem, _)) if !stem.trim_start_matches('.').is_empty() => stem,
            _ => last,
        };
        DocumentId::new(stem.to_lowercase())
    }

    /// The priority bucket: explicit, else the second path segment when the
    /// path has more than one `/`, else `"0"`.
    #[must_use]
    pub fn order(&self) -> String {
        if let Some(priority) = &self.priority {
            return priority.clone();
        }
        if self.path.matches('/').count() > 1 {
            if let Some(segment) = self.path.split('/').nth(1) {
                return segment.to_string();
            }
        }
        "0".to_string()
    }

    /// The document this arrival creates.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut document = Document::new(self.document_id(), self.order(), self.event_time);
        document.maps.acquire.stage_uri = Some(BlobRef::new(self.container.clone(), self.path.clone()));
        document
    }

    /// Decodes every record of a storage event notification.
    ///
    /// Accepts `{"Records": [{"eventTime", "s3": {"bucket": {"name"},
    /// "object": {"key"}}}]}`. A body without records yields no notices.
    pub fn from_records(body: &str) -> Result<Vec<Self>> {
        let event: StorageEvent = serde_json::from_str(body)?;
        event
            .records
            .into_iter()
            .map(|record| {
                let event_time = parse_stamp(&record.event_time)
                    .map_err(|e| DocflowError::malformed_notice(format!("eventTime '{}': {e}", record.event_time)))?;
                Ok(Self::new(record.s3.bucket.name, record.s3.object.key, event_time))
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct StorageEvent {
    #[serde(rename = "Records", default)]
    records: Vec<StorageRecord>,
}

#[derive(Deserialize)]
struct StorageRecord {
    #[serde(rename = "eventTime")]
    event_time: String,
    s3: StorageEntity,
}

#[derive(Deserialize)]
struct StorageEntity {
    bucket: Named,
    object: Keyed,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Keyed {
    key: String,
}

/// Result of one ingestion batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents written, in notice order.
    pub documents: Vec<DocumentId>,
    /// What firing the trigger did, if a trigger is attached.
    pub fired: Option<FireOutcome>,
}

/// Persists arrivals and kicks the scheduler.
pub struct Ingestor {
    store: SharedStore,
    events: SharedEventSink,
    trigger: Option<Arc<PipelineTrigger>>,
}

impl Ingestor {
    /// Creates an ingestor with no trigger attached.
    #[must_use]
    pub fn new(store: SharedStore, events: SharedEventSink) -> Self {
        Self {
            store,
            events,
            trigger: None,
        }
    }

    /// Fires this trigger after every batch.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Arc<PipelineTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Writes one document per notice.
    ///
    /// Re-ingesting an id overwrites the stored document and restarts it at
    /// acquire.
    pub async fn persist(&self, notices: &[ArrivalNotice]) -> Result<Vec<DocumentId>> {
        let mut documents = Vec::with_capacity(notices.len());
        for notice in notices {
            let document = notice.to_document();
            self.store.put(&document).await?;
            info!(
                document_id = %document.document_id,
                order = %document.order_stamp.order,
                "Ingested new document"
            );
            self.events
                .try_emit(types::DOCUMENT_INGESTED, Some(document_payload(&document)));
            documents.push(document.document_id);
        }
        Ok(documents)
    }

    /// Persists the batch, then fires the trigger once.
    pub async fn ingest(&self, notices: &[ArrivalNotice]) -> Result<IngestReport> {
        let documents = self.persist(notices).await?;
        let fired = self.trigger.as_ref().map(|trigger| trigger.fire());
        Ok(IngestReport { documents, fired })
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}
