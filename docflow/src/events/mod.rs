//! Lifecycle events emitted by the pipeline phases.
//!
//! Phases report each document transition to an [`EventSink`] handed to them
//! at construction; there is no process-wide sink.

mod sink;

pub use sink::{
    CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent, SharedEventSink,
};

use crate::core::{Document, Stage};
use serde_json::{json, Value};

/// Event type names.
pub mod types {
    /// Begin accepted a launch.
    pub const DOCUMENT_LAUNCHED: &str = "document.launched";
    /// Begin recorded a rejected or denied launch.
    pub const DOCUMENT_HELD: &str = "document.held";
    /// A document reached `FAILURE`.
    pub const DOCUMENT_FAILED: &str = "document.failed";
    /// Await absorbed a passing completion.
    pub const DOCUMENT_COMPLETED: &str = "document.completed";
    /// Await dropped a message that no longer applies.
    pub const DOCUMENT_DISCARDED: &str = "document.discarded";
    /// The timeout sweep expired a running document.
    pub const DOCUMENT_TIMED_OUT: &str = "document.timed_out";
    /// Promotion moved a document to the next stage.
    pub const DOCUMENT_PROMOTED: &str = "document.promoted";
    /// Ingestion created a document.
    pub const DOCUMENT_INGESTED: &str = "document.ingested";
    /// The scheduler completed a step.
    pub const PIPELINE_STEP: &str = "pipeline.step";
}

/// Builds the standard payload describing a document's position.
#[must_use]
pub fn document_payload(document: &Document) -> Value {
    let map = document.current_map();
    json!({
        "document_id": document.document_id.as_str(),
        "stage_state": document.stage_state.to_string(),
        "retry_count": map.retry_count,
        "actor_grade": map.actor_grade,
    })
}

/// Builds a payload for a message dropped by the await phase.
#[must_use]
pub fn discard_payload(stage: Stage, document_id: &str, reason: &str) -> Value {
    json!({
        "stage": stage,
        "document_id": document_id,
        "reason": reason,
    })
}
