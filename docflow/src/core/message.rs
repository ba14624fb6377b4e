//! Completion notices carried on stage channels.

use super::{DocumentId, Grade, MapUpdate};
use crate::errors::Result;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completion notice for one execution attempt.
///
/// Produced by synchronous actors directly or translated from provider
/// callbacks by the adapters, and consumed by the owning stage's await phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id of this notice, stable across redeliveries.
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    /// The document the attempt ran for.
    pub document_id: DocumentId,
    /// Outcome of the attempt.
    pub actor_grade: Grade,
    /// Fields to merge into the document's current stage map.
    #[serde(default)]
    pub updates: MapUpdate,
    /// When the attempt started.
    #[serde(default)]
    pub start_stamp: Option<Timestamp>,
    /// When the attempt finished.
    #[serde(default)]
    pub final_stamp: Option<Timestamp>,
    /// Error detail for failed attempts.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Message {
    /// Creates a passing notice carrying the given updates.
    #[must_use]
    pub fn pass(document_id: impl Into<DocumentId>, updates: MapUpdate) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            document_id: document_id.into(),
            actor_grade: Grade::Pass,
            updates,
            start_stamp: None,
            final_stamp: None,
            error: None,
        }
    }

    /// Creates a failing notice with an error payload.
    #[must_use]
    pub fn fail(document_id: impl Into<DocumentId>, error: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            document_id: document_id.into(),
            actor_grade: Grade::Fail,
            updates: MapUpdate::default(),
            start_stamp: None,
            final_stamp: None,
            error: Some(error),
        }
    }

    /// Sets the start and finish stamps.
    #[must_use]
    pub fn with_stamps(mut self, start: Option<Timestamp>, finish: Option<Timestamp>) -> Self {
        self.start_stamp = start;
        self.final_stamp = finish;
        self
    }

    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.actor_grade == Grade::Pass
    }

    /// Encodes the notice as a channel body.
    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a notice from a channel body.
    pub fn from_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlobRef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pass_message() {
        let update = MapUpdate::new().with_stage_uri(BlobRef::new("b", "convert/d1/d1.png"));
        let message = Message::pass("d1", update.clone());

        assert!(message.is_pass());
        assert_eq!(message.updates, update);
        assert!(message.error.is_none());
    }

    #[test]
    fn test_fail_message() {
        let message = Message::fail("d1", json!({"error": "boom"}));
        assert_eq!(message.actor_grade, Grade::Fail);
        assert_eq!(message.error, Some(json!({"error": "boom"})));
    }

    #[test]
    fn test_body_keeps_message_id() {
        let message = Message::pass("d1", MapUpdate::analysis("job-1"));
        let decoded = Message::from_body(&message.to_body().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_minimal_body_decodes() {
        let decoded = Message::from_body(r#"{"document_id": "D1", "actor_grade": "fail"}"#).unwrap();
        assert_eq!(decoded.document_id.as_str(), "D1");
        assert!(!decoded.is_pass());
        assert!(decoded.updates.is_empty());
    }

    #[test]
    fn test_unknown_update_field_rejected() {
        let body = r#"{"document_id": "d1", "actor_grade": "pass", "updates": {"Bogus": 1}}"#;
        assert!(Message::from_body(body).is_err());
    }
}
