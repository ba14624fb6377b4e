//! Error types for the docflow pipeline.
//!
//! Orchestration failures fall into two groups: collaborator failures
//! (store, channel, invoker) that the scheduler simply re-attempts on its
//! next iteration, and data failures (bad encodings, updates that do not fit
//! a stage) that are reported against a single document.

use crate::core::Stage;
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocflowError>;

/// The main error type for docflow operations.
#[derive(Debug, Error)]
pub enum DocflowError {
    /// The document store failed to read or write.
    #[error("Store error: {0}")]
    Store(String),

    /// A stage channel failed to send, receive, or acknowledge.
    #[error("Channel error for stage '{stage}': {message}")]
    Channel {
        /// The stage whose channel failed.
        stage: Stage,
        /// What went wrong.
        message: String,
    },

    /// The invocation facility failed outside of a normal rejection.
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// A `Stage#State` string did not decode to exactly one valid pair.
    #[error("Invalid stage state: '{0}'")]
    InvalidStageState(String),

    /// An `Order#Stamp` string did not decode.
    #[error("Invalid order stamp: '{0}'")]
    InvalidOrderStamp(String),

    /// A blob reference string did not decode.
    #[error("Invalid blob reference: '{0}'")]
    InvalidBlobRef(String),

    /// A map update carried fields that belong to another stage.
    #[error("Update for stage '{update}' cannot be merged into the {target} map")]
    MismatchedUpdate {
        /// The stage map being updated.
        target: Stage,
        /// The stage the update's extras belong to.
        update: Stage,
    },

    /// A provider notification could not be translated into a message.
    #[error("Malformed notice: {0}")]
    MalformedNotice(String),

    /// Configuration was missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocflowError {
    /// Creates a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a channel error.
    #[must_use]
    pub fn channel(stage: Stage, message: impl Into<String>) -> Self {
        Self::Channel {
            stage,
            message: message.into(),
        }
    }

    /// Creates an invocation error.
    #[must_use]
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a malformed-notice error.
    #[must_use]
    pub fn malformed_notice(message: impl Into<String>) -> Self {
        Self::MalformedNotice(message.into())
    }

    /// Returns true for errors a later scheduler iteration may clear on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Channel { .. } | Self::Invocation(_) | Self::Io(_)
        )
    }

    /// Converts to a JSON payload suitable for a document's exception list.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let kind = match self {
            Self::Store(_) => "Store",
            Self::Channel { .. } => "Channel",
            Self::Invocation(_) => "Invocation",
            Self::InvalidStageState(_) => "InvalidStageState",
            Self::InvalidOrderStamp(_) => "InvalidOrderStamp",
            Self::InvalidBlobRef(_) => "InvalidBlobRef",
            Self::MismatchedUpdate { .. } => "MismatchedUpdate",
            Self::MalformedNotice(_) => "MalformedNotice",
            Self::Config(_) => "Config",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
        };

        serde_json::json!({
            "type": kind,
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let err = DocflowError::channel(Stage::Extract, "queue unavailable");
        assert_eq!(
            err.to_string(),
            "Channel error for stage 'extract': queue unavailable"
        );
    }

    #[test]
    fn test_mismatched_update_display() {
        let err = DocflowError::MismatchedUpdate {
            target: Stage::Convert,
            update: Stage::Augment,
        };
        assert!(err.to_string().contains("'augment'"));
        assert!(err.to_string().contains("convert map"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DocflowError::store("throttled").is_transient());
        assert!(DocflowError::invocation("timeout").is_transient());
        assert!(!DocflowError::InvalidStageState("x#y".to_string()).is_transient());
        assert!(!DocflowError::config("bad").is_transient());
    }

    #[test]
    fn test_to_payload() {
        let err = DocflowError::malformed_notice("missing JobTag");
        let payload = err.to_payload();

        assert_eq!(payload["type"], "MalformedNotice");
        assert_eq!(payload["message"], "Malformed notice: missing JobTag");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: DocflowError = parse.unwrap_err().into();
        assert!(matches!(err, DocflowError::Serialization(_)));
    }
}
