//! Typed field updates carried by completion messages.

use super::{BlobRef, Stage};
use serde::{Deserialize, Serialize};

/// Stage-specific fields an update may set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase", deny_unknown_fields)]
pub enum StageExtras {
    /// Only the common stage-map fields are updated.
    #[default]
    Common,
    /// Extract stage fields.
    Extract {
        /// Identifier of the external table-analysis job.
        #[serde(default)]
        analysis_id: Option<String>,
    },
    /// Augment stage fields.
    Augment {
        /// Name of the review workflow that produced the answers.
        #[serde(default)]
        review_flow: Option<String>,
        /// Reference of the primary review loop.
        #[serde(default)]
        primary_loop: Option<String>,
        /// Reference of the quality review loop.
        #[serde(default)]
        quality_loop: Option<String>,
    },
}

impl StageExtras {
    /// The stage these extras belong to, or `None` for common-only updates.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Common => None,
            Self::Extract { .. } => Some(Stage::Extract),
            Self::Augment { .. } => Some(Stage::Augment),
        }
    }
}

/// Field updates merged into the current stage map.
///
/// Unknown fields are rejected when decoding so a misspelt update never
/// silently disappears.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapUpdate {
    /// Location of the artifacts the stage produced.
    pub stage_uri: Option<BlobRef>,
    /// Error payloads to append.
    pub exceptions: Vec<serde_json::Value>,
    /// Stage-specific fields.
    pub extras: StageExtras,
}

impl MapUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the artifact location.
    #[must_use]
    pub fn with_stage_uri(mut self, uri: BlobRef) -> Self {
        self.stage_uri = Some(uri);
        self
    }

    /// Appends an error payload.
    #[must_use]
    pub fn with_exception(mut self, payload: serde_json::Value) -> Self {
        self.exceptions.push(payload);
        self
    }

    /// Sets stage-specific fields.
    #[must_use]
    pub fn with_extras(mut self, extras: StageExtras) -> Self {
        self.extras = extras;
        self
    }

    /// Shorthand for an extract update carrying an analysis job id.
    #[must_use]
    pub fn analysis(analysis_id: impl Into<String>) -> Self {
        Self::new().with_extras(StageExtras::Extract {
            analysis_id: Some(analysis_id.into()),
        })
    }

    /// Returns true if applying this update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stage_uri.is_none() && self.exceptions.is_empty() && self.extras == StageExtras::Common
    }
}
