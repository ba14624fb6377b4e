//! The document record and its per-stage maps.

use super::status::HASH;
use super::{BlobRef, Grade, MapUpdate, Stage, StageExtras, State, StageState};
use crate::errors::{DocflowError, Result};
use crate::utils::{format_stamp, parse_stamp, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a document.
///
/// Identifiers are compared after case normalization; the store normalizes on
/// every read and write.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates an identifier exactly as given.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the case-normalized form.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self(self.0.trim().to_lowercase())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Ingestion priority bucket plus ingestion time.
///
/// Orders by bucket first, then by stamp, which is the order every stage
/// query yields documents in. Stored as `"{Order}#{Stamp}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderStamp {
    /// Priority bucket (lower sorts first).
    pub order: String,
    /// Ingestion time.
    pub stamp: Timestamp,
}

impl OrderStamp {
    /// Creates a new order stamp.
    #[must_use]
    pub fn new(order: impl Into<String>, stamp: Timestamp) -> Self {
        Self {
            order: order.into(),
            stamp,
        }
    }
}

impl fmt::Display for OrderStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{HASH}{}", self.order, format_stamp(&self.stamp))
    }
}

impl FromStr for OrderStamp {
    type Err = DocflowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || DocflowError::InvalidOrderStamp(s.to_string());
        let (order, stamp) = s.split_once(HASH).ok_or_else(invalid)?;
        let stamp = parse_stamp(stamp).map_err(|_| invalid())?;
        Ok(Self::new(order, stamp))
    }
}

impl TryFrom<String> for OrderStamp {
    type Error = DocflowError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderStamp> for String {
    fn from(value: OrderStamp) -> Self {
        value.to_string()
    }
}

/// Per-stage scratch record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageMap {
    /// Number of rejected launches at this stage.
    pub retry_count: u32,
    /// Where this stage wrote its artifacts.
    pub stage_uri: Option<BlobRef>,
    /// Grade of the last attempt.
    pub actor_grade: Grade,
    /// When the last accepted launch happened.
    pub start_stamp: Option<Timestamp>,
    /// When the last attempt reached an outcome.
    pub final_stamp: Option<Timestamp>,
    /// Captured error payloads, oldest first.
    pub exceptions: Vec<serde_json::Value>,
}

/// Extract stage map: the common fields plus the analysis job id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractMap {
    /// Common stage fields.
    #[serde(flatten)]
    pub base: StageMap,
    /// Identifier of the running table-analysis job.
    pub analysis_id: Option<String>,
}

/// Augment stage map: the common fields plus review loop references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentMap {
    /// Common stage fields.
    #[serde(flatten)]
    pub base: StageMap,
    /// Workflow that produced the review answers.
    pub review_flow: Option<String>,
    /// Primary review loop reference.
    pub primary_loop: Option<String>,
    /// Quality review loop reference.
    pub quality_loop: Option<String>,
}

/// One map per stage, addressed through the [`Stage`] enum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageMaps {
    /// Acquire stage map.
    pub acquire: StageMap,
    /// Convert stage map.
    pub convert: StageMap,
    /// Extract stage map.
    pub extract: ExtractMap,
    /// Reshape stage map.
    pub reshape: StageMap,
    /// Operate stage map.
    pub operate: StageMap,
    /// Augment stage map.
    pub augment: AugmentMap,
    /// Catalog stage map.
    pub catalog: StageMap,
}

impl StageMaps {
    /// Returns the common fields of a stage's map.
    #[must_use]
    pub fn get(&self, stage: Stage) -> &StageMap {
        match stage {
            Stage::Acquire => &self.acquire,
            Stage::Convert => &self.convert,
            Stage::Extract => &self.extract.base,
            Stage::Reshape => &self.reshape,
            Stage::Operate => &self.operate,
            Stage::Augment => &self.augment.base,
            Stage::Catalog => &self.catalog,
        }
    }

    /// Returns the common fields of a stage's map, mutably.
    pub fn get_mut(&mut self, stage: Stage) -> &mut StageMap {
        match stage {
            Stage::Acquire => &mut self.acquire,
            Stage::Convert => &mut self.convert,
            Stage::Extract => &mut self.extract.base,
            Stage::Reshape => &mut self.reshape,
            Stage::Operate => &mut self.operate,
            Stage::Augment => &mut self.augment.base,
            Stage::Catalog => &mut self.catalog,
        }
    }

    /// Merges an update into the given stage's map.
    ///
    /// Nothing is written when the update's extras belong to another stage.
    pub fn merge(&mut self, stage: Stage, update: &MapUpdate) -> Result<()> {
        if let Some(owner) = update.extras.stage() {
            if owner != stage {
                return Err(DocflowError::MismatchedUpdate {
                    target: stage,
                    update: owner,
                });
            }
        }

        match &update.extras {
            StageExtras::Common => {}
            StageExtras::Extract { analysis_id } => {
                if let Some(id) = analysis_id {
                    self.extract.analysis_id = Some(id.clone());
                }
            }
            StageExtras::Augment {
                review_flow,
                primary_loop,
                quality_loop,
            } => {
                let augment = &mut self.augment;
                if let Some(flow) = review_flow {
                    augment.review_flow = Some(flow.clone());
                }
                if let Some(primary) = primary_loop {
                    augment.primary_loop = Some(primary.clone());
                }
                if let Some(quality) = quality_loop {
                    augment.quality_loop = Some(quality.clone());
                }
            }
        }

        let map = self.get_mut(stage);
        if let Some(uri) = &update.stage_uri {
            map.stage_uri = Some(uri.clone());
        }
        map.exceptions.extend(update.exceptions.iter().cloned());

        Ok(())
    }
}

/// The unit of work moved through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier.
    pub document_id: DocumentId,
    /// Current `(stage, state)` position.
    pub stage_state: StageState,
    /// Priority bucket and ingestion time.
    pub order_stamp: OrderStamp,
    /// Per-stage scratch records.
    #[serde(default)]
    pub maps: StageMaps,
}

impl Document {
    /// Creates a freshly ingested document at `(acquire, WAITING)`.
    #[must_use]
    pub fn new(document_id: impl Into<DocumentId>, order: impl Into<String>, stamp: Timestamp) -> Self {
        Self {
            document_id: document_id.into(),
            stage_state: StageState::new(Stage::Acquire, State::Waiting),
            order_stamp: OrderStamp::new(order, stamp),
            maps: StageMaps::default(),
        }
    }

    /// Places the document at a specific position.
    #[must_use]
    pub fn at(mut self, stage: Stage, state: State) -> Self {
        self.stage_state = StageState::new(stage, state);
        self
    }

    /// Returns the current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage_state.stage
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.stage_state.state
    }

    /// Moves the document to another stage, keeping its state.
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage_state.stage = stage;
    }

    /// Changes the state within the current stage.
    pub fn set_state(&mut self, state: State) {
        self.stage_state.state = state;
    }

    /// The map of the current stage.
    #[must_use]
    pub fn current_map(&self) -> &StageMap {
        self.maps.get(self.stage())
    }

    /// The map of the current stage, mutably.
    ///
    /// This is the only map phases are allowed to write.
    pub fn current_map_mut(&mut self) -> &mut StageMap {
        let stage = self.stage();
        self.maps.get_mut(stage)
    }

    /// Merges an update into the current stage's map.
    pub fn merge_current(&mut self, update: &MapUpdate) -> Result<()> {
        let stage = self.stage();
        self.maps.merge(stage, update)
    }

    /// Serializes the document as the payload handed to an actor.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a document from an actor payload.
    pub fn from_payload(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_stamp;
    use pretty_assertions::assert_eq;

    fn stamp() -> Timestamp {
        parse_stamp("2021-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn test_new_document_defaults() {
        let doc = Document::new("D000", "1", stamp());

        assert_eq!(doc.stage(), Stage::Acquire);
        assert_eq!(doc.state(), State::Waiting);
        assert_eq!(doc.current_map().retry_count, 0);
        assert_eq!(doc.current_map().actor_grade, Grade::Wait);
        assert_eq!(doc.document_id.normalized().as_str(), "d000");
    }

    #[test]
    fn test_current_map_follows_stage() {
        let mut doc = Document::new("d1", "0", stamp());
        doc.maps.acquire.retry_count = 456;
        assert_eq!(doc.current_map().retry_count, 456);

        doc.set_stage(Stage::Extract);
        doc.current_map_mut().retry_count = 2;

        assert_eq!(doc.maps.extract.base.retry_count, 2);
        assert_eq!(doc.maps.acquire.retry_count, 456);
    }

    #[test]
    fn test_merge_extract_update() {
        let mut doc = Document::new("d1", "0", stamp()).at(Stage::Extract, State::Running);
        let update = MapUpdate::analysis("job-42").with_stage_uri(BlobRef::new("b", "extract/d1/job-42"));

        doc.merge_current(&update).unwrap();

        assert_eq!(doc.maps.extract.analysis_id.as_deref(), Some("job-42"));
        assert_eq!(doc.current_map().stage_uri.as_ref().unwrap().path, "extract/d1/job-42");
    }

    #[test]
    fn test_merge_rejects_foreign_extras() {
        let mut doc = Document::new("d1", "0", stamp()).at(Stage::Convert, State::Running);
        let update = MapUpdate::analysis("job-42").with_stage_uri(BlobRef::new("b", "x"));

        let err = doc.merge_current(&update).unwrap_err();

        assert!(matches!(
            err,
            DocflowError::MismatchedUpdate { target: Stage::Convert, update: Stage::Extract }
        ));
        assert_eq!(doc.maps, StageMaps::default());
    }

    #[test]
    fn test_order_stamp_ordering() {
        let early = OrderStamp::new("0", parse_stamp("2021-01-02T00:00:00Z").unwrap());
        let late = OrderStamp::new("0", parse_stamp("2021-01-03T00:00:00Z").unwrap());
        let low_priority = OrderStamp::new("1", parse_stamp("2021-01-01T00:00:00Z").unwrap());

        assert!(early < late);
        assert!(late < low_priority);
    }

    #[test]
    fn test_order_stamp_encoding() {
        let key = OrderStamp::new("1", stamp());
        assert_eq!(key.to_string(), "1#2021-01-01T00:00:00Z");
        assert_eq!(key.to_string().parse::<OrderStamp>().unwrap(), key);
        assert!("no-separator".parse::<OrderStamp>().is_err());
    }

    #[test]
    fn test_document_json_keeps_every_map() {
        let mut doc = Document::new("d1", "0", stamp()).at(Stage::Augment, State::Success);
        doc.maps.acquire.retry_count = 5;
        doc.maps.augment.review_flow = Some("primary".to_string());
        doc.maps.augment.base.exceptions.push(serde_json::json!({"something": "wrong"}));

        let decoded = Document::from_payload(&doc.to_payload().unwrap()).unwrap();

        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_document_rejects_invalid_stage_state() {
        let raw = serde_json::json!({
            "document_id": "d1",
            "stage_state": "Cleanup#Waiting",
            "order_stamp": "0#2021-01-01T00:00:00Z",
        });
        assert!(serde_json::from_value::<Document>(raw).is_err());
    }
}
