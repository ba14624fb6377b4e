//! Completion adapters for stages whose work runs in external services.
//!
//! Providers report completion in their own event shapes. Each adapter
//! decodes one provider shape and translates it into a [`Message`] for the
//! owning stage's channel.

use crate::channel::{send_message, StageChannel};
use crate::core::{BlobRef, DocumentId, MapUpdate, Message, Stage, StageExtras};
use crate::errors::{DocflowError, Result};
use crate::utils::{parse_stamp, Timestamp};
use chrono::{TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::LazyLock;
use tracing::info;

/// Separator inside review loop names: `{flow}--{document}--{time}`.
pub const LOOP_NAME_SEPARATOR: &str = "--";

static FLOW_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":flow-definition/([^/]+)").expect("valid flow definition regex"));

/// Status a table-analysis job reports on success.
pub const ANALYSIS_SUCCEEDED: &str = "SUCCEEDED";

/// Job completion notice from the table-analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnalysisNotice {
    /// Identifier of the analysis job.
    pub job_id: String,
    /// Final job status.
    pub status: String,
    /// Tag set at submission: the document id.
    pub job_tag: String,
    /// Completion time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TopicEnvelope {
    message: String,
}

impl AnalysisNotice {
    /// The stage this adapter reports to.
    pub const STAGE: Stage = Stage::Extract;

    /// Decodes a notice, unwrapping a topic envelope (`{"Message": "..."}`)
    /// when present.
    pub fn from_body(body: &str) -> Result<Self> {
        let inner = match serde_json::from_str::<TopicEnvelope>(body) {
            Ok(envelope) => envelope.message,
            Err(_) => body.to_string(),
        };
        serde_json::from_str(&inner)
            .map_err(|e| DocflowError::malformed_notice(format!("analysis notice: {e}")))
    }

    /// Returns true if the job succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ANALYSIS_SUCCEEDED
    }

    fn finished_at(&self) -> Option<Timestamp> {
        self.timestamp
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Translates the notice into an extract-stage message.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let update = MapUpdate::analysis(self.job_id.clone());
        let document_id = DocumentId::new(self.job_tag.clone());

        let message = if self.succeeded() {
            Message::pass(document_id, update)
        } else {
            let mut failed = Message::fail(
                document_id,
                json!({ "job_id": self.job_id, "status": self.status }),
            );
            failed.updates = update;
            failed
        };
        message.with_stamps(None, self.finished_at())
    }
}

/// Review loop statuses that count as a finished review.
pub const REVIEW_DONE: [&str; 2] = ["Completed", "Stopped"];

/// Status-change event for a human review loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewLoopNotice {
    /// Event time.
    #[serde(default)]
    pub time: Option<String>,
    /// Event detail.
    pub detail: ReviewLoopDetail,
}

/// The detail block of a [`ReviewLoopNotice`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLoopDetail {
    /// `{flow}--{document}--{time}`.
    pub human_loop_name: String,
    /// Loop status.
    pub human_loop_status: String,
    /// Workflow the loop ran under.
    #[serde(default)]
    pub flow_definition_arn: Option<String>,
    /// Where reviewer answers were written.
    #[serde(default)]
    pub human_loop_output: Option<ReviewLoopOutput>,
    /// Provider failure reason.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Output location of a review loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLoopOutput {
    /// Provider URL of the output object.
    pub output_s3_uri: String,
}

impl ReviewLoopNotice {
    /// The stage this adapter reports to.
    pub const STAGE: Stage = Stage::Augment;

    /// Decodes a status-change event.
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| DocflowError::malformed_notice(format!("review loop notice: {e}")))
    }

    /// The document id encoded in the loop name.
    pub fn document_id(&self) -> Result<DocumentId> {
        self.detail
            .human_loop_name
            .split(LOOP_NAME_SEPARATOR)
            .nth(1)
            .filter(|id| !id.is_empty())
            .map(DocumentId::new)
            .ok_or_else(|| {
                DocflowError::malformed_notice(format!(
                    "loop name '{}' carries no document id",
                    self.detail.human_loop_name
                ))
            })
    }

    /// The workflow name, from the flow definition or the loop name prefix.
    #[must_use]
    pub fn flow_name(&self) -> Option<String> {
        let from_arn = self.detail.flow_definition_arn.as_deref().and_then(|arn| {
            FLOW_DEFINITION
                .captures(arn)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        });
        from_arn.or_else(|| {
            self.detail
                .human_loop_name
                .split(LOOP_NAME_SEPARATOR)
                .next()
                .filter(|flow| !flow.is_empty())
                .map(str::to_string)
        })
    }

    /// Returns true if the loop finished with reviewer answers.
    #[must_use]
    pub fn is_done(&self) -> bool {
        REVIEW_DONE.contains(&self.detail.human_loop_status.as_str())
    }

    /// Translates the event into an augment-stage message.
    pub fn to_message(&self) -> Result<Message> {
        let document_id = self.document_id()?;
        let finished = self.time.as_deref().and_then(|t| parse_stamp(t).ok());

        if !self.is_done() {
            let error = json!({
                "status": self.detail.human_loop_status,
                "failure_reason": self.detail.failure_reason,
                "loop": self.detail.human_loop_name,
            });
            return Ok(Message::fail(document_id, error).with_stamps(None, finished));
        }

        let output = self
            .detail
            .human_loop_output
            .as_ref()
            .ok_or_else(|| DocflowError::malformed_notice("finished loop without output"))?;
        let stage_uri: BlobRef = output.output_s3_uri.parse()?;

        let update = MapUpdate::new()
            .with_stage_uri(stage_uri)
            .with_extras(StageExtras::Augment {
                review_flow: self.flow_name(),
                primary_loop: None,
                quality_loop: None,
            });
        Ok(Message::pass(document_id, update).with_stamps(None, finished))
    }
}

/// Enqueues a translated message on its stage channel.
pub async fn forward(channel: &dyn StageChannel, message: &Message) -> Result<()> {
    info!(
        stage = %channel.stage(),
        document_id = %message.document_id,
        grade = %message.actor_grade,
        "Forwarding provider completion"
    );
    send_message(channel, message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{drain, InMemoryStageChannel};
    use crate::config::ChannelSettings;
    use crate::core::Grade;
    use pretty_assertions::assert_eq;

    const ANALYSIS_BODY: &str = r#"{"Type": "Notification", "Message": "{\"JobId\":\"47a9\",\"Status\":\"SUCCEEDED\",\"API\":\"StartDocumentAnalysis\",\"JobTag\":\"008\",\"Timestamp\":1610589186182}"}"#;

    fn review_body(status: &str) -> String {
        json!({
            "detail-type": "SageMaker A2I HumanLoop Status Change",
            "time": "2021-01-01T00:00:00Z",
            "detail": {
                "flowDefinitionArn": "arn:aws:sagemaker:us-east-1:1234:flow-definition/primary",
                "humanLoopName": "primary--123--2021-01-01t00-00-00-000000",
                "humanLoopOutput": {"outputS3Uri": "s3://store/augment/.a2i/primary/output.json"},
                "humanLoopStatus": status,
                "failureReason": null
            }
        })
        .to_string()
    }

    #[test]
    fn test_analysis_notice_from_topic_envelope() {
        let notice = AnalysisNotice::from_body(ANALYSIS_BODY).unwrap();

        assert_eq!(notice.job_id, "47a9");
        assert_eq!(notice.job_tag, "008");
        assert!(notice.succeeded());

        let message = notice.to_message();
        assert_eq!(message.document_id.as_str(), "008");
        assert_eq!(message.actor_grade, Grade::Pass);
        assert_eq!(message.updates, MapUpdate::analysis("47a9"));
        assert_eq!(message.final_stamp.unwrap().timestamp_millis(), 1_610_589_186_182);
    }

    #[test]
    fn test_analysis_notice_failure() {
        let raw = r#"{"JobId": "j1", "Status": "FAILED", "JobTag": "d1"}"#;
        let message = AnalysisNotice::from_body(raw).unwrap().to_message();

        assert_eq!(message.actor_grade, Grade::Fail);
        assert_eq!(message.error.unwrap()["status"], "FAILED");
    }

    #[test]
    fn test_analysis_notice_malformed() {
        let err = AnalysisNotice::from_body(r#"{"Status": "SUCCEEDED"}"#).unwrap_err();
        assert!(matches!(err, DocflowError::MalformedNotice(_)));
    }

    #[test]
    fn test_review_notice_completed() {
        let notice = ReviewLoopNotice::from_body(&review_body("Completed")).unwrap();
        let message = notice.to_message().unwrap();

        assert_eq!(message.document_id.as_str(), "123");
        assert_eq!(message.actor_grade, Grade::Pass);
        let uri = message.updates.stage_uri.unwrap();
        assert_eq!(uri.container, "store");
        assert_eq!(uri.path, "augment/.a2i/primary/output.json");
        assert_eq!(
            message.updates.extras,
            StageExtras::Augment {
                review_flow: Some("primary".to_string()),
                primary_loop: None,
                quality_loop: None,
            }
        );
    }

    #[test]
    fn test_review_notice_stopped_counts_as_done() {
        let notice = ReviewLoopNotice::from_body(&review_body("Stopped")).unwrap();
        assert!(notice.is_done());
    }

    #[test]
    fn test_review_notice_failed() {
        let notice = ReviewLoopNotice::from_body(&review_body("Failed")).unwrap();
        let message = notice.to_message().unwrap();

        assert_eq!(message.actor_grade, Grade::Fail);
        assert_eq!(message.error.unwrap()["status"], "Failed");
    }

    #[test]
    fn test_review_flow_name_falls_back_to_loop_name() {
        let mut notice = ReviewLoopNotice::from_body(&review_body("Completed")).unwrap();
        notice.detail.flow_definition_arn = None;
        notice.detail.human_loop_name = "quality--9--x".to_string();

        assert_eq!(notice.flow_name().as_deref(), Some("quality"));
        assert_eq!(notice.document_id().unwrap().as_str(), "9");
    }

    #[test]
    fn test_flow_definition_pattern() {
        let caps = FLOW_DEFINITION
            .captures("arn:aws:sagemaker:us-east-1:1234:flow-definition/quality/v2")
            .unwrap();
        assert_eq!(&caps[1], "quality");
        assert!(FLOW_DEFINITION.captures("arn:aws:sagemaker:us-east-1:1234:workteam/x").is_none());
    }

    #[test]
    fn test_review_loop_name_without_document() {
        let mut notice = ReviewLoopNotice::from_body(&review_body("Completed")).unwrap();
        notice.detail.human_loop_name = "primary".to_string();
        assert!(notice.to_message().is_err());
    }

    #[tokio::test]
    async fn test_forward_enqueues_on_stage_channel() {
        let channel = InMemoryStageChannel::new(Stage::Extract, ChannelSettings::default());
        let message = AnalysisNotice::from_body(ANALYSIS_BODY).unwrap().to_message();

        forward(&channel, &message).await.unwrap();

        let envelopes = drain(&channel).await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].message().unwrap(), message);
    }
}
