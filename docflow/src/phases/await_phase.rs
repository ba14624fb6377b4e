//! Await phase: absorb completions and expire stalled launches.

use super::PhaseContext;
use crate::channel::{drain, Envelope, SharedChannel};
use crate::config::StagePolicy;
use crate::core::{Document, Grade, Message, Stage, State};
use crate::errors::Result;
use crate::events::{discard_payload, document_payload, types};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

/// Counts from one await pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AwaitReport {
    /// Messages that moved a document to `SUCCESS`.
    pub completed: usize,
    /// Messages that moved a document to `FAILURE`.
    pub failed: usize,
    /// Messages acknowledged without touching any document.
    pub discarded: usize,
    /// Running documents expired by the sweep.
    pub timed_out: usize,
}

enum Absorbed {
    Completed,
    Failed,
    Discarded,
}

/// Per-stage completion consumer.
///
/// Both duties are idempotent. A message only changes a document that is
/// `RUNNING` at this stage, so duplicates and late arrivals are acknowledged
/// and dropped. The sweep keeps no state between calls and recomputes
/// elapsed time from the stored start stamp.
pub struct AwaitPhase {
    stage: Stage,
    policy: StagePolicy,
    channel: SharedChannel,
    ctx: PhaseContext,
}

impl AwaitPhase {
    /// Creates an await phase for one stage.
    #[must_use]
    pub fn new(stage: Stage, policy: StagePolicy, channel: SharedChannel, ctx: PhaseContext) -> Self {
        Self {
            stage,
            policy,
            channel,
            ctx,
        }
    }

    /// The stage this phase serves.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Drains completions, then sweeps for timeouts.
    pub async fn run(&self) -> Result<AwaitReport> {
        let span = info_span!("await", stage = %self.stage);
        async {
            let mut report = self.drain_completions().await?;
            report.timed_out = self.sweep_timeouts().await?;
            debug!(
                completed = report.completed,
                failed = report.failed,
                discarded = report.discarded,
                timed_out = report.timed_out,
                "Await pass complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Receives until the channel is empty, absorbing each message.
    pub async fn drain_completions(&self) -> Result<AwaitReport> {
        let mut report = AwaitReport::default();

        for envelope in drain(self.channel.as_ref()).await? {
            match self.absorb(&envelope).await? {
                Absorbed::Completed => report.completed += 1,
                Absorbed::Failed => report.failed += 1,
                Absorbed::Discarded => report.discarded += 1,
            }
            self.channel.ack(&envelope.receipt).await?;
        }

        Ok(report)
    }

    async fn absorb(&self, envelope: &Envelope) -> Result<Absorbed> {
        let message = match envelope.message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, receive_count = envelope.receive_count, "Dropping undecodable message");
                self.discard("", "malformed body");
                return Ok(Absorbed::Discarded);
            }
        };

        let Some(mut document) = self.ctx.store.get(&message.document_id).await? else {
            info!(document_id = %message.document_id, "Completion for unknown document");
            self.discard(message.document_id.as_str(), "not found");
            return Ok(Absorbed::Discarded);
        };

        if document.stage() != self.stage || document.state() != State::Running {
            info!(
                document_id = %document.document_id,
                stage_state = %document.stage_state,
                "Completion no longer applies"
            );
            self.discard(document.document_id.as_str(), "not running at stage");
            return Ok(Absorbed::Discarded);
        }

        let passed = self.apply(&mut document, &message);
        self.ctx.store.put(&document).await?;

        if passed {
            info!(document_id = %document.document_id, "Completion absorbed, status is PASS");
            self.ctx
                .events
                .try_emit(types::DOCUMENT_COMPLETED, Some(document_payload(&document)));
            Ok(Absorbed::Completed)
        } else {
            info!(
                document_id = %document.document_id,
                grade = %document.current_map().actor_grade,
                "Completion absorbed, status is FAIL"
            );
            self.ctx
                .events
                .try_emit(types::DOCUMENT_FAILED, Some(document_payload(&document)));
            Ok(Absorbed::Failed)
        }
    }

    /// Applies a message to a running document. Returns true on success.
    fn apply(&self, document: &mut Document, message: &Message) -> bool {
        let merged = document.merge_current(&message.updates);
        let passed = message.is_pass() && merged.is_ok();
        let final_stamp = message.final_stamp.unwrap_or_else(|| self.ctx.clock.now());

        let map = document.current_map_mut();
        if let Err(e) = merged {
            warn!(error = %e, "Completion update does not fit the stage");
            map.exceptions.push(e.to_payload());
        }
        if let Some(error) = &message.error {
            map.exceptions.push(error.clone());
        }
        map.actor_grade = if message.is_pass() && !passed {
            Grade::Fail
        } else {
            message.actor_grade
        };
        map.final_stamp = Some(final_stamp);

        document.set_state(if passed { State::Success } else { State::Failure });
        passed
    }

    fn discard(&self, document_id: &str, reason: &str) {
        self.ctx.events.try_emit(
            types::DOCUMENT_DISCARDED,
            Some(discard_payload(self.stage, document_id, reason)),
        );
    }

    /// Times out running documents whose start stamp is older than the
    /// stage's window. Returns how many were expired.
    ///
    /// A running document with no start stamp cannot be aged and is expired
    /// immediately.
    pub async fn sweep_timeouts(&self) -> Result<usize> {
        let now = self.ctx.clock.now();
        let window = self.policy.timeout();
        let mut expired = 0;
        let mut documents = self.ctx.store.query(self.stage, &[State::Running]);

        while let Some(mut document) = documents.try_next().await? {
            let overdue = document
                .current_map()
                .start_stamp
                .map_or(true, |start| now - start > window);
            if !overdue {
                continue;
            }

            document.set_state(State::Timeout);
            let map = document.current_map_mut();
            map.actor_grade = Grade::Time;
            map.final_stamp = Some(now);
            self.ctx.store.put(&document).await?;

            info!(document_id = %document.document_id, "Detected time-out");
            self.ctx
                .events
                .try_emit(types::DOCUMENT_TIMED_OUT, Some(document_payload(&document)));
            expired += 1;
        }

        Ok(expired)
    }
}

impl std::fmt::Debug for AwaitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwaitPhase")
            .field("stage", &self.stage)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
