//! Begin phase: launch stage work for waiting and held documents.

use super::PhaseContext;
use crate::config::StagePolicy;
use crate::core::{Document, Grade, MapUpdate, Stage, State};
use crate::errors::Result;
use crate::events::{document_payload, types};
use crate::invoke::{Admission, Invocation, SharedAdmission, SharedInvoker};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

/// Counts from one begin pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BeginReport {
    /// Documents moved to `RUNNING`.
    pub launched: usize,
    /// Documents moved to `HOLDING`.
    pub held: usize,
    /// Documents whose retry budget ran out.
    pub failed: usize,
    /// True when a rejection ended the scan early.
    pub throttled: bool,
}

enum Attempt {
    Launched(Option<MapUpdate>),
    Refused { grade: Grade, reason: String },
}

/// Per-stage submitter.
///
/// Scans `WAITING`/`HOLDING` documents in `OrderStamp` order and launches
/// each one. The first refusal (launcher rejection or admission denial)
/// holds that document and ends the pass; the rest wait for the next
/// scheduler iteration.
pub struct BeginPhase {
    stage: Stage,
    actor_ref: String,
    policy: StagePolicy,
    invoker: SharedInvoker,
    admission: Option<SharedAdmission>,
    ctx: PhaseContext,
}

impl BeginPhase {
    /// Creates a begin phase for one stage.
    #[must_use]
    pub fn new(
        stage: Stage,
        actor_ref: impl Into<String>,
        policy: StagePolicy,
        invoker: SharedInvoker,
        ctx: PhaseContext,
    ) -> Self {
        Self {
            stage,
            actor_ref: actor_ref.into(),
            policy,
            invoker,
            admission: None,
            ctx,
        }
    }

    /// Installs an admission gate consulted before every launch.
    #[must_use]
    pub fn with_admission(mut self, admission: SharedAdmission) -> Self {
        self.admission = Some(admission);
        self
    }

    /// The stage this phase serves.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs one begin pass.
    pub async fn run(&self) -> Result<BeginReport> {
        let span = info_span!("begin", stage = %self.stage);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<BeginReport> {
        let mut report = BeginReport::default();
        let mut documents = self.ctx.store.query(self.stage, &State::LAUNCHABLE);

        while let Some(mut document) = documents.try_next().await? {
            match self.attempt(&document).await? {
                Attempt::Launched(update) => {
                    self.mark_running(&mut document, update.as_ref());
                    self.ctx.store.put(&document).await?;
                    info!(document_id = %document.document_id, "Launched actor");
                    self.ctx
                        .events
                        .try_emit(types::DOCUMENT_LAUNCHED, Some(document_payload(&document)));
                    report.launched += 1;
                }
                Attempt::Refused { grade, reason } => {
                    let failed = self.mark_refused(&mut document, grade, &reason);
                    self.ctx.store.put(&document).await?;
                    info!(
                        document_id = %document.document_id,
                        retry_count = document.current_map().retry_count,
                        reason = %reason,
                        "Launch refused"
                    );
                    if failed {
                        warn!(document_id = %document.document_id, "Retry limit exceeded");
                        self.ctx
                            .events
                            .try_emit(types::DOCUMENT_FAILED, Some(document_payload(&document)));
                        report.failed += 1;
                    } else {
                        self.ctx
                            .events
                            .try_emit(types::DOCUMENT_HELD, Some(document_payload(&document)));
                        report.held += 1;
                    }
                    report.throttled = true;
                    break;
                }
            }
        }

        debug!(
            launched = report.launched,
            held = report.held,
            failed = report.failed,
            "Begin pass complete"
        );
        Ok(report)
    }

    async fn attempt(&self, document: &Document) -> Result<Attempt> {
        if let Some(admission) = &self.admission {
            if let Admission::Denied { reason } = admission.admit(self.stage).await? {
                return Ok(Attempt::Refused {
                    grade: Grade::Skip,
                    reason,
                });
            }
        }

        let payload = document.to_payload()?;
        let attempt = match self.invoker.invoke(&self.actor_ref, payload).await {
            Ok(Invocation::Accepted { update }) => Attempt::Launched(update),
            Ok(Invocation::Rejected { reason }) => Attempt::Refused {
                grade: Grade::Wait,
                reason,
            },
            Err(e) => {
                warn!(document_id = %document.document_id, error = %e, "Invocation failed");
                Attempt::Refused {
                    grade: Grade::Wait,
                    reason: e.to_string(),
                }
            }
        };
        Ok(attempt)
    }

    fn mark_running(&self, document: &mut Document, update: Option<&MapUpdate>) {
        let now = self.ctx.clock.now();
        document.set_state(State::Running);
        if let Some(update) = update {
            if let Err(e) = document.merge_current(update) {
                warn!(document_id = %document.document_id, error = %e, "Dropping launch update");
                document.current_map_mut().exceptions.push(e.to_payload());
            }
        }
        let map = document.current_map_mut();
        map.actor_grade = Grade::Busy;
        map.start_stamp = Some(now);
        map.final_stamp = None;
    }

    /// Records a refusal. Returns true if the document failed for good.
    fn mark_refused(&self, document: &mut Document, grade: Grade, reason: &str) -> bool {
        let limit = self.policy.retry_limit;
        let now = self.ctx.clock.now();
        let map = document.current_map_mut();
        map.actor_grade = grade;
        map.retry_count += 1;

        if map.retry_count > limit {
            map.final_stamp = Some(now);
            map.exceptions.push(serde_json::json!({
                "error": "retry limit exceeded",
                "reason": reason,
                "retry_count": map.retry_count,
            }));
            document.set_state(State::Failure);
            true
        } else {
            document.set_state(State::Holding);
            false
        }
    }
}

impl std::fmt::Debug for BeginPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeginPhase")
            .field("stage", &self.stage)
            .field("actor_ref", &self.actor_ref)
            .field("policy", &self.policy)
            .field("admission", &self.admission.is_some())
            .finish()
    }
}
