//! The pipeline scheduler state machine.
//!
//! One run walks `STARTUP → PROMOTE → CHECKUP` and then either re-enters
//! `STARTUP` (`RESTART`), fans out across every stage (`PROCESS`), or stops
//! (`BREAKUP`). After `PROCESS` it waits out `STANDBY` and loops back to
//! `PROMOTE`.

use super::promotion::{PromotionManager, PromotionReport};
use super::shutdown::ShutdownToken;
use crate::channel::ChannelRegistry;
use crate::config::PipelineConfig;
use crate::core::{Stage, State};
use crate::errors::Result;
use crate::events::types;
use crate::invoke::{RunningCap, SharedInvoker};
use crate::phases::{AwaitPhase, BeginPhase, ChainReport, PhaseContext, StageChain};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

/// Steps of the scheduler state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerStep {
    /// Entry marker.
    Startup,
    /// Promotion across all stage pairs.
    Promote,
    /// Decide between restart, process, and breakup.
    Checkup,
    /// Begin and await for every stage, concurrently across stages.
    Process,
    /// Fixed delay before the next iteration.
    Standby,
    /// Re-enter startup.
    Restart,
    /// No work remains; the run ends.
    Breakup,
}

impl fmt::Display for ManagerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "STARTUP",
            Self::Promote => "PROMOTE",
            Self::Checkup => "CHECKUP",
            Self::Process => "PROCESS",
            Self::Standby => "STANDBY",
            Self::Restart => "RESTART",
            Self::Breakup => "BREAKUP",
        };
        f.write_str(name)
    }
}

/// The inputs the checkup step branches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckupFlags {
    /// Force a fresh pass through startup.
    pub restart_pipeline: bool,
    /// Documents remain that the pipeline can still move.
    pub process_document: bool,
}

impl CheckupFlags {
    /// Picks the step that follows checkup.
    #[must_use]
    pub fn decide(self) -> ManagerStep {
        if self.restart_pipeline {
            ManagerStep::Restart
        } else if self.process_document {
            ManagerStep::Process
        } else {
            ManagerStep::Breakup
        }
    }
}

/// Observable state of one run, shared with the trigger.
#[derive(Debug, Default)]
pub struct RunState {
    last_step: RwLock<Option<ManagerStep>>,
    restart: AtomicBool,
}

impl RunState {
    /// Creates a state with no completed step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last step the run completed.
    #[must_use]
    pub fn last_step(&self) -> Option<ManagerStep> {
        *self.last_step.read()
    }

    /// Asks the run to take `RESTART` at its next checkup.
    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    /// Reads and clears the restart flag.
    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn record(&self, step: ManagerStep) {
        *self.last_step.write() = Some(step);
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// `PROCESS` steps executed.
    pub iterations: usize,
    /// `RESTART` transitions taken.
    pub restarts: usize,
    /// Documents promoted across the run.
    pub promoted: usize,
    /// The step the run ended on.
    pub final_step: ManagerStep,
    /// Promotion passes, checkups, and stage chains that hit a
    /// collaborator error.
    pub phase_errors: usize,
}

/// Drives promotion and the per-stage chains until no work remains.
pub struct PipelineScheduler {
    standby: Duration,
    ctx: PhaseContext,
    promotion: PromotionManager,
    chains: Vec<StageChain>,
    shutdown: ShutdownToken,
}

impl PipelineScheduler {
    /// Builds the scheduler with one chain per stage.
    ///
    /// Stages whose policy sets `max_pending` get a [`RunningCap`] admission
    /// gate.
    pub fn new(
        config: &PipelineConfig,
        ctx: PhaseContext,
        channels: &ChannelRegistry,
        invoker: SharedInvoker,
    ) -> Result<Self> {
        config.validate()?;

        let chains = Stage::ALL
            .into_iter()
            .map(|stage| {
                let policy = config.policy(stage);
                let mut begin = BeginPhase::new(
                    stage,
                    config.actor_ref(stage),
                    policy.clone(),
                    invoker.clone(),
                    ctx.clone(),
                );
                if let Some(cap) = policy.max_pending {
                    begin = begin.with_admission(Arc::new(RunningCap::new(ctx.store.clone(), cap)));
                }
                let await_phase = AwaitPhase::new(stage, policy, channels.channel(stage)?, ctx.clone());
                Ok(StageChain::new(begin, await_phase))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            standby: config.standby(),
            promotion: PromotionManager::new(ctx.clone()),
            ctx,
            chains,
            shutdown: ShutdownToken::new(),
        })
    }

    /// Overrides the standby delay.
    #[must_use]
    pub fn with_standby(mut self, standby: Duration) -> Self {
        self.standby = standby;
        self
    }

    /// Uses an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The token that stops runs at their next standby.
    #[must_use]
    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// Executes one run, recording each completed step into `state`.
    ///
    /// Store errors during promotion, checkup, or a stage chain are counted
    /// in [`RunReport::phase_errors`] and retried on the next iteration; they
    /// never end the run.
    pub async fn run(&self, state: &RunState) -> Result<RunReport> {
        Ok(self.run_inner(state).instrument(info_span!("scheduler")).await)
    }

    async fn run_inner(&self, state: &RunState) -> RunReport {
        let mut report = RunReport {
            iterations: 0,
            restarts: 0,
            promoted: 0,
            final_step: ManagerStep::Startup,
            phase_errors: 0,
        };
        self.step(state, ManagerStep::Startup);

        loop {
            match self.promote().await {
                Ok(promotion) => report.promoted += promotion.total(),
                Err(e) => {
                    report.phase_errors += 1;
                    warn!(error = %e, "Promotion failed, continuing to checkup");
                }
            }
            self.step(state, ManagerStep::Promote);

            let decision = match self.checkup(state).await {
                Ok(flags) => Some(flags.decide()),
                Err(e) => {
                    report.phase_errors += 1;
                    warn!(error = %e, "Checkup failed, retrying after standby");
                    None
                }
            };
            self.step(state, ManagerStep::Checkup);

            match decision {
                Some(ManagerStep::Restart) => {
                    info!("Restarting pipeline run");
                    report.restarts += 1;
                    self.step(state, ManagerStep::Restart);
                    self.step(state, ManagerStep::Startup);
                    continue;
                }
                Some(ManagerStep::Breakup) => {
                    self.step(state, ManagerStep::Breakup);
                    report.final_step = ManagerStep::Breakup;
                    info!(iterations = report.iterations, "No work remains, breaking up");
                    return report;
                }
                Some(_) => {
                    let chains = self.process().await;
                    report.phase_errors += chains.iter().filter(|c| c.has_errors()).count();
                    report.iterations += 1;
                    self.step(state, ManagerStep::Process);
                }
                None => {}
            }

            let stopped = self.standby().await;
            self.step(state, ManagerStep::Standby);
            if stopped {
                report.final_step = ManagerStep::Standby;
                warn!(reason = ?self.shutdown.reason(), "Run stopped at standby");
                return report;
            }
        }
    }

    fn step(&self, state: &RunState, step: ManagerStep) {
        state.record(step);
        self.ctx.events.try_emit(
            types::PIPELINE_STEP,
            Some(serde_json::json!({ "step": step })),
        );
    }

    /// Runs the promotion manager once.
    pub async fn promote(&self) -> Result<PromotionReport> {
        self.promotion.run().await
    }

    /// Computes checkup flags, consuming any pending restart request.
    ///
    /// A store error leaves the restart request pending.
    pub async fn checkup(&self, state: &RunState) -> Result<CheckupFlags> {
        let process_document = self.has_work().await?;
        let restart_pipeline = state.take_restart();
        Ok(CheckupFlags {
            restart_pipeline,
            process_document,
        })
    }

    /// True if any document is active somewhere or awaiting promotion.
    pub async fn has_work(&self) -> Result<bool> {
        for stage in Stage::ALL {
            if self.ctx.store.count(stage, &State::ACTIVE).await? > 0 {
                return Ok(true);
            }
            if !stage.is_final() && self.ctx.store.count(stage, &[State::Success]).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs every stage chain concurrently.
    pub async fn process(&self) -> Vec<ChainReport> {
        join_all(self.chains.iter().map(StageChain::run)).await
    }

    /// Waits out the standby delay. Returns true if shutdown cut it short or
    /// was already requested.
    async fn standby(&self) -> bool {
        if self.shutdown.is_requested() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(self.standby) => self.shutdown.is_requested(),
            () = self.shutdown.requested() => true,
        }
    }
}

impl fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("standby", &self.standby)
            .field("chains", &self.chains.len())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}
