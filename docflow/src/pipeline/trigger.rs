//! Single-flight entry point for scheduler runs.

use super::scheduler::{ManagerStep, PipelineScheduler, RunReport, RunState};
use crate::errors::{DocflowError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

/// What a call to [`PipelineTrigger::fire`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "run", rename_all = "snake_case")]
pub enum FireOutcome {
    /// A new run was started under this name.
    Started(String),
    /// The named run was stuck at checkup and will restart.
    RestartRequested(String),
    /// The named run is still active; nothing was started.
    Skipped(String),
}

impl FireOutcome {
    /// The run name the outcome refers to.
    #[must_use]
    pub fn run_name(&self) -> &str {
        match self {
            Self::Started(name) | Self::RestartRequested(name) | Self::Skipped(name) => name,
        }
    }
}

struct RunHandle {
    name: String,
    state: Arc<RunState>,
    task: Option<JoinHandle<Result<RunReport>>>,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

#[derive(Default)]
struct TriggerState {
    counter: u32,
    current: Option<RunHandle>,
}

/// Starts scheduler runs so that at most one is active at a time.
pub struct PipelineTrigger {
    scheduler: Arc<PipelineScheduler>,
    inner: Mutex<TriggerState>,
}

enum Decision {
    Start,
    Restart,
    Skip,
}

fn classify(state: &RunState, finished: bool) -> Decision {
    match state.last_step() {
        _ if finished => Decision::Start,
        Some(ManagerStep::Breakup) => Decision::Start,
        Some(ManagerStep::Checkup) => Decision::Restart,
        _ => Decision::Skip,
    }
}

impl PipelineTrigger {
    /// Wraps a scheduler.
    #[must_use]
    pub fn new(scheduler: Arc<PipelineScheduler>) -> Self {
        Self {
            scheduler,
            inner: Mutex::new(TriggerState::default()),
        }
    }

    /// The scheduler runs are started on.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<PipelineScheduler> {
        &self.scheduler
    }

    /// Starts a run unless one is already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fire(&self) -> FireOutcome {
        let mut inner = self.inner.lock();

        if let Some(current) = &inner.current {
            match classify(&current.state, current.is_finished()) {
                Decision::Start => {}
                Decision::Restart => {
                    info!(run = %current.name, "Run stuck at checkup, requesting restart");
                    current.state.request_restart();
                    return FireOutcome::RestartRequested(current.name.clone());
                }
                Decision::Skip => {
                    debug!(run = %current.name, step = ?current.state.last_step(), "Run still active");
                    return FireOutcome::Skipped(current.name.clone());
                }
            }
        }

        let name = format!("{:05}", inner.counter);
        inner.counter = inner.counter.wrapping_add(1);

        let state = Arc::new(RunState::new());
        let scheduler = Arc::clone(&self.scheduler);
        let run_state = Arc::clone(&state);
        let span = tracing::info_span!("run", name = %name);
        let task = tokio::spawn(async move { scheduler.run(&run_state).await }.instrument(span));

        info!(run = %name, "Started pipeline run");
        inner.current = Some(RunHandle {
            name: name.clone(),
            state,
            task: Some(task),
        });
        FireOutcome::Started(name)
    }

    /// Name of the most recent run, if any.
    #[must_use]
    pub fn current_run(&self) -> Option<String> {
        self.inner.lock().current.as_ref().map(|run| run.name.clone())
    }

    /// Last step completed by the most recent run.
    #[must_use]
    pub fn current_step(&self) -> Option<ManagerStep> {
        self.inner.lock().current.as_ref().and_then(|run| run.state.last_step())
    }

    /// Returns true while the most recent run's task has not finished.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().current.as_ref().is_some_and(|run| !run.is_finished())
    }

    /// Waits for the most recent run and returns its report.
    ///
    /// Returns `None` if no run was started or it was already joined.
    pub async fn join(&self) -> Option<Result<RunReport>> {
        let task = self.inner.lock().current.as_mut().and_then(|run| run.task.take())?;
        Some(match task.await {
            Ok(result) => result,
            Err(e) => Err(DocflowError::invocation(format!("scheduler run aborted: {e}"))),
        })
    }
}

impl std::fmt::Debug for PipelineTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTrigger")
            .field("current_run", &self.current_run())
            .field("current_step", &self.current_step())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;
    use crate::config::PipelineConfig;
    use crate::core::Document;
    use crate::events::NoOpEventSink;
    use crate::invoke::{Invocation, MockInvoker};
    use crate::phases::PhaseContext;
    use crate::store::{DocumentStore, InMemoryDocumentStore};
    use crate::utils::{now_utc, FakeClock};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn trigger(store: Arc<InMemoryDocumentStore>, invoker: MockInvoker, standby: Duration) -> PipelineTrigger {
        let config = PipelineConfig::default();
        let ctx = PhaseContext::new(store, Arc::new(FakeClock::default()), NoOpEventSink::shared());
        let channels = ChannelRegistry::in_memory(&config);
        let scheduler = PipelineScheduler::new(&config, ctx, &channels, Arc::new(invoker))
            .unwrap()
            .with_standby(standby);
        PipelineTrigger::new(Arc::new(scheduler))
    }

    #[test]
    fn test_classify() {
        let state = RunState::new();
        assert!(matches!(classify(&state, false), Decision::Skip));
        assert!(matches!(classify(&state, true), Decision::Start));

        state.record(ManagerStep::Checkup);
        assert!(matches!(classify(&state, false), Decision::Restart));

        state.record(ManagerStep::Standby);
        assert!(matches!(classify(&state, false), Decision::Skip));

        state.record(ManagerStep::Breakup);
        assert!(matches!(classify(&state, false), Decision::Start));
    }

    #[test]
    fn test_outcome_run_name() {
        assert_eq!(FireOutcome::Skipped("00003".to_string()).run_name(), "00003");
    }

    #[tokio::test]
    async fn test_finished_run_allows_next() {
        let trigger = trigger(Arc::new(InMemoryDocumentStore::new()), MockInvoker::new(), Duration::ZERO);

        assert_eq!(trigger.fire(), FireOutcome::Started("00000".to_string()));
        let report = trigger.join().await.unwrap().unwrap();
        assert_eq!(report.final_step, ManagerStep::Breakup);
        assert_eq!(trigger.current_step(), Some(ManagerStep::Breakup));

        assert_eq!(trigger.fire(), FireOutcome::Started("00001".to_string()));
        assert!(trigger.join().await.unwrap().is_ok());
        assert!(trigger.join().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_run_is_single_flight() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.put(&Document::new("stuck", "0", now_utc())).await.unwrap();
        let mut invoker = MockInvoker::new();
        invoker.expect_invoke().returning(|_, _| Ok(Invocation::rejected("busy")));
        let trigger = trigger(store, invoker, Duration::from_secs(60));

        assert_eq!(trigger.fire(), FireOutcome::Started("00000".to_string()));
        // The spawned run has not been polled yet.
        assert_eq!(trigger.fire(), FireOutcome::Skipped("00000".to_string()));

        while trigger.current_step() != Some(ManagerStep::Process) {
            tokio::task::yield_now().await;
        }
        assert!(trigger.is_active());
        assert_eq!(trigger.fire(), FireOutcome::Skipped("00000".to_string()));

        trigger.scheduler().shutdown_token().shutdown("done");
        let report = trigger.join().await.unwrap().unwrap();
        assert_eq!(report.final_step, ManagerStep::Standby);
        assert!(!trigger.is_active());
    }
}
