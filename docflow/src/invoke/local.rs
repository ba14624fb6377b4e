//! In-process invoker running actors on tokio tasks.

use super::{ActorOutcome, Invocation, Invoker, NoOpActor, SharedActor};
use crate::channel::{send_message, ChannelRegistry};
use crate::config::PipelineConfig;
use crate::core::{Document, Message, Stage};
use crate::errors::Result;
use crate::utils::SharedClock;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

#[derive(Clone)]
struct Route {
    stage: Stage,
    actor: SharedActor,
}

/// Routes actor references to registered actors and runs them in the
/// background.
///
/// Each accepted invocation holds one permit of a shared semaphore until the
/// actor finishes. When no permit is free the launch is rejected, which is
/// what makes the begin phase back off. Finished actor tasks are reaped on
/// every launch, so the task set never outgrows the permit count.
pub struct LocalInvoker {
    routes: HashMap<String, Route>,
    channels: ChannelRegistry,
    permits: Arc<Semaphore>,
    clock: SharedClock,
    tasks: Mutex<JoinSet<()>>,
}

impl LocalInvoker {
    /// Creates an invoker with no actors and `max_in_flight` permits.
    #[must_use]
    pub fn new(channels: ChannelRegistry, max_in_flight: usize, clock: SharedClock) -> Self {
        Self {
            routes: HashMap::new(),
            channels,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            clock,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Creates an invoker with a pass-through actor registered for every
    /// stage under its configured actor reference.
    #[must_use]
    pub fn pass_through(config: &PipelineConfig, channels: ChannelRegistry, clock: SharedClock) -> Self {
        Stage::ALL.into_iter().fold(
            Self::new(channels, config.launcher.max_in_flight, clock),
            |invoker, stage| invoker.with_actor(config.actor_ref(stage), stage, Arc::new(NoOpActor)),
        )
    }

    /// Registers an actor under a reference, replacing any previous one.
    #[must_use]
    pub fn with_actor(mut self, actor_ref: impl Into<String>, stage: Stage, actor: SharedActor) -> Self {
        self.routes.insert(actor_ref.into(), Route { stage, actor });
        self
    }

    /// Number of free launch permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of actor tasks still running, after reaping finished ones.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        reap(&mut tasks);
        tasks.len()
    }

    /// Waits for every spawned actor task to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }
}

impl std::fmt::Debug for LocalInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut refs: Vec<_> = self.routes.keys().collect();
        refs.sort();
        f.debug_struct("LocalInvoker")
            .field("actors", &refs)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        log_join(joined);
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = joined {
        error!(error = %join_error, "Actor task failed to complete");
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn invoke(&self, actor_ref: &str, payload: Vec<u8>) -> Result<Invocation> {
        let Some(route) = self.routes.get(actor_ref).cloned() else {
            warn!(actor_ref = %actor_ref, "No actor registered");
            return Ok(Invocation::rejected(format!("unknown actor '{actor_ref}'")));
        };

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            debug!(actor_ref = %actor_ref, "Launcher saturated");
            return Ok(Invocation::rejected("launcher saturated"));
        };

        let document = Document::from_payload(&payload)?;
        let channel = self.channels.channel(route.stage)?;
        let clock = self.clock.clone();

        let mut tasks = self.tasks.lock();
        reap(&mut tasks);
        tasks.spawn(async move {
            let started = clock.now();
            let document_id = document.document_id.clone();
            let outcome = route.actor.run(document).await;
            drop(permit);

            let message = match outcome {
                ActorOutcome::Pass(update) => Message::pass(document_id.clone(), update),
                ActorOutcome::Fail(reason) => {
                    Message::fail(document_id.clone(), serde_json::json!({ "error": reason }))
                }
                ActorOutcome::Submitted => return,
            };
            let message = message.with_stamps(Some(started), Some(clock.now()));

            if let Err(e) = send_message(channel.as_ref(), &message).await {
                error!(
                    document_id = %document_id,
                    stage = %route.stage,
                    error = %e,
                    "Failed to report actor outcome"
                );
            }
        });

        Ok(Invocation::accepted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::drain;
    use crate::core::{Grade, MapUpdate};
    use crate::invoke::{Actor, FnActor};
    use crate::utils::{now_utc, SystemClock};
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    fn payload(id: &str, stage: Stage) -> Vec<u8> {
        Document::new(id, "0", now_utc())
            .at(stage, crate::core::State::Waiting)
            .to_payload()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pass_through_reports_pass() {
        let config = PipelineConfig::default();
        let channels = ChannelRegistry::in_memory(&config);
        let invoker = LocalInvoker::pass_through(&config, channels.clone(), SystemClock::shared());

        let outcome = invoker
            .invoke(&config.actor_ref(Stage::Convert), payload("d1", Stage::Convert))
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        invoker.wait_idle().await;

        let channel = channels.channel(Stage::Convert).unwrap();
        let envelopes = drain(channel.as_ref()).await.unwrap();
        assert_eq!(envelopes.len(), 1);
        let message = envelopes[0].message().unwrap();
        assert_eq!(message.actor_grade, Grade::Pass);
        assert!(message.start_stamp.is_some());
        assert!(message.final_stamp.is_some());
    }

    #[tokio::test]
    async fn test_fail_outcome_carries_error() {
        let config = PipelineConfig::default();
        let channels = ChannelRegistry::in_memory(&config);
        let actor = FnActor::new(|_: &Document| ActorOutcome::Fail("corrupt image".to_string()));
        let invoker = LocalInvoker::new(channels.clone(), 4, SystemClock::shared())
            .with_actor("convert-actor", Stage::Convert, Arc::new(actor));

        invoker.invoke("convert-actor", payload("d1", Stage::Convert)).await.unwrap();
        invoker.wait_idle().await;

        let channel = channels.channel(Stage::Convert).unwrap();
        let message = drain(channel.as_ref()).await.unwrap()[0].message().unwrap();
        assert_eq!(message.actor_grade, Grade::Fail);
        assert_eq!(message.error, Some(serde_json::json!({"error": "corrupt image"})));
    }

    #[tokio::test]
    async fn test_submitted_outcome_sends_nothing() {
        let config = PipelineConfig::default();
        let channels = ChannelRegistry::in_memory(&config);
        let actor = FnActor::new(|_: &Document| ActorOutcome::Submitted);
        let invoker = LocalInvoker::new(channels.clone(), 4, SystemClock::shared())
            .with_actor("extract-actor", Stage::Extract, Arc::new(actor));

        invoker.invoke("extract-actor", payload("d1", Stage::Extract)).await.unwrap();
        invoker.wait_idle().await;

        let channel = channels.channel(Stage::Extract).unwrap();
        assert!(drain(channel.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_actor_is_rejected() {
        let config = PipelineConfig::default();
        let invoker = LocalInvoker::new(ChannelRegistry::in_memory(&config), 4, SystemClock::shared());

        let outcome = invoker.invoke("missing", payload("d1", Stage::Acquire)).await.unwrap();

        assert!(matches!(outcome, Invocation::Rejected { reason } if reason.contains("missing")));
    }

    struct BlockingActor {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Actor for BlockingActor {
        async fn run(&self, _document: Document) -> ActorOutcome {
            self.release.notified().await;
            ActorOutcome::Pass(MapUpdate::new())
        }
    }

    #[tokio::test]
    async fn test_saturated_launcher_rejects() {
        let config = PipelineConfig::default();
        let release = Arc::new(Notify::new());
        let actor = BlockingActor {
            release: release.clone(),
        };
        let invoker = LocalInvoker::new(ChannelRegistry::in_memory(&config), 1, SystemClock::shared())
            .with_actor("operate-actor", Stage::Operate, Arc::new(actor));

        let first = invoker.invoke("operate-actor", payload("d1", Stage::Operate)).await.unwrap();
        let second = invoker.invoke("operate-actor", payload("d2", Stage::Operate)).await.unwrap();

        assert!(first.is_accepted());
        assert_eq!(second, Invocation::rejected("launcher saturated"));

        release.notify_one();
        invoker.wait_idle().await;
        assert_eq!(invoker.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_finished_tasks_are_reaped() {
        let config = PipelineConfig::default();
        let channels = ChannelRegistry::in_memory(&config);
        let invoker = LocalInvoker::pass_through(&config, channels.clone(), SystemClock::shared());
        let actor_ref = config.actor_ref(Stage::Reshape);

        for i in 0..50 {
            let outcome = invoker.invoke(&actor_ref, payload(&format!("d{i}"), Stage::Reshape)).await.unwrap();
            assert!(outcome.is_accepted());
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(invoker.pending_tasks(), 0);
        assert_eq!(invoker.available_permits(), config.launcher.max_in_flight);
        let channel = channels.channel(Stage::Reshape).unwrap();
        assert_eq!(drain(channel.as_ref()).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_bad_payload_is_an_error() {
        let config = PipelineConfig::default();
        let invoker = LocalInvoker::pass_through(&config, ChannelRegistry::in_memory(&config), SystemClock::shared());

        let result = invoker.invoke(&config.actor_ref(Stage::Acquire), b"{".to_vec()).await;

        assert!(result.is_err());
        assert_eq!(invoker.available_permits(), config.launcher.max_in_flight);
    }
}
