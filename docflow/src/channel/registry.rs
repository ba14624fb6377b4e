//! One channel per stage, built once at startup.

use super::{InMemoryStageChannel, SharedChannel};
use crate::config::PipelineConfig;
use crate::core::Stage;
use crate::errors::{DocflowError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Explicit registry of stage channels.
///
/// Constructed at startup and handed to every component that sends or
/// receives completions.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<Stage, SharedChannel>,
    names: BTreeMap<Stage, String>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("names", &self.names)
            .finish()
    }
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds in-memory channels for every stage.
    #[must_use]
    pub fn in_memory(config: &PipelineConfig) -> Self {
        Stage::ALL.into_iter().fold(Self::new(), |registry, stage| {
            let channel = InMemoryStageChannel::new(stage, config.channel.clone());
            registry.with_channel(stage, config.queue_name(stage), Arc::new(channel))
        })
    }

    /// Registers a channel for a stage, replacing any previous one.
    #[must_use]
    pub fn with_channel(mut self, stage: Stage, name: impl Into<String>, channel: SharedChannel) -> Self {
        self.channels.insert(stage, channel);
        self.names.insert(stage, name.into());
        self
    }

    /// Returns the channel for a stage.
    pub fn channel(&self, stage: Stage) -> Result<SharedChannel> {
        self.channels
            .get(&stage)
            .cloned()
            .ok_or_else(|| DocflowError::channel(stage, "no channel registered"))
    }

    /// Returns the resource name a stage's channel was registered under.
    #[must_use]
    pub fn name(&self, stage: Stage) -> Option<&str> {
        self.names.get(&stage).map(String::as_str)
    }

    /// Purges every registered channel. Returns the total removed.
    pub async fn purge_all(&self) -> Result<usize> {
        let mut total = 0;
        for channel in self.channels.values() {
            total += channel.purge_all().await?;
        }
        Ok(total)
    }
}
