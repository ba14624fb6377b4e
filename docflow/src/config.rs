//! Pipeline configuration.
//!
//! Every field has a default matching the deployed pipeline, so an empty JSON
//! object is a valid configuration.

use crate::core::Stage;
use crate::errors::{DocflowError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix read by [`PipelineConfig::from_env`].
pub const ENV_PREFIX: &str = "DOCFLOW_";

/// Top-level configuration for one pipeline deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Prefix for derived resource names.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Delay between scheduler iterations, in seconds.
    #[serde(default = "default_standby_seconds")]
    pub standby_seconds: u64,
    /// Stage channel settings.
    #[serde(default)]
    pub channel: ChannelSettings,
    /// Local launcher settings.
    #[serde(default)]
    pub launcher: LauncherSettings,
    /// Per-stage overrides. Stages not listed use [`StagePolicy::for_stage`];
    /// fields omitted from a listed stage keep that stage's deployed value.
    #[serde(default, deserialize_with = "deserialize_stage_policies")]
    pub stages: BTreeMap<Stage, StagePolicy>,
}

/// A stage entry as written in configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageOverride {
    retry_limit: Option<u32>,
    timeout_minutes: Option<u32>,
    /// `null` removes the cap; absent keeps the deployed one.
    #[serde(default, deserialize_with = "present")]
    max_pending: Option<Option<usize>>,
}

impl StageOverride {
    fn apply(self, mut policy: StagePolicy) -> StagePolicy {
        if let Some(limit) = self.retry_limit {
            policy.retry_limit = limit;
        }
        if let Some(minutes) = self.timeout_minutes {
            policy.timeout_minutes = minutes;
        }
        if let Some(cap) = self.max_pending {
            policy.max_pending = cap;
        }
        policy
    }
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<usize>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<usize>::deserialize(deserializer).map(Some)
}

fn deserialize_stage_policies<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<Stage, StagePolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<Stage, StageOverride>::deserialize(deserializer)?;
    Ok(overrides
        .into_iter()
        .map(|(stage, entry)| (stage, entry.apply(StagePolicy::for_stage(stage))))
        .collect())
}

fn default_prefix() -> String {
    "docflow".to_string()
}

fn default_standby_seconds() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            standby_seconds: default_standby_seconds(),
            channel: ChannelSettings::default(),
            launcher: LauncherSettings::default(),
            stages: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the standby delay.
    #[must_use]
    pub fn with_standby_seconds(mut self, seconds: u64) -> Self {
        self.standby_seconds = seconds;
        self
    }

    /// Overrides one stage's policy.
    #[must_use]
    pub fn with_policy(mut self, stage: Stage, policy: StagePolicy) -> Self {
        self.stages.insert(stage, policy);
        self
    }

    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Starts from defaults and applies `DOCFLOW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Applies `DOCFLOW_*` overrides from an arbitrary variable source.
    ///
    /// Recognized keys: `DOCFLOW_PREFIX`, `DOCFLOW_STANDBY_SECONDS`,
    /// `DOCFLOW_<STAGE>_RETRY_LIMIT`, `DOCFLOW_<STAGE>_TIMEOUT_MINUTES`.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match name {
                "PREFIX" => config.prefix = value.to_string(),
                "STANDBY_SECONDS" => config.standby_seconds = parse_number(name, value)?,
                _ => config.apply_stage_var(name, value)?,
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_stage_var(&mut self, name: &str, value: &str) -> Result<()> {
        let Some((stage, field)) = name.split_once('_') else {
            return Ok(());
        };
        let Ok(stage) = stage.parse::<Stage>() else {
            return Ok(());
        };

        match field {
            "RETRY_LIMIT" => {
                let limit = parse_number(name, value)?;
                self.policy_mut(stage).retry_limit = limit;
            }
            "TIMEOUT_MINUTES" => {
                let minutes = parse_number(name, value)?;
                self.policy_mut(stage).timeout_minutes = minutes;
            }
            _ => {}
        }
        Ok(())
    }

    fn policy_mut(&mut self, stage: Stage) -> &mut StagePolicy {
        self.stages
            .entry(stage)
            .or_insert_with(|| StagePolicy::for_stage(stage))
    }

    /// Returns the effective policy for a stage.
    #[must_use]
    pub fn policy(&self, stage: Stage) -> StagePolicy {
        self.stages
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StagePolicy::for_stage(stage))
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(DocflowError::config("prefix must not be empty"));
        }
        if self.channel.batch_size == 0 {
            return Err(DocflowError::config("channel.batch_size must be at least 1"));
        }
        if self.launcher.max_in_flight == 0 {
            return Err(DocflowError::config("launcher.max_in_flight must be at least 1"));
        }
        for stage in Stage::ALL {
            if self.policy(stage).timeout_minutes == 0 {
                return Err(DocflowError::config(format!(
                    "stages.{stage}.timeout_minutes must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Gets the standby delay as a Duration.
    #[must_use]
    pub fn standby(&self) -> Duration {
        Duration::from_secs(self.standby_seconds)
    }

    /// Name of a stage's completion channel: `{prefix}-queue-{stage}`.
    #[must_use]
    pub fn queue_name(&self, stage: Stage) -> String {
        format!("{}-queue-{stage}", self.prefix)
    }

    /// Name of a stage's actor: `{prefix}-processor-{stage}-actor`.
    #[must_use]
    pub fn actor_ref(&self, stage: Stage) -> String {
        format!("{}-processor-{stage}-actor", self.prefix)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| DocflowError::config(format!("{ENV_PREFIX}{name}: '{value}' is not a number")))
}

/// Retry, timeout, and admission policy for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Rejections tolerated before the document fails.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Minutes a document may stay `RUNNING` before it times out.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    /// Cap on concurrently running documents at this stage.
    #[serde(default)]
    pub max_pending: Option<usize>,
}

fn default_retry_limit() -> u32 {
    5
}

fn default_timeout_minutes() -> u32 {
    30
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            timeout_minutes: default_timeout_minutes(),
            max_pending: None,
        }
    }
}

impl StagePolicy {
    /// The deployed policy for a stage.
    ///
    /// Operate tolerates more rejections because its launches are cheap;
    /// augment waits on human reviewers, so it gets a long timeout and a cap
    /// on open review loops.
    #[must_use]
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Operate => Self::default().with_retry_limit(30),
            Stage::Augment => Self::default().with_timeout_minutes(300).with_max_pending(5),
            _ => Self::default(),
        }
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    /// Sets the admission cap.
    #[must_use]
    pub fn with_max_pending(mut self, cap: usize) -> Self {
        self.max_pending = Some(cap);
        self
    }

    /// Gets the timeout window.
    #[must_use]
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.timeout_minutes))
    }
}

/// Stage channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Maximum messages returned by one receive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds a received message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_visibility_timeout() -> u64 {
    30
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            visibility_timeout_seconds: default_visibility_timeout(),
        }
    }
}

impl ChannelSettings {
    /// Gets the visibility timeout as a Duration.
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

/// Local launcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Maximum actor executions in flight across all stages.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}
