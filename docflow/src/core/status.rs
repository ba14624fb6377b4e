//! Stage, state, and grade enums plus the composite `Stage#State` key.

use crate::errors::DocflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used by every composite key (`Stage#State`, `Order#Stamp`).
pub const HASH: char = '#';

/// One of the seven ordered pipeline steps.
///
/// Declaration order is pipeline order, so the derived `Ord` gives
/// `Acquire < Convert < ... < Catalog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Ingest the source artifact.
    Acquire,
    /// Normalize the artifact into a common format.
    Convert,
    /// Run external table analysis.
    Extract,
    /// Reshape analysis output into tables.
    Reshape,
    /// Apply business operations to the tables.
    Operate,
    /// Human review of the operated tables.
    Augment,
    /// Publish the final result.
    Catalog,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Self; 7] = [
        Self::Acquire,
        Self::Convert,
        Self::Extract,
        Self::Reshape,
        Self::Operate,
        Self::Augment,
        Self::Catalog,
    ];

    /// Returns the following stage, or `None` for the final stage.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Acquire => Some(Self::Convert),
            Self::Convert => Some(Self::Extract),
            Self::Extract => Some(Self::Reshape),
            Self::Reshape => Some(Self::Operate),
            Self::Operate => Some(Self::Augment),
            Self::Augment => Some(Self::Catalog),
            Self::Catalog => None,
        }
    }

    /// Returns true for the last stage of the pipeline.
    #[must_use]
    pub fn is_final(self) -> bool {
        self.next().is_none()
    }

    /// Consecutive `(current, next)` pairs in pipeline order.
    pub fn transitions() -> impl Iterator<Item = (Self, Self)> {
        Self::ALL
            .into_iter()
            .filter_map(|stage| stage.next().map(|next| (stage, next)))
    }

    /// Lower-case name, as used in resource names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Convert => "convert",
            Self::Extract => "extract",
            Self::Reshape => "reshape",
            Self::Operate => "operate",
            Self::Augment => "augment",
            Self::Catalog => "catalog",
        }
    }

    /// Title-case name, as used in the `Stage#State` key.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Acquire => "Acquire",
            Self::Convert => "Convert",
            Self::Extract => "Extract",
            Self::Reshape => "Reshape",
            Self::Operate => "Operate",
            Self::Augment => "Augment",
            Self::Catalog => "Catalog",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DocflowError::InvalidStageState(s.to_string()))
    }
}

/// A document's lifecycle position within its current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Eligible for a first launch.
    Waiting,
    /// Launched; waiting for a completion message.
    Running,
    /// A launch was rejected; eligible for another attempt.
    Holding,
    /// The stage completed; eligible for promotion.
    Success,
    /// The stage failed. Terminal.
    Failure,
    /// No completion was observed in time. Terminal.
    Timeout,
}

impl State {
    /// Every state.
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Running,
        Self::Holding,
        Self::Success,
        Self::Failure,
        Self::Timeout,
    ];

    /// States the begin phase launches from.
    pub const LAUNCHABLE: [Self; 2] = [Self::Waiting, Self::Holding];

    /// States that still need the pipeline's attention at some stage.
    pub const ACTIVE: [Self; 3] = [Self::Waiting, Self::Holding, Self::Running];

    /// Returns true for states no phase will ever leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }

    /// Lower-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Holding => "holding",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }

    /// Title-case name, as used in the `Stage#State` key.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Holding => "Holding",
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DocflowError::InvalidStageState(s.to_string()))
    }
}

/// Outcome recorded for one execution attempt inside a stage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    /// Not attempted yet, or the last launch was rejected.
    #[default]
    Wait,
    /// Admission control declined the launch.
    Skip,
    /// Launched and in progress.
    Busy,
    /// The attempt succeeded.
    Pass,
    /// The attempt failed.
    Fail,
    /// The attempt timed out.
    Time,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => write!(f, "wait"),
            Self::Skip => write!(f, "skip"),
            Self::Busy => write!(f, "busy"),
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Time => write!(f, "time"),
        }
    }
}

/// The composite `(Stage, State)` position of a document.
///
/// Stored and queried as `"{Stage}#{State}"` in title case, e.g.
/// `"Extract#Waiting"`. Decoding accepts any letter case but requires exactly
/// one separator and two valid halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageState {
    /// The current stage.
    pub stage: Stage,
    /// The state within the current stage.
    pub state: State,
}

impl StageState {
    /// Creates a new stage state.
    #[must_use]
    pub fn new(stage: Stage, state: State) -> Self {
        Self { stage, state }
    }
}

impl Default for StageState {
    fn default() -> Self {
        Self::new(Stage::Acquire, State::Waiting)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{HASH}{}", self.stage.title(), self.state.title())
    }
}

impl FromStr for StageState {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DocflowError::InvalidStageState(s.to_string());
        let (stage, state) = s.split_once(HASH).ok_or_else(invalid)?;
        if state.contains(HASH) {
            return Err(invalid());
        }

        Ok(Self {
            stage: stage.parse().map_err(|_| invalid())?,
            state: state.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for StageState {
    type Error = DocflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StageState> for String {
    fn from(value: StageState) -> Self {
        value.to_string()
    }
}
