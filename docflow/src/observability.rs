//! Tracing subscriber setup for hosts of the pipeline.

use crate::errors::{DocflowError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line, with span context.
    Json,
}

impl FromStr for LogFormat {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(DocflowError::config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Fails if a global
/// subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
    };

    installed.map_err(|e| DocflowError::config(format!("tracing already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_fails() {
        // Whichever call wins, the other must report the conflict.
        let first = init_tracing(LogFormat::Json);
        let second = init_tracing(LogFormat::Pretty);
        assert!(first.is_err() || second.is_err());
    }
}
