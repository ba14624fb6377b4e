//! References into the external blob store.

use crate::errors::DocflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `(container, path)` pair naming an artifact in the blob store.
///
/// Documents only ever hold references; artifact bytes never travel through
/// the store or the channels. The path may name a single object or a prefix
/// when a stage produces several outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// The bucket / container name.
    pub container: String,
    /// The object key or key prefix inside the container.
    pub path: String,
}

impl BlobRef {
    /// Creates a new blob reference.
    #[must_use]
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }

    /// Returns the last path segment up to its first `.`.
    #[must_use]
    pub fn file_name(&self) -> &str {
        let last = self.path.rsplit('/').next().unwrap_or_default();
        last.split('.').next().unwrap_or_default()
    }

    /// Returns the extension of the last path segment, if any.
    #[must_use]
    pub fn file_type(&self) -> Option<&str> {
        let last = self.path.rsplit('/').next().unwrap_or_default();
        last.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Returns a reference to a child path under this one.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        let path = if base.is_empty() {
            segment.to_string()
        } else {
            format!("{base}/{segment}")
        };
        Self::new(self.container.clone(), path)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob://{}/{}", self.container, self.path)
    }
}

impl FromStr for BlobRef {
    type Err = DocflowError;

    /// Accepts `scheme://container/path` for any scheme, so provider URLs
    /// (`s3://...`) decode the same way as our own `blob://` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DocflowError::InvalidBlobRef(s.to_string());
        let (_, rest) = s.split_once("://").ok_or_else(invalid)?;
        let (container, path) = rest.split_once('/').unwrap_or((rest, ""));

        if container.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(container, path))
    }
}
