pub mod probe;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use probe::{parse_ffprobe_output, FfprobeExtractor};

/// Descriptive fields read from a finished audiobook file.
///
/// Every field is optional; a record with none of them set is never produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl AudioMetadata {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Collapses an all-empty record to `None`.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait::async_trait]
pub trait MetadataExtractor {
    /// Probes `file_path`; `None` when nothing could be read.
    async fn extract(&self, file_path: &Path) -> Option<AudioMetadata>;
}
