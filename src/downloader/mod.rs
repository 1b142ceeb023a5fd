pub mod command;
pub mod manager;
pub mod stream;

use crate::metadata::AudioMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

pub use manager::DownloadManager;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Listing order: active work first, then finished tasks.
    fn priority(self) -> u8 {
        match self {
            DownloadStatus::Downloading => 1,
            DownloadStatus::Pending => 2,
            DownloadStatus::Completed => 3,
            DownloadStatus::Failed => 4,
            DownloadStatus::Cancelled => 5,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options for one audiobook-dl run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Caller-chosen identifier; one is generated when absent.
    pub task_id: Option<String>,
    /// Overrides the configured `output_template`.
    pub output_template: Option<String>,
    pub combine: bool,
    pub no_chapters: bool,
    pub output_format: Option<String>,
}

/// Registry entry for one download. Only the manager mutates it.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
    pub status: DownloadStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Relative to the downloads root.
    pub output_file: Option<String>,
    pub metadata: Option<AudioMetadata>,
    /// Cleared once the staging directory has been reconciled.
    pub staging_dir: Option<PathBuf>,
    /// Wakes the task's monitor when the task is cancelled.
    pub(crate) cancel_signal: Arc<Notify>,
}

impl DownloadTask {
    pub fn new(id: String, url: String) -> Self {
        Self {
            id,
            url,
            status: DownloadStatus::Pending,
            progress: 0,
            message: "Waiting to start...".to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            output_file: None,
            metadata: None,
            staging_dir: None,
            cancel_signal: Arc::new(Notify::new()),
        }
    }

    /// Seconds between start and completion, once both are known.
    pub fn duration(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Moves the task into a terminal status and stamps `completed_at`.
    pub(crate) fn finish(&mut self, status: DownloadStatus, message: impl Into<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.message = message.into();
        self.completed_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            url: self.url.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration: self.duration(),
            error: self.error.clone(),
            output_file: self.output_file.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Flat, serializable view of a task handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub url: String,
    pub status: DownloadStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<f64>,
    pub error: Option<String>,
    pub output_file: Option<String>,
    pub metadata: Option<AudioMetadata>,
}

/// Orders snapshots by status priority, then by submission time.
pub fn sort_snapshots(snapshots: &mut [TaskSnapshot]) {
    snapshots.sort_by(|a, b| {
        a.status
            .priority()
            .cmp(&b.status.priority())
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}
