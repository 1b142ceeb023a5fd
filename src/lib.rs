//! Download orchestration around the `audiobook-dl` command line tool.
//!
//! [`DownloadManager`] accepts download requests, runs audiobook-dl under a
//! concurrency ceiling, tracks progress from its output and moves the finished
//! files from a per-task staging directory into the shared downloads folder.

pub mod config;
pub mod downloader;
pub mod errors;
pub mod metadata;
pub mod processing;
pub mod security;
pub mod services;
pub mod utils;

pub use crate::config::{ConfigManager, ConfigSnapshot};
pub use crate::downloader::{DownloadManager, DownloadOptions, DownloadStatus, TaskSnapshot};
pub use crate::errors::{AppError, Result};
pub use crate::metadata::{AudioMetadata, MetadataExtractor};
