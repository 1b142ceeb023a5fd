//! Interpreting audiobook-dl output and reconciling what it leaves on disk.
//!
//! - `progress` - line classification into progress/status, error summaries
//! - `output` - locating the produced audio file
//! - `staging` - moving a task's private output into the shared tree

pub mod output;
pub mod progress;
pub mod staging;

pub use output::{find_latest_audio_file, find_output_file_in_lines, is_audio_file, AUDIO_EXTENSIONS};
pub use progress::{format_error_messages, parse_progress_line, strip_ansi_codes};
pub use staging::{unwrap_staging_dir, StagingOutcome};
