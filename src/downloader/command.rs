use crate::config::{ConfigSnapshot, CONFIG_FILE_NAME};
use crate::downloader::DownloadOptions;
use crate::utils::sanitize_template;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub const DEFAULT_DOWNLOADER_PROGRAM: &str = "audiobook-dl";

/// Placeholder audiobook-dl expands to the book's author.
const AUTHOR_PLACEHOLDER: &str = "{author}";

/// Private output directory for one task, directly under the downloads root.
///
/// Task ids are validated on admission to letters, digits, `-` and `_`, so the
/// id is used as is.
pub fn staging_dir_for(downloads_root: &Path, task_id: &str) -> PathBuf {
    downloads_root.join(format!("__task_{}__", task_id))
}

/// Program and arguments for one audiobook-dl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DownloadCommand {
    /// Builds `audiobook-dl --config <file> -o <path> [flags] <url>`.
    pub fn build(
        program: &str,
        config_dir: &Path,
        staging_dir: &Path,
        url: &str,
        config: &ConfigSnapshot,
        options: &DownloadOptions,
    ) -> Self {
        let template = options
            .output_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&config.output_template);
        let template = sanitize_template(template);

        let mut output_path = staging_dir.to_path_buf();
        if config.group_by_author {
            output_path.push(AUTHOR_PLACEHOLDER);
        }
        if config.create_folder {
            output_path.push(&template);
        }
        output_path.push(&template);

        let mut args = vec![
            "--config".to_string(),
            config_dir.join(CONFIG_FILE_NAME).to_string_lossy().into_owned(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
        ];

        if options.combine {
            args.push("--combine".to_string());
        }
        if options.no_chapters {
            args.push("--no-chapters".to_string());
        }
        if let Some(format) = options.output_format.as_deref().filter(|f| !f.is_empty()) {
            args.push("--output-format".to_string());
            args.push(format.to_string());
        }

        args.push(url.to_string());

        Self {
            program: program.to_string(),
            args,
        }
    }

    /// Path passed to `-o`.
    pub fn output_path(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == "-o")
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Process with piped output, no colors and unbuffered Python output.
    pub fn to_command(&self, working_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(working_dir)
            .env("PYTHONUNBUFFERED", "1")
            .env("FORCE_COLOR", "0")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl std::fmt::Display for DownloadCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}
