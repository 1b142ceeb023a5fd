use crate::config::ConfigSnapshot;
use crate::downloader::command::{staging_dir_for, DownloadCommand, DEFAULT_DOWNLOADER_PROGRAM};
use crate::downloader::stream::read_process_stream;
use crate::downloader::{sort_snapshots, DownloadOptions, DownloadStatus, DownloadTask, TaskSnapshot};
use crate::errors::{AppError, Result};
use crate::metadata::{AudioMetadata, FfprobeExtractor, MetadataExtractor};
use crate::processing::{
    find_latest_audio_file, find_output_file_in_lines, format_error_messages, is_audio_file,
    parse_progress_line, unwrap_staging_dir, StagingOutcome,
};
use crate::security::input_validation::InputValidator;
use crate::utils::{ensure_dir_exists, generate_download_id, make_relative_path, normalize_path};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock, Semaphore};

const STDERR_LOG_TAIL: usize = 20;

/// How a subprocess run ended.
enum RunOutcome {
    Exited {
        status: ExitStatus,
        stdout_lines: Vec<String>,
        stderr_lines: Vec<String>,
    },
    Cancelled,
}

/// Owns the task registry and runs audiobook-dl for each accepted task.
///
/// Cloning is cheap; clones share the same registry and admission slots.
#[derive(Clone)]
pub struct DownloadManager {
    tasks: Arc<Mutex<HashMap<String, DownloadTask>>>,
    config: Arc<RwLock<ConfigSnapshot>>,
    slots: Arc<Semaphore>,
    slot_capacity: Arc<Mutex<usize>>,
    config_dir: PathBuf,
    downloads_dir: PathBuf,
    program: String,
    metadata: Arc<dyn MetadataExtractor + Send + Sync>,
}

impl DownloadManager {
    pub fn new(config_dir: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> Result<Self> {
        // The subprocess runs inside the downloads root, so paths handed to it must be absolute.
        let downloads_dir = downloads_dir.into();
        std::fs::create_dir_all(&downloads_dir)?;
        let downloads_dir = std::path::absolute(&downloads_dir)?;
        let config_dir = std::path::absolute(config_dir.into())?;

        let config = ConfigSnapshot::load(&config_dir);
        let capacity = config.max_concurrent_downloads;
        log::info!(
            "✅ [MANAGER] Initialized - downloads: {:?}, max concurrent: {}",
            downloads_dir,
            capacity
        );

        Ok(Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(RwLock::new(config)),
            slots: Arc::new(Semaphore::new(capacity)),
            slot_capacity: Arc::new(Mutex::new(capacity)),
            config_dir,
            downloads_dir,
            program: DEFAULT_DOWNLOADER_PROGRAM.to_string(),
            metadata: Arc::new(FfprobeExtractor::default()),
        })
    }

    /// Runs `program` instead of `audiobook-dl`.
    pub fn with_downloader_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_metadata_extractor(mut self, extractor: Arc<dyn MetadataExtractor + Send + Sync>) -> Self {
        self.metadata = extractor;
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub async fn config(&self) -> ConfigSnapshot {
        self.config.read().await.clone()
    }

    /// Re-reads the config file and resizes the admission slots.
    pub async fn reload_config(&self) {
        let snapshot = ConfigSnapshot::load(&self.config_dir);
        let target = snapshot.max_concurrent_downloads;
        *self.config.write().await = snapshot;

        let mut capacity = self.slot_capacity.lock().await;
        if target > *capacity {
            self.slots.add_permits(target - *capacity);
        } else if target < *capacity {
            // Running downloads keep their slots; the surplus is retired as they finish.
            let surplus = (*capacity - target) as u32;
            let slots = self.slots.clone();
            tokio::spawn(async move {
                if let Ok(permits) = slots.acquire_many_owned(surplus).await {
                    permits.forget();
                }
            });
        }

        if target != *capacity {
            log::info!("[MANAGER] Max concurrent downloads: {} -> {}", *capacity, target);
        }
        *capacity = target;
    }

    /// Registers a download and starts its monitor in the background.
    pub async fn add_download(&self, url: &str, options: DownloadOptions) -> Result<TaskSnapshot> {
        let validator = InputValidator::new();
        validator.validate_url(url)?;
        let url = url.trim().to_string();

        let task_id = match options.task_id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                validator.validate_task_id(id)?;
                id.to_string()
            }
            None => generate_download_id(),
        };

        let snapshot = {
            let mut tasks = self.tasks.lock().await;
            if tasks.contains_key(&task_id) {
                return Err(AppError::Validation(format!("Task {} already exists", task_id)));
            }
            let task = DownloadTask::new(task_id.clone(), url.clone());
            let snapshot = task.snapshot();
            tasks.insert(task_id.clone(), task);
            snapshot
        };

        log::info!("📥 [MANAGER] Task queued - ID: {}, URL: {}", task_id, url);

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_download(task_id, options).await;
        });

        Ok(snapshot)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        tasks.get(task_id).map(DownloadTask::snapshot)
    }

    /// All tasks, active ones first, each group oldest first.
    pub async fn get_all_tasks(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = {
            let tasks = self.tasks.lock().await;
            tasks.values().map(DownloadTask::snapshot).collect()
        };
        sort_snapshots(&mut snapshots);
        snapshots
    }

    /// Cancels a pending or downloading task, stopping its subprocess.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(task_id) {
            Some(task) if !task.status.is_terminal() => {
                let previous = task.status;
                task.finish(DownloadStatus::Cancelled, "Download cancelled by user");
                task.cancel_signal.notify_one();
                log::info!("🛑 [MANAGER] Task cancelled - ID: {}, was: {}", task_id, previous);
                true
            }
            _ => false,
        }
    }

    /// Removes a finished task; active tasks are kept.
    pub async fn remove_task(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(task_id).map(|task| task.status) {
            Some(status) if status.is_terminal() => {
                tasks.remove(task_id);
                log::info!("[MANAGER] Task removed - ID: {}, Status: {}", task_id, status);
                true
            }
            _ => false,
        }
    }

    /// Drops every completed, failed and cancelled task. Returns how many went.
    pub async fn clear_completed(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.status.is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            log::info!("[MANAGER] Cleared {} finished tasks", removed);
        }
        removed
    }

    async fn run_download(&self, task_id: String, options: DownloadOptions) {
        let cancel_signal = match self.tasks.lock().await.get(&task_id) {
            Some(task) => task.cancel_signal.clone(),
            None => return,
        };

        let _permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    self.fail_task(&task_id, e.to_string(), "Download failed with exception").await;
                    return;
                }
            },
            _ = cancel_signal.notified() => {
                log::info!("[MANAGER] Task {} cancelled before start", task_id);
                return;
            }
        };

        let config = self.config().await;
        let staging_dir = staging_dir_for(&self.downloads_dir, &task_id);
        let (url, started_at) = {
            let mut tasks = self.tasks.lock().await;
            let task = match tasks.get_mut(&task_id) {
                Some(task) if task.status == DownloadStatus::Pending => task,
                _ => return,
            };
            let started_at = Utc::now();
            task.status = DownloadStatus::Downloading;
            task.started_at = Some(started_at);
            task.message = "Starting download...".to_string();
            task.staging_dir = Some(staging_dir.clone());
            (task.url.clone(), started_at)
        };

        let command = DownloadCommand::build(
            &self.program,
            &self.config_dir,
            &staging_dir,
            &url,
            &config,
            &options,
        );
        log::info!(
            "🚀 [MANAGER] Download started - Task: {}, URL: {}, Command: {}",
            task_id,
            url,
            command
        );

        match self.execute(&task_id, &command, &staging_dir, &cancel_signal).await {
            Ok(RunOutcome::Cancelled) => {
                log::info!("🛑 [MANAGER] Subprocess stopped for cancelled task {}", task_id);
                self.discard_staging(&staging_dir).await;
            }
            Ok(RunOutcome::Exited {
                status,
                stdout_lines,
                stderr_lines,
            }) if status.success() => {
                let mut lines = stdout_lines;
                lines.extend(stderr_lines);
                self.complete_task(&task_id, &staging_dir, started_at, &lines).await;
            }
            Ok(RunOutcome::Exited {
                status,
                stderr_lines,
                ..
            }) => {
                log::error!(
                    "❌ [MANAGER] Download failed - Task: {}, Exit: {}",
                    task_id,
                    status
                );
                let tail_start = stderr_lines.len().saturating_sub(STDERR_LOG_TAIL);
                for line in &stderr_lines[tail_start..] {
                    log::error!("  {}", line);
                }
                self.fail_task(&task_id, format_error_messages(&stderr_lines), "Download failed")
                    .await;
                self.discard_staging(&staging_dir).await;
            }
            Err(e) => {
                log::error!("❌ [MANAGER] Download failed with exception - Task: {}, Error: {}", task_id, e);
                self.fail_task(&task_id, e.to_string(), "Download failed with exception")
                    .await;
                self.discard_staging(&staging_dir).await;
            }
        }
    }

    /// Spawns the downloader and follows its output until exit or cancellation.
    async fn execute(
        &self,
        task_id: &str,
        command: &DownloadCommand,
        staging_dir: &Path,
        cancel_signal: &Notify,
    ) -> Result<RunOutcome> {
        ensure_dir_exists(staging_dir).await?;

        let mut child = command.to_command(&self.downloads_dir).spawn().map_err(|e| {
            AppError::Download(format!("Failed to start {}: {}", command.program, e))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::Download("Failed to capture subprocess output streams".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AppError::Download("Failed to capture subprocess output streams".to_string())
        })?;

        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        let readers = async move {
            tokio::join!(
                read_process_stream(stdout, lines_tx.clone()),
                read_process_stream(stderr, lines_tx)
            )
        };
        let progress_updates = async {
            while let Some(line) = lines_rx.recv().await {
                self.apply_progress_line(task_id, &line).await;
            }
        };

        let (stdout_lines, stderr_lines) = tokio::select! {
            ((stdout_lines, stderr_lines), ()) = async { tokio::join!(readers, progress_updates) } => {
                (stdout_lines?, stderr_lines?)
            }
            _ = cancel_signal.notified() => {
                if let Err(e) = child.kill().await {
                    log::warn!("⚠️ [MANAGER] Could not kill subprocess for {}: {}", task_id, e);
                }
                return Ok(RunOutcome::Cancelled);
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel_signal.notified() => {
                if let Err(e) = child.kill().await {
                    log::warn!("⚠️ [MANAGER] Could not kill subprocess for {}: {}", task_id, e);
                }
                return Ok(RunOutcome::Cancelled);
            }
        };

        Ok(RunOutcome::Exited {
            status,
            stdout_lines,
            stderr_lines,
        })
    }

    async fn apply_progress_line(&self, task_id: &str, line: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            if task.status != DownloadStatus::Downloading {
                return;
            }
            let (progress, message) = parse_progress_line(line, task.progress);
            task.progress = progress;
            task.message = message;
        }
    }

    async fn complete_task(&self, task_id: &str, staging_dir: &Path, started_at: DateTime<Utc>, lines: &[String]) {
        let (output_file, reconciled) = self.locate_output(staging_dir, started_at, lines).await;
        let metadata = match &output_file {
            Some(relative) => self.probe_metadata(relative).await,
            None => None,
        };

        let mut tasks = self.tasks.lock().await;
        let task = match tasks.get_mut(task_id) {
            Some(task) if task.status == DownloadStatus::Downloading => task,
            _ => return,
        };

        task.progress = 100;
        task.finish(DownloadStatus::Completed, "Download completed successfully!");
        task.output_file = output_file;
        task.metadata = metadata;
        if reconciled {
            task.staging_dir = None;
        }

        log::info!(
            "✅ [MANAGER] Download completed - Task: {}, Duration: {:.1}s, File: {}",
            task_id,
            task.duration().unwrap_or_default(),
            task.output_file.as_deref().unwrap_or("<unknown>")
        );
    }

    /// Output resolution, staging reconciliation, then a timestamp search.
    ///
    /// Errors are logged and leave the output unknown; the download itself
    /// already succeeded.
    async fn locate_output(&self, staging_dir: &Path, started_at: DateTime<Utc>, lines: &[String]) -> (Option<String>, bool) {
        let root = self.downloads_dir.clone();
        let known = find_output_file_in_lines(lines, &root);

        let staging = staging_dir.to_path_buf();
        let unwrap_root = root.clone();
        let unwrap_known = known.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            unwrap_staging_dir(&staging, &unwrap_root, unwrap_known.as_deref())
        })
        .await;

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                log::warn!("⚠️ [MANAGER] Staging reconciliation failed for {:?}: {}", staging_dir, e);
                self.fallback_outcome(staging_dir, known)
            }
            Err(e) => {
                log::error!("❌ [MANAGER] Staging reconciliation panicked: {}", e);
                self.fallback_outcome(staging_dir, known)
            }
        };
        let reconciled = !staging_dir.exists();

        if outcome.output_file.is_some() {
            return (outcome.output_file, reconciled);
        }
        if let Some(moved) = outcome.moved_file.as_deref().filter(|path| is_audio_file(path)) {
            log::info!("[MANAGER] Using file moved out of staging: {:?}", moved);
            return (Some(make_relative_path(&normalize_path(moved), &root)), reconciled);
        }

        let search_root = outcome.search_root;
        let floor: std::time::SystemTime = started_at.into();
        let latest = tokio::task::spawn_blocking(move || {
            find_latest_audio_file(&root, floor, Some(&search_root))
                .map(|path| make_relative_path(&normalize_path(&path), &root))
        })
        .await
        .unwrap_or_else(|e| {
            log::error!("❌ [MANAGER] Output search panicked: {}", e);
            None
        });

        (latest, reconciled)
    }

    /// Keeps a known output only if it still exists after a partial move.
    fn fallback_outcome(&self, staging_dir: &Path, known: Option<String>) -> StagingOutcome {
        StagingOutcome {
            output_file: known.filter(|k| self.downloads_dir.join(k).exists()),
            search_root: staging_dir.to_path_buf(),
            moved_file: None,
        }
    }

    async fn probe_metadata(&self, relative: &str) -> Option<AudioMetadata> {
        let full_path = self.downloads_dir.join(relative);
        self.metadata.extract(&full_path).await
    }

    async fn fail_task(&self, task_id: &str, error: String, message: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            if task.status.is_terminal() {
                return;
            }
            task.progress = 0;
            task.error = Some(if error.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                error
            });
            task.finish(DownloadStatus::Failed, message);
        }
    }

    async fn discard_staging(&self, staging_dir: &Path) {
        if !staging_dir.exists() {
            return;
        }
        match tokio::fs::remove_dir_all(staging_dir).await {
            Ok(()) => log::debug!("[MANAGER] Removed staging directory {:?}", staging_dir),
            Err(e) => log::warn!("⚠️ [MANAGER] Could not remove {:?}: {}", staging_dir, e),
        }
    }
}
