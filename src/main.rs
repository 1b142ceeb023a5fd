use anyhow::{bail, Context};
use audiobook_dl_web::config::{ConfigManager, GlobalSettingsUpdate, SourceCredentials};
use audiobook_dl_web::services::{find_service, SUPPORTED_SERVICES};
use audiobook_dl_web::{DownloadManager, DownloadOptions, DownloadStatus, TaskSnapshot};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "audiobook-dl-web")]
#[command(author, version, about = "Queue and track audiobook-dl downloads", long_about = None)]
struct Cli {
    /// Directory holding audiobook-dl.toml
    #[arg(long, env = "CONFIG_DIR", default_value = "./config", global = true)]
    config_dir: PathBuf,

    /// Shared output directory
    #[arg(long, env = "DOWNLOADS_DIR", default_value = "./downloads", global = true)]
    downloads_dir: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more audiobooks, showing live progress
    Download {
        /// Book page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Output template, e.g. "{author} - {title}"
        #[arg(short, long)]
        template: Option<String>,

        /// Combine all files into a single file
        #[arg(long)]
        combine: bool,

        /// Leave out chapter information
        #[arg(long)]
        no_chapters: bool,

        /// Output format, e.g. mp3 or m4b
        #[arg(long)]
        output_format: Option<String>,
    },

    /// Manage per-service credentials
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Show or change global settings
    Settings {
        #[arg(long)]
        output_template: Option<String>,
        #[arg(long)]
        database_directory: Option<String>,
        #[arg(long)]
        skip_downloaded: Option<bool>,
        #[arg(long)]
        max_concurrent_downloads: Option<usize>,
        #[arg(long)]
        create_folder: Option<bool>,
        #[arg(long)]
        group_by_author: Option<bool>,
    },

    /// List the services audiobook-dl supports
    Services,
}

#[derive(Subcommand)]
enum SourceAction {
    /// List configured sources
    List,
    /// Show one source's stored fields
    Show { source: String },
    /// Store credentials for a source
    Set {
        source: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        library: Option<String>,
        #[arg(long)]
        cookie_file: Option<String>,
    },
    /// Forget a source's credentials
    Remove { source: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    match cli.command {
        Commands::Download {
            urls,
            template,
            combine,
            no_chapters,
            output_format,
        } => {
            let manager = DownloadManager::new(&cli.config_dir, &cli.downloads_dir)
                .context("Failed to initialize download manager")?;
            let options = DownloadOptions {
                task_id: None,
                output_template: template,
                combine,
                no_chapters,
                output_format,
            };
            run_downloads(&manager, &urls, options).await
        }
        Commands::Sources { action } => {
            let config = ConfigManager::new(&cli.config_dir)?;
            run_sources(&config, action)
        }
        Commands::Settings {
            output_template,
            database_directory,
            skip_downloaded,
            max_concurrent_downloads,
            create_folder,
            group_by_author,
        } => {
            let config = ConfigManager::new(&cli.config_dir)?;
            let update = GlobalSettingsUpdate {
                output_template,
                database_directory,
                skip_downloaded,
                max_concurrent_downloads,
                create_folder,
                group_by_author,
            };
            let changed = update.output_template.is_some()
                || update.database_directory.is_some()
                || update.skip_downloaded.is_some()
                || update.max_concurrent_downloads.is_some()
                || update.create_folder.is_some()
                || update.group_by_author.is_some();
            if changed {
                config.update_global_settings(update)?;
            }

            let mut settings = config.load_config();
            settings.remove("sources");
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Services => {
            println!("{}", serde_json::to_string_pretty(SUPPORTED_SERVICES)?);
            Ok(())
        }
    }
}

async fn run_downloads(manager: &DownloadManager, urls: &[String], options: DownloadOptions) -> anyhow::Result<()> {
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("=> ");
    let bars = MultiProgress::new();
    let mut tracked: HashMap<String, ProgressBar> = HashMap::new();

    for url in urls {
        let task = manager
            .add_download(url, options.clone())
            .await
            .with_context(|| format!("Could not queue {}", url))?;
        let bar = bars.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bar.set_prefix(short_id(&task.task_id));
        bar.set_message(task.message.clone());
        tracked.insert(task.task_id, bar);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                info!("🛑 Interrupted, cancelling downloads");
                for task_id in tracked.keys() {
                    manager.cancel_task(task_id).await;
                }
            }
        }

        let mut finished = 0;
        for (task_id, bar) in &tracked {
            let Some(task) = manager.get_task(task_id).await else {
                continue;
            };
            bar.set_position(u64::from(task.progress));
            bar.set_message(task.message.clone());
            if task.status.is_terminal() {
                if !bar.is_finished() {
                    bar.finish_with_message(format!("{} - {}", task.status, task.message));
                }
                finished += 1;
            }
        }

        if finished == tracked.len() {
            break;
        }
    }

    let results: Vec<TaskSnapshot> = manager
        .get_all_tasks()
        .await
        .into_iter()
        .filter(|task| tracked.contains_key(&task.task_id))
        .collect();
    println!("{}", serde_json::to_string_pretty(&results)?);

    let failed = results
        .iter()
        .filter(|task| task.status == DownloadStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} of {} downloads failed", failed, results.len());
    }
    Ok(())
}

fn run_sources(config: &ConfigManager, action: SourceAction) -> anyhow::Result<()> {
    match action {
        SourceAction::List => {
            for source in config.list_configured_sources() {
                let name = find_service(&source).map_or("unknown service", |s| s.name);
                println!("{} ({})", source, name);
            }
        }
        SourceAction::Show { source } => {
            let Some(mut credentials) = config.get_source_config(&source) else {
                bail!("Source {} is not configured", source);
            };
            if credentials.password.is_some() {
                credentials.password = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&credentials)?);
        }
        SourceAction::Set {
            source,
            username,
            password,
            library,
            cookie_file,
        } => {
            if find_service(&source).is_none() {
                log::warn!("⚠️ {} is not a known service, saving anyway", source);
            }
            config.update_source_config(
                &source,
                SourceCredentials {
                    username,
                    password,
                    library,
                    cookie_file,
                },
            )?;
        }
        SourceAction::Remove { source } => config.remove_source_config(&source)?,
    }
    Ok(())
}

fn short_id(task_id: &str) -> String {
    task_id.chars().take(8).collect()
}
