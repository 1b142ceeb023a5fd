use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toml::{Table, Value};

pub const CONFIG_FILE_NAME: &str = "audiobook-dl.toml";
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{title}";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;
pub const MAX_CONCURRENT_DOWNLOADS_CEILING: usize = 10;

/// Scheduler-facing settings read from `audiobook-dl.toml`.
///
/// Replaced wholesale on reload, never patched field by field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub max_concurrent_downloads: usize,
    pub create_folder: bool,
    pub group_by_author: bool,
    pub output_template: String,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            create_folder: false,
            group_by_author: false,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
        }
    }
}

impl ConfigSnapshot {
    /// Loads the snapshot, falling back to defaults when the file is missing or unreadable.
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        match Self::read(&config_file) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("[CONFIG] Could not read {:?}, using defaults: {}", config_file, e);
                Self::default()
            }
        }
    }

    fn read(config_file: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("max_concurrent_downloads", DEFAULT_MAX_CONCURRENT_DOWNLOADS as i64)?
            .set_default("create_folder", false)?
            .set_default("group_by_author", false)?
            .set_default("output_template", DEFAULT_OUTPUT_TEMPLATE)?
            .add_source(
                config::File::from(config_file)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .build()?;

        let requested = settings.get_int("max_concurrent_downloads")?;
        let template = settings.get_string("output_template")?;

        Ok(Self {
            max_concurrent_downloads: clamp_concurrency(requested),
            create_folder: settings.get_bool("create_folder")?,
            group_by_author: settings.get_bool("group_by_author")?,
            output_template: if template.trim().is_empty() {
                DEFAULT_OUTPUT_TEMPLATE.to_string()
            } else {
                template
            },
        })
    }
}

fn clamp_concurrency(requested: i64) -> usize {
    requested.clamp(1, MAX_CONCURRENT_DOWNLOADS_CEILING as i64) as usize
}

/// Credentials for one source, e.g. `storytel`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SourceCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalSettingsUpdate {
    pub output_template: Option<String>,
    pub database_directory: Option<String>,
    pub skip_downloaded: Option<bool>,
    pub max_concurrent_downloads: Option<usize>,
    pub create_folder: Option<bool>,
    pub group_by_author: Option<bool>,
}

/// Reads and writes the whole `audiobook-dl.toml` document.
///
/// Keys this crate does not know about are preserved, since the same file is
/// handed to audiobook-dl.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        std::fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        Ok(Self {
            config_dir,
            config_file,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file_path(&self) -> &Path {
        &self.config_file
    }

    pub fn load_config(&self) -> Table {
        if !self.config_file.exists() {
            return empty_config();
        }

        match std::fs::read_to_string(&self.config_file)
            .map_err(crate::errors::AppError::from)
            .and_then(|content| Ok(toml::from_str::<Table>(&content)?))
        {
            Ok(config) => config,
            Err(e) => {
                log::error!("[CONFIG] Error loading config: {}", e);
                empty_config()
            }
        }
    }

    pub fn save_config(&self, config: &Table) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn get_source_config(&self, source_name: &str) -> Option<SourceCredentials> {
        let config = self.load_config();
        let source = config
            .get("sources")
            .and_then(Value::as_table)?
            .get(&source_name.to_lowercase())?
            .clone();
        source.try_into().ok()
    }

    pub fn update_source_config(&self, source_name: &str, credentials: SourceCredentials) -> Result<()> {
        let mut config = self.load_config();
        let source_value = Value::try_from(&credentials)?;

        let fields: Vec<String> = source_value
            .as_table()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();

        let mut sources = match config.remove("sources") {
            Some(Value::Table(sources)) => sources,
            _ => Table::new(),
        };
        sources.insert(source_name.to_lowercase(), source_value);
        config.insert("sources".to_string(), Value::Table(sources));
        self.save_config(&config)?;

        log::info!(
            "[CONFIG] Source configuration saved - source: {}, fields: {:?}",
            source_name,
            fields
        );
        Ok(())
    }

    /// Removes a source; removing an unknown source is not an error.
    pub fn remove_source_config(&self, source_name: &str) -> Result<()> {
        let mut config = self.load_config();
        let key = source_name.to_lowercase();

        let removed = config
            .get_mut("sources")
            .and_then(Value::as_table_mut)
            .and_then(|sources| sources.remove(&key))
            .is_some();

        if removed {
            self.save_config(&config)?;
            log::info!("[CONFIG] Source configuration removed - source: {}", source_name);
        }
        Ok(())
    }

    pub fn list_configured_sources(&self) -> Vec<String> {
        self.load_config()
            .get("sources")
            .and_then(Value::as_table)
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn update_global_settings(&self, update: GlobalSettingsUpdate) -> Result<()> {
        let mut config = self.load_config();
        let mut changes = Vec::new();

        let mut set = |key: &str, value: Value| {
            changes.push(format!("{}={}", key, value));
            config.insert(key.to_string(), value);
        };

        if let Some(template) = update.output_template {
            set("output_template", Value::String(template));
        }
        if let Some(dir) = update.database_directory {
            set("database_directory", Value::String(dir));
        }
        if let Some(skip) = update.skip_downloaded {
            set("skip_downloaded", Value::Boolean(skip));
        }
        if let Some(max) = update.max_concurrent_downloads {
            set("max_concurrent_downloads", Value::Integer(max as i64));
        }
        if let Some(create) = update.create_folder {
            set("create_folder", Value::Boolean(create));
        }
        if let Some(group) = update.group_by_author {
            set("group_by_author", Value::Boolean(group));
        }

        self.save_config(&config)?;
        if !changes.is_empty() {
            log::info!("[CONFIG] Global settings updated - {}", changes.join(", "));
        }
        Ok(())
    }
}

fn empty_config() -> Table {
    let mut config = Table::new();
    config.insert("sources".to_string(), Value::Table(Table::new()));
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(ConfigSnapshot::load(dir.path()), ConfigSnapshot::default());
    }

    #[test]
    fn snapshot_reads_and_clamps() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"
max_concurrent_downloads = 42
create_folder = true
group_by_author = true
output_template = "{author} - {title}"
"#,
        );

        let snapshot = ConfigSnapshot::load(dir.path());
        assert_eq!(snapshot.max_concurrent_downloads, 10);
        assert!(snapshot.create_folder);
        assert!(snapshot.group_by_author);
        assert_eq!(snapshot.output_template, "{author} - {title}");

        write_config(dir.path(), "max_concurrent_downloads = 0\n");
        assert_eq!(ConfigSnapshot::load(dir.path()).max_concurrent_downloads, 1);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "max_concurrent_downloads = [not toml");
        assert_eq!(ConfigSnapshot::load(dir.path()), ConfigSnapshot::default());
    }

    #[test]
    fn global_settings_persist_and_feed_the_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        manager
            .update_global_settings(GlobalSettingsUpdate {
                output_template: Some("{title} - {author}".to_string()),
                create_folder: Some(true),
                group_by_author: Some(true),
                max_concurrent_downloads: Some(3),
                ..Default::default()
            })
            .unwrap();

        let loaded = manager.load_config();
        assert_eq!(loaded["output_template"].as_str(), Some("{title} - {author}"));
        assert_eq!(loaded["group_by_author"].as_bool(), Some(true));
        assert_eq!(loaded["max_concurrent_downloads"].as_integer(), Some(3));

        let snapshot = ConfigSnapshot::load(dir.path());
        assert_eq!(snapshot.max_concurrent_downloads, 3);
        assert!(snapshot.group_by_author);
    }

    #[test]
    fn source_credentials_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        manager
            .update_source_config(
                "Storytel",
                SourceCredentials {
                    username: Some("u".to_string()),
                    password: Some("p".to_string()),
                    library: Some("lib".to_string()),
                    cookie_file: None,
                },
            )
            .unwrap();

        let stored = manager.get_source_config("storytel").unwrap();
        assert_eq!(stored.username.as_deref(), Some("u"));
        assert_eq!(stored.library.as_deref(), Some("lib"));
        assert!(stored.cookie_file.is_none());
        assert_eq!(manager.list_configured_sources(), vec!["storytel".to_string()]);

        manager.remove_source_config("storytel").unwrap();
        assert!(manager.get_source_config("storytel").is_none());
        manager.remove_source_config("storytel").unwrap();
    }

    #[test]
    fn unknown_keys_survive_updates() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "database_directory = \"/db\"\n[sources.saxo]\nusername = \"x\"\n");
        let manager = ConfigManager::new(dir.path()).unwrap();

        manager
            .update_global_settings(GlobalSettingsUpdate {
                create_folder: Some(false),
                ..Default::default()
            })
            .unwrap();

        let loaded = manager.load_config();
        assert_eq!(loaded["database_directory"].as_str(), Some("/db"));
        assert_eq!(manager.list_configured_sources(), vec!["saxo".to_string()]);
    }
}
