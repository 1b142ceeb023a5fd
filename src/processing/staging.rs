//! Moves a finished task's private staging directory into the shared downloads tree.
//!
//! Each task writes into `downloads/__task_<id>__/`. When the download is done
//! that directory should hold exactly one entry: the produced file, or a single
//! folder audiobook-dl created around it. That entry is moved up one level.
//! Existing content at the destination is never overwritten; an incoming item
//! whose name is taken gets a ` (2)`, ` (3)`, ... suffix instead.

use crate::errors::{AppError, Result};
use crate::utils::{make_relative_path, normalize_path};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Result of reconciling a staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingOutcome {
    /// Known output path relative to the downloads root, rewritten if it moved.
    pub output_file: Option<String>,
    /// Where a timestamp search for the output file should look next.
    pub search_root: PathBuf,
    /// Final path of a lone file moved out of staging.
    pub moved_file: Option<PathBuf>,
}

impl StagingOutcome {
    fn untouched(staging_dir: &Path, known_output: Option<&str>) -> Self {
        Self {
            output_file: known_output.map(str::to_string),
            search_root: staging_dir.to_path_buf(),
            moved_file: None,
        }
    }
}

/// Relocates the single top-level entry of `staging_dir` into its parent.
///
/// `known_output` is relative to `downloads_root`. Staging directories holding
/// zero or several entries, or whose entry would replace a non-directory, are
/// left as they are and reported as the search root.
pub fn unwrap_staging_dir(
    staging_dir: &Path,
    downloads_root: &Path,
    known_output: Option<&str>,
) -> Result<StagingOutcome> {
    let mut entries = fs::read_dir(staging_dir)?.collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() != 1 {
        log::info!(
            "[STAGING] {} entries in {:?}, leaving it in place",
            entries.len(),
            staging_dir
        );
        return Ok(StagingOutcome::untouched(staging_dir, known_output));
    }

    let entry = entries.remove(0);
    let name = entry.file_name();
    let source = entry.path();
    let known = known_output.and_then(|k| KnownOutput::parse(k, staging_dir));

    if entry.file_type()?.is_dir() {
        let destination = downloads_root.join(&name);

        if !destination.exists() {
            fs::rename(&source, &destination)?;
            fs::remove_dir(staging_dir)?;
            log::info!("✅ [STAGING] Moved {:?} to {:?}", source, destination);

            let output_file = match known {
                Some(k) if k.top == name => Some(k.relocate(&destination, None, downloads_root)),
                _ => known_output.map(str::to_string),
            };
            return Ok(StagingOutcome {
                output_file,
                search_root: destination,
                moved_file: None,
            });
        }

        if !destination.is_dir() {
            log::warn!(
                "⚠️ [STAGING] {:?} exists and is not a directory, keeping {:?}",
                destination,
                staging_dir
            );
            return Ok(StagingOutcome::untouched(staging_dir, known_output));
        }

        let moved = merge_into(&source, &destination)?;
        fs::remove_dir(&source)?;
        fs::remove_dir(staging_dir)?;
        log::info!(
            "✅ [STAGING] Merged {} entries from {:?} into {:?}",
            moved.len(),
            source,
            destination
        );

        let output_file = match known {
            Some(k) if k.top == name => match k.rest.first() {
                Some(child) => {
                    let landed = moved.get(child).cloned().unwrap_or_else(|| child.clone());
                    Some(k.relocate(&destination, Some(landed), downloads_root))
                }
                None => Some(relative_to(&destination, downloads_root)),
            },
            _ => known_output.map(str::to_string),
        };
        return Ok(StagingOutcome {
            output_file,
            search_root: destination,
            moved_file: None,
        });
    }

    let destination = free_destination(downloads_root, &name, false)?;
    fs::rename(&source, &destination)?;
    fs::remove_dir(staging_dir)?;
    log::info!("✅ [STAGING] Moved {:?} to {:?}", source, destination);

    let output_file = match known {
        Some(k) if k.top == name && k.rest.is_empty() => {
            Some(relative_to(&destination, downloads_root))
        }
        _ => known_output.map(str::to_string),
    };
    Ok(StagingOutcome {
        output_file,
        search_root: downloads_root.to_path_buf(),
        moved_file: Some(destination),
    })
}

/// Moves every child of `source` into `destination`, returning original -> final names.
fn merge_into(source: &Path, destination: &Path) -> Result<HashMap<OsString, OsString>> {
    let mut moved = HashMap::new();

    for child in fs::read_dir(source)? {
        let child = child?;
        let name = child.file_name();
        let is_dir = child.file_type()?.is_dir();
        let target = free_destination(destination, &name, is_dir)?;

        fs::rename(child.path(), &target)?;
        if let Some(final_name) = target.file_name() {
            if final_name != name {
                log::info!("[STAGING] Renamed incoming {:?} to {:?}", name, final_name);
            }
            moved.insert(name, final_name.to_os_string());
        }
    }

    Ok(moved)
}

/// First path under `dir` for `name` that does not exist yet.
fn free_destination(dir: &Path, name: &OsString, is_dir: bool) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let name_path = Path::new(name);
    let (stem, extension) = match (is_dir, name_path.file_stem(), name_path.extension()) {
        (false, Some(stem), Some(ext)) => (
            stem.to_string_lossy().into_owned(),
            format!(".{}", ext.to_string_lossy()),
        ),
        _ => (name.to_string_lossy().into_owned(), String::new()),
    };

    (2..=MAX_COLLISION_SUFFIX)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| {
            AppError::Staging(format!("No free name for {:?} in {:?}", name, dir))
        })
}

fn relative_to(path: &Path, downloads_root: &Path) -> String {
    make_relative_path(&normalize_path(path), downloads_root)
}

/// A known output path that points inside the staging directory.
struct KnownOutput {
    top: OsString,
    rest: Vec<OsString>,
}

impl KnownOutput {
    fn parse(known: &str, staging_dir: &Path) -> Option<Self> {
        let staging_name = staging_dir.file_name()?;
        let mut parts = Path::new(known).components().filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_os_string()),
            _ => None,
        });

        if parts.next()?.as_os_str() != staging_name {
            return None;
        }
        let top = parts.next()?;
        Some(Self {
            top,
            rest: parts.collect(),
        })
    }

    /// Rebuilds the path under `new_top`, optionally renaming its first child.
    fn relocate(self, new_top: &Path, renamed_child: Option<OsString>, downloads_root: &Path) -> String {
        let mut path = new_top.to_path_buf();
        let mut rest = self.rest.into_iter();
        if let Some(child) = renamed_child {
            rest.next();
            path.push(child);
        }
        path.extend(rest);
        relative_to(&path, downloads_root)
    }
}
