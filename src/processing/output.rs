use crate::processing::progress::strip_ansi_codes;
use crate::utils::{make_relative_path, normalize_path};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &[".m4b", ".mp3", ".m4a"];

/// Cues audiobook-dl (and the tools it wraps) print in front of a written file.
const SAVE_KEYWORDS: &[&str] = &[
    "saved to",
    "written to",
    "output:",
    "saved:",
    "file:",
    "downloading to",
    "writing",
    "created",
    "merged to",
    "combined to",
];

/// Per extension: Windows drive path, Unix absolute path, relative path.
static BARE_PATH_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    AUDIO_EXTENSIONS
        .iter()
        .map(|ext| {
            let ext_re = regex::escape(ext);
            let patterns = [
                format!(r#"(?i)([a-z]:[\\/](?:[^\\/\s<>:"|?*]+[\\/])*[^\\/\s<>:"|?*]+{})"#, ext_re),
                format!(r#"(?i)(/(?:[^/\s<>"|?*]+/)*[^/\s<>"|?*]+{})"#, ext_re),
                format!(r#"(?i)((?:[^\\/\s<>:"|?*]+[\\/])*[^\\/\s<>:"|?*]+{})"#, ext_re),
            ];
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p).expect("valid regex"))
                .collect();
            (*ext, compiled)
        })
        .collect()
});

fn has_audio_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Whether `path` names a file with one of [`AUDIO_EXTENSIONS`].
pub fn is_audio_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| has_audio_extension(&name.to_string_lossy()))
        .unwrap_or(false)
}

fn trim_path_text(text: &str) -> &str {
    text.trim_start_matches([' ', '\t', ':', '-'])
        .trim()
        .trim_matches(['\'', '"'])
}

/// Paths announced after a save cue, most recent line first.
pub fn keyword_candidates(output_lines: &[String], downloads_root: &Path) -> Vec<String> {
    output_lines
        .iter()
        .rev()
        .filter_map(|line| {
            let clean = strip_ansi_codes(line);
            let lower = clean.to_lowercase();
            SAVE_KEYWORDS.iter().find_map(|keyword| {
                // Lowercasing can shift byte offsets for non-ASCII text.
                let idx = lower.find(keyword)? + keyword.len();
                let rest = clean.get(idx..)?;
                let candidate = trim_path_text(rest);
                if has_audio_extension(candidate) {
                    log::debug!("[OUTPUT] Path after '{}': {}", keyword, candidate);
                    Some(make_relative_path(candidate, downloads_root))
                } else {
                    None
                }
            })
        })
        .collect()
}

/// Bare audio paths anywhere in a line, most recent line first.
pub fn bare_path_candidates(output_lines: &[String], downloads_root: &Path) -> Vec<String> {
    let mut candidates = Vec::new();

    for line in output_lines.iter().rev() {
        let clean = strip_ansi_codes(line);
        let lower = clean.to_lowercase();

        for (ext, patterns) in BARE_PATH_PATTERNS.iter() {
            if !lower.contains(ext) {
                continue;
            }
            if let Some(found) = patterns.iter().find_map(|re| re.captures(&clean)) {
                let path = found[1].trim_matches(['\'', '"']);
                log::debug!("[OUTPUT] Bare path for '{}': {}", ext, path);
                candidates.push(make_relative_path(path, downloads_root));
            }
        }
    }

    candidates
}

/// Finds the produced file from captured output, relative to `downloads_root`.
///
/// Only a candidate that exists on disk is ever returned.
pub fn find_output_file_in_lines(output_lines: &[String], downloads_root: &Path) -> Option<String> {
    let mut candidates = keyword_candidates(output_lines, downloads_root);
    if candidates.is_empty() {
        candidates = bare_path_candidates(output_lines, downloads_root);
    }

    for candidate in &candidates {
        let candidate_path = Path::new(candidate);
        let full_path = if candidate_path.is_absolute() {
            candidate_path.to_path_buf()
        } else {
            downloads_root.join(candidate_path)
        };

        if full_path.exists() {
            log::debug!("[OUTPUT] Confirmed existing file: {}", candidate);
            return Some(make_relative_path(&normalize_path(&full_path), downloads_root));
        }
    }

    if candidates.is_empty() {
        log::debug!("[OUTPUT] No output file paths found in command output");
    } else {
        log::warn!(
            "⚠️ [OUTPUT] Found {} potential paths but none exist on disk",
            candidates.len()
        );
    }
    None
}

/// Newest audio file under `search_dir` (or `downloads_root`) modified after `min_mtime`.
pub fn find_latest_audio_file(
    downloads_root: &Path,
    min_mtime: SystemTime,
    search_dir: Option<&Path>,
) -> Option<PathBuf> {
    let base = match search_dir {
        Some(dir) if dir.exists() => dir,
        _ => downloads_root,
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;

    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !has_audio_extension(&name) {
            continue;
        }

        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(modified) => modified,
            None => continue,
        };

        let floor = latest
            .as_ref()
            .map_or(min_mtime, |(newest, _)| (*newest).max(min_mtime));
        if modified > floor {
            latest = Some((modified, entry.into_path()));
        }
    }

    latest.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn audio_files_are_recognised_by_extension() {
        assert!(is_audio_file(Path::new("/d/Book (2).M4B")));
        assert!(is_audio_file(Path::new("chapter.mp3")));
        assert!(!is_audio_file(Path::new("/d/cover.jpg")));
        assert!(!is_audio_file(Path::new("/d/m4b")));
    }

    #[test]
    fn keyword_cue_resolves_absolute_path() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("Book").join("Book.m4b");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"audio").unwrap();

        let output = lines(&["Starting", &format!("Output: {}", file.display())]);
        assert_eq!(
            find_output_file_in_lines(&output, root.path()).as_deref(),
            Some("Book/Book.m4b")
        );
    }

    #[test]
    fn bare_path_is_used_without_a_cue() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("Story.mp3");
        fs::write(&file, b"audio").unwrap();

        let output = lines(&[&format!("{} 100 KiB", file.display())]);
        assert_eq!(
            find_output_file_in_lines(&output, root.path()).as_deref(),
            Some("Story.mp3")
        );
    }

    #[test]
    fn only_existing_candidates_are_returned() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("real.m4b"), b"audio").unwrap();

        // The most recent line names a file that was never written.
        let output = lines(&["Saved to: real.m4b", "Saved to: ghost.m4b"]);
        assert_eq!(
            find_output_file_in_lines(&output, root.path()).as_deref(),
            Some("real.m4b")
        );

        let missing = lines(&["Saved to: ghost.m4b"]);
        assert_eq!(find_output_file_in_lines(&missing, root.path()), None);
    }

    #[test]
    fn ansi_and_quotes_around_paths_with_spaces() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("My Book");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("My Book.m4b"), b"audio").unwrap();

        let output = lines(&["\x1b[32mSaved to: \"My Book/My Book.m4b\"\x1b[0m"]);
        assert_eq!(
            find_output_file_in_lines(&output, root.path()).as_deref(),
            Some("My Book/My Book.m4b")
        );
    }

    #[test]
    fn lines_without_audio_paths_resolve_to_nothing() {
        let root = TempDir::new().unwrap();
        let output = lines(&["Downloading 50%", "Saved to: cover.jpg"]);
        assert!(keyword_candidates(&output, root.path()).is_empty());
        assert!(bare_path_candidates(&output, root.path()).is_empty());
        assert_eq!(find_output_file_in_lines(&output, root.path()), None);
    }

    #[test]
    fn latest_file_respects_floor_and_search_dir() {
        let root = TempDir::new().unwrap();
        let staging = root.path().join("__task_1__");
        fs::create_dir_all(&staging).unwrap();

        let epoch = SystemTime::UNIX_EPOCH;
        let stale = root.path().join("old.m4b");
        let fresh = staging.join("new.m4b");
        fs::write(&stale, b"a").unwrap();
        fs::write(&fresh, b"b").unwrap();
        fs::write(staging.join("notes.txt"), b"c").unwrap();
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(epoch + Duration::from_secs(1_000))
            .unwrap();
        fs::File::options()
            .write(true)
            .open(&fresh)
            .unwrap()
            .set_modified(epoch + Duration::from_secs(5_000))
            .unwrap();

        let floor = epoch + Duration::from_secs(2_000);
        assert_eq!(find_latest_audio_file(root.path(), floor, None), Some(fresh.clone()));
        assert_eq!(
            find_latest_audio_file(root.path(), floor, Some(&staging)),
            Some(fresh)
        );

        let late_floor = epoch + Duration::from_secs(9_000);
        assert_eq!(find_latest_audio_file(root.path(), late_floor, None), None);
    }
}
