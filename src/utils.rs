use crate::errors::Result;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]+\}").expect("valid regex"));

fn is_reserved(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Sanitizes literal template text while keeping spaces and separators like " - ".
pub fn sanitize_template_literal(literal: &str) -> String {
    literal
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if is_reserved(c) { '_' } else { c })
        .collect()
}

/// Sanitizes the literal parts of an output template.
///
/// `{placeholder}` segments are expanded by audiobook-dl itself and are passed
/// through untouched.
pub fn sanitize_template(template: &str) -> String {
    let mut sanitized = String::with_capacity(template.len());
    let mut last = 0;
    for placeholder in PLACEHOLDER.find_iter(template) {
        sanitized.push_str(&sanitize_template_literal(&template[last..placeholder.start()]));
        sanitized.push_str(placeholder.as_str());
        last = placeholder.end();
    }
    sanitized.push_str(&sanitize_template_literal(&template[last..]));
    sanitized
}

/// Converts a path to forward slashes.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// Makes `file_path` relative to `base_dir` when it lives underneath it.
///
/// Paths outside the base are returned normalized but otherwise unchanged.
pub fn make_relative_path(file_path: &str, base_dir: &Path) -> String {
    let file_path = normalize_path(file_path);
    let base = normalize_path(base_dir);
    let base = base.trim_end_matches('/');

    match file_path.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            rest.trim_start_matches('/').to_string()
        }
        _ => file_path,
    }
}

/// Formats a byte count for display (B, KB, MB, GB).
pub fn format_file_size(size_bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = size_bytes as f64;
    if size < KB {
        format!("{} B", size_bytes)
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else if size < GB {
        format!("{:.1} MB", size / MB)
    } else {
        format!("{:.2} GB", size / GB)
    }
}

/// Formats seconds as `"Xh Ym"`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    format!("{}h {}m", hours, minutes)
}

/// Generates a unique ID for downloads
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_literal_keeps_spaces_and_hyphen() {
        assert_eq!(sanitize_template_literal(" - "), " - ");
        assert_eq!(sanitize_template_literal("a:b"), "a_b");
        assert_eq!(sanitize_template_literal("x\u{0}y"), "xy");
    }

    #[test]
    fn template_placeholders_pass_through() {
        assert_eq!(sanitize_template("{title}"), "{title}");
        assert_eq!(
            sanitize_template("{author}: {title}?"),
            "{author}_ {title}_"
        );
        assert_eq!(sanitize_template("{series}/{title}"), "{series}_{title}");
    }

    #[test]
    fn relative_path_strips_base_only_on_component_boundary() {
        let base = Path::new("/data/downloads");
        assert_eq!(
            make_relative_path("/data/downloads/Book/a.m4b", base),
            "Book/a.m4b"
        );
        assert_eq!(
            make_relative_path("/data/downloads2/a.m4b", base),
            "/data/downloads2/a.m4b"
        );
        assert_eq!(make_relative_path("C:\\x\\a.mp3", base), "C:/x/a.mp3");
    }

    #[test]
    fn file_size_tiers() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(1_048_576), "1.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn duration_hours_and_minutes() {
        assert_eq!(format_duration(3661.0), "1h 1m");
        assert_eq!(format_duration(59.9), "0h 0m");
        assert_eq!(format_duration(36_000.0), "10h 0m");
    }
}
