use super::{AudioMetadata, MetadataExtractor};
use crate::utils::{format_duration, format_file_size};
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;

/// Reads container tags, duration and size with `ffprobe`.
pub struct FfprobeExtractor {
    program: String,
}

impl Default for FfprobeExtractor {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl MetadataExtractor for FfprobeExtractor {
    async fn extract(&self, file_path: &Path) -> Option<AudioMetadata> {
        let output = Command::new(&self.program)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(file_path)
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "⚠️ [METADATA] {} not found - install FFmpeg to enable metadata extraction",
                    self.program
                );
                return None;
            }
            Err(e) => {
                log::error!("❌ [METADATA] Failed to run {}: {}", self.program, e);
                return None;
            }
        };

        if !output.status.success() || output.stdout.is_empty() {
            log::debug!(
                "[METADATA] {} gave no result for {:?} ({})",
                self.program,
                file_path,
                output.status
            );
            return None;
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Turns `ffprobe -show_format` JSON into a metadata record.
///
/// Returns `None` for malformed JSON, a missing `format` section, or a record
/// with no fields at all.
pub fn parse_ffprobe_output(json: &str) -> Option<AudioMetadata> {
    let data: Value = match serde_json::from_str(json) {
        Ok(data) => data,
        Err(e) => {
            log::error!("❌ [METADATA] Unparseable ffprobe output: {}", e);
            return None;
        }
    };

    let format = data.get("format")?;
    let tags = format.get("tags");
    let tag = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| tags?.get(*key)?.as_str())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    };

    let metadata = AudioMetadata {
        title: tag(&["title"]),
        author: tag(&["artist", "album_artist"]),
        narrator: tag(&["composer", "PERFORMER"]),
        year: tag(&["date", "year"]),
        duration: number_field(format, "duration").map(format_duration),
        size: number_field(format, "size").map(|bytes| format_file_size(bytes as u64)),
    };

    metadata.non_empty()
}

/// ffprobe reports numbers as strings; accept either form.
fn number_field(format: &Value, key: &str) -> Option<f64> {
    match format.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_probe_is_mapped_with_fallback_tags() {
        let json = r#"{
            "format": {
                "duration": "3661.000000",
                "size": "1048576",
                "tags": {
                    "title": "The Book",
                    "album_artist": "Jane Doe",
                    "PERFORMER": "John Reader",
                    "year": "2021"
                }
            }
        }"#;

        let metadata = parse_ffprobe_output(json).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("The Book"));
        assert_eq!(metadata.author.as_deref(), Some("Jane Doe"));
        assert_eq!(metadata.narrator.as_deref(), Some("John Reader"));
        assert_eq!(metadata.year.as_deref(), Some("2021"));
        assert_eq!(metadata.duration.as_deref(), Some("1h 1m"));
        assert_eq!(metadata.size.as_deref(), Some("1.0 MB"));
    }

    #[test]
    fn primary_tag_wins_over_fallback() {
        let json = r#"{"format": {"tags": {"artist": "A", "album_artist": "B", "composer": "N"}}}"#;
        let metadata = parse_ffprobe_output(json).unwrap();
        assert_eq!(metadata.author.as_deref(), Some("A"));
        assert_eq!(metadata.narrator.as_deref(), Some("N"));
    }

    #[test]
    fn tagless_probe_keeps_duration_and_size() {
        let json = r#"{"format": {"duration": 7200.5, "size": 2048}}"#;
        let metadata = parse_ffprobe_output(json).unwrap();
        assert_eq!(metadata.duration.as_deref(), Some("2h 0m"));
        assert_eq!(metadata.size.as_deref(), Some("2.0 KB"));
        assert!(metadata.title.is_none());
        assert!(metadata.author.is_none());
    }

    #[test]
    fn missing_format_or_empty_record_is_none() {
        assert_eq!(parse_ffprobe_output(r#"{"streams": []}"#), None);
        assert_eq!(parse_ffprobe_output(r#"{"format": {"tags": {}}}"#), None);
        assert_eq!(parse_ffprobe_output("not json"), None);
    }

    #[tokio::test]
    async fn missing_probe_binary_yields_none() {
        let extractor = FfprobeExtractor::new("definitely-not-a-real-ffprobe-binary");
        assert_eq!(extractor.extract(Path::new("/nonexistent.m4b")).await, None);
    }
}
