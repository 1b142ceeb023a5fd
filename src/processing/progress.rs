use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid regex")
});
static PERCENTAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").expect("valid regex"));

const MAX_MESSAGE_CHARS: usize = 100;
const DOWNLOAD_FLOOR: u8 = 20;
const DOWNLOAD_STEP: u8 = 5;
const DOWNLOAD_CEILING: u8 = 70;

/// Stages audiobook-dl reports, in matching precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Authenticating,
    Downloading,
    Combining,
    Chapters,
    Saving,
    Finalizing,
}

impl Stage {
    fn classify(line_lower: &str) -> Option<Self> {
        const RULES: &[(Stage, &[&str])] = &[
            (Stage::Authenticating, &["authenticat", "login", "logging in"]),
            (Stage::Downloading, &["download"]),
            (Stage::Combining, &["combin", "merg", "concat"]),
            (Stage::Chapters, &["chapter"]),
            (Stage::Saving, &["saving", "save", "writing", "write"]),
            (Stage::Finalizing, &["complete", "finish", "done"]),
        ];

        RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| line_lower.contains(k)))
            .map(|(stage, _)| *stage)
    }

    fn message(self) -> &'static str {
        match self {
            Stage::Authenticating => "Authenticating with service...",
            Stage::Downloading => "Downloading audiobook files...",
            Stage::Combining => "Combining audio files...",
            Stage::Chapters => "Adding chapter information...",
            Stage::Saving => "Saving audiobook...",
            Stage::Finalizing => "Finalizing...",
        }
    }

    fn advance(self, current: u8) -> u8 {
        match self {
            Stage::Authenticating => 10,
            Stage::Downloading if current < DOWNLOAD_FLOOR => DOWNLOAD_FLOOR,
            Stage::Downloading if current < DOWNLOAD_CEILING => {
                (current + DOWNLOAD_STEP).min(DOWNLOAD_CEILING)
            }
            Stage::Downloading => current,
            Stage::Combining => 75,
            Stage::Chapters => 85,
            Stage::Saving => 90,
            Stage::Finalizing => 95,
        }
    }
}

/// Removes ANSI escape sequences (colors, cursor movement).
pub fn strip_ansi_codes(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Maps one output line and the current progress to `(progress, message)`.
///
/// A literal `NN%` in the line overrides whatever the keyword stage produced.
pub fn parse_progress_line(line: &str, current_progress: u8) -> (u8, String) {
    let line = strip_ansi_codes(line);
    let line = line.trim();
    let line_lower = line.to_lowercase();

    let (mut progress, message) = match Stage::classify(&line_lower) {
        Some(stage) => (stage.advance(current_progress), stage.message().to_string()),
        None if line.is_empty() => (current_progress, "Processing...".to_string()),
        None => (
            current_progress,
            line.chars().take(MAX_MESSAGE_CHARS).collect(),
        ),
    };

    if let Some(value) = PERCENTAGE
        .captures(line)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        progress = value.min(100) as u8;
    }

    (progress, message)
}

/// Summarizes captured stderr into a user-facing error text.
///
/// Blank and `WARNING:` lines are dropped, every `ERROR:` fragment becomes its
/// own entry, everything else is kept verbatim.
pub fn format_error_messages<S: AsRef<str>>(stderr_lines: &[S]) -> String {
    let mut formatted_errors = Vec::new();

    for line in stderr_lines {
        let line = line.as_ref().trim();
        if line.is_empty() || line.starts_with("WARNING:") {
            continue;
        }

        if line.contains("ERROR:") {
            formatted_errors.extend(
                line.split("ERROR:")
                    .skip(1)
                    .map(|part| format!("ERROR: {}", part.trim())),
            );
        } else {
            formatted_errors.push(line.to_string());
        }
    }

    if formatted_errors.is_empty() {
        "Unknown error".to_string()
    } else {
        formatted_errors.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_sequence_ramps_then_jumps() {
        let lines = [
            "Authenticating with Storytel",
            "Downloading part 1",
            "Downloading part 2",
            "Downloading part 3",
            "Combining files",
            "Adding chapter markers",
            "Saving audiobook",
            "Done",
        ];

        let mut progress = 0;
        let mut seen = Vec::new();
        for line in lines {
            progress = parse_progress_line(line, progress).0;
            seen.push(progress);
        }

        assert_eq!(seen, vec![10, 20, 25, 30, 75, 85, 90, 95]);
    }

    #[test]
    fn download_ramp_stops_at_ceiling() {
        assert_eq!(parse_progress_line("downloading", 68).0, 70);
        assert_eq!(parse_progress_line("downloading", 70).0, 70);
        assert_eq!(parse_progress_line("downloading", 80).0, 80);
    }

    #[test]
    fn explicit_percentage_overrides_stage() {
        let (progress, message) = parse_progress_line("Downloading: 42%", 0);
        assert_eq!(progress, 42);
        assert_eq!(message, "Downloading audiobook files...");

        assert_eq!(parse_progress_line("Combining 5%", 60).0, 5);
        assert_eq!(parse_progress_line("bogus 250%", 10).0, 100);
    }

    #[test]
    fn unmatched_lines_become_the_message() {
        let (progress, message) = parse_progress_line("Fetching book info", 33);
        assert_eq!(progress, 33);
        assert_eq!(message, "Fetching book info");

        let long = "x".repeat(250);
        assert_eq!(parse_progress_line(&long, 0).1.len(), 100);
        assert_eq!(parse_progress_line("", 7), (7, "Processing...".to_string()));
    }

    #[test]
    fn ansi_sequences_are_ignored_for_matching() {
        let (progress, message) = parse_progress_line("\x1b[32mDone\x1b[0m", 90);
        assert_eq!(progress, 95);
        assert_eq!(message, "Finalizing...");
        assert_eq!(strip_ansi_codes("\x1b[1;31mred\x1b[0m text"), "red text");
    }

    #[test]
    fn interpretation_is_pure() {
        let first = parse_progress_line("Downloading 12%", 40);
        let second = parse_progress_line("Downloading 12%", 40);
        assert_eq!(first, second);
    }

    #[test]
    fn error_formatting_drops_warnings_and_splits_errors() {
        let lines = vec![
            "WARNING: slow connection".to_string(),
            "".to_string(),
            "ERROR: disk full".to_string(),
            "Traceback follows".to_string(),
            "ERROR: first ERROR: second".to_string(),
        ];

        let formatted = format_error_messages(&lines);
        assert_eq!(
            formatted,
            "ERROR: disk full\nTraceback follows\nERROR: first\nERROR: second"
        );
        assert_eq!(formatted, format_error_messages(&lines));
        assert!(!formatted.contains("WARNING:"));
    }

    #[test]
    fn error_formatting_single_error_line() {
        assert_eq!(format_error_messages(&["ERROR: disk full"]), "ERROR: disk full");
    }

    #[test]
    fn error_formatting_defaults_to_unknown() {
        let empty: [&str; 0] = [];
        assert_eq!(format_error_messages(&empty), "Unknown error");
        assert_eq!(format_error_messages(&["WARNING: only this", "  "]), "Unknown error");
    }
}
