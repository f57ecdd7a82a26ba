/*!
 * Parsers for the copier's line-oriented output
 *
 * Two grammars share this file: the list-only enumeration format consumed by
 * the profiler, and the copy-mode progress format consumed while a chunk
 * runs. Both are parsed token-wise; unknown lines are ignored rather than
 * rejected, since copier versions differ in their decorative output.
 */

use crate::core::paths;

/// One entry from a list-only enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// A file with its size; the path may be relative to the scan root or
    /// absolute, depending on the copier's format vintage
    File { size: u64, path: String },
    /// A directory header; the path is absolute
    Dir { path: String },
}

/// Parse one line of list-only output.
///
/// Recognized forms:
/// - `New File <size-in-bytes> <path>`
/// - `New Dir <count> <absolute-path>`
/// - legacy `<size> <path>` where a trailing backslash marks a directory
///
/// The tagged forms take precedence: a `New File` line is a file even if its
/// path carries a trailing separator (the separator is trimmed). The
/// trailing-separator heuristic applies only to untagged legacy lines.
/// Anything else returns `None`.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = strip_tag(trimmed, "New File") {
        let (size, path) = split_size_and_path(rest)?;
        let path = path.trim_end_matches(paths::SEP);
        if path.is_empty() {
            return None;
        }
        return Some(ListEntry::File {
            size,
            path: path.to_string(),
        });
    }

    if let Some(rest) = strip_tag(trimmed, "New Dir") {
        let (_count, path) = split_size_and_path(rest)?;
        let path = path.trim_end_matches(paths::SEP);
        if path.is_empty() {
            return None;
        }
        return Some(ListEntry::Dir {
            path: path.to_string(),
        });
    }

    // Legacy format: "<size> <path>", trailing separator denotes a directory
    let (size, path) = split_size_and_path(trimmed)?;
    if path.ends_with(paths::SEP) {
        let path = path.trim_end_matches(paths::SEP);
        if path.is_empty() {
            return None;
        }
        Some(ListEntry::Dir {
            path: path.to_string(),
        })
    } else {
        Some(ListEntry::File {
            size,
            path: path.to_string(),
        })
    }
}

fn strip_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(tag)?;
    // The tag must be its own token, not a path that merely starts with it
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Split "<number> <remainder>" keeping spaces inside the remainder
fn split_size_and_path(s: &str) -> Option<(u64, &str)> {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace)?;
    let size: u64 = s[..end].parse().ok()?;
    let path = s[end..].trim_start();
    if path.is_empty() {
        return None;
    }
    Some((size, path))
}

/// Incremental parser for copy-mode progress output.
///
/// Tracks per-file percentages and byte totals so the orchestrator can read
/// a live bytes-copied estimate while the subprocess runs. Counters are
/// finalized by `finish`.
#[derive(Debug, Default)]
pub struct ProgressParser {
    completed_bytes: u64,
    files_copied: u64,
    files_skipped: u64,
    files_failed: u64,
    current_size: Option<u64>,
    current_pct: f64,
    last_error: Option<String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line; returns the updated bytes-copied estimate when
    /// this line changed it.
    pub fn feed(&mut self, line: &str) -> Option<u64> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(rest) = strip_tag(trimmed, "New File") {
            self.roll_current_file();
            if let Some((size, _path)) = split_size_and_path(rest) {
                self.current_size = Some(size);
                self.current_pct = 0.0;
            }
            return Some(self.bytes_copied());
        }

        if let Some(rest) = strip_tag(trimmed, "Same").or_else(|| strip_tag(trimmed, "Skipped")) {
            let _ = rest;
            self.files_skipped += 1;
            return None;
        }

        if let Some(rest) = strip_tag(trimmed, "ERROR") {
            self.files_failed += 1;
            self.last_error = Some(rest.to_string());
            return None;
        }

        if let Some(pct) = parse_percentage(trimmed) {
            if self.current_size.is_some() && pct >= self.current_pct {
                self.current_pct = pct;
                return Some(self.bytes_copied());
            }
            return None;
        }

        None
    }

    /// Live estimate: finished files plus the tracked fraction of the
    /// in-flight one.
    pub fn bytes_copied(&self) -> u64 {
        let in_flight = self
            .current_size
            .map(|size| (size as f64 * self.current_pct / 100.0) as u64)
            .unwrap_or(0);
        self.completed_bytes + in_flight
    }

    pub fn files_copied(&self) -> u64 {
        self.files_copied
    }

    pub fn files_skipped(&self) -> u64 {
        self.files_skipped
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Close the stream: the in-flight file is folded into the totals at its
    /// observed percentage.
    pub fn finish(&mut self) {
        self.roll_current_file();
    }

    fn roll_current_file(&mut self) {
        if let Some(size) = self.current_size.take() {
            let fraction = (size as f64 * self.current_pct / 100.0) as u64;
            self.completed_bytes += fraction.min(size);
            if self.current_pct >= 100.0 {
                self.files_copied += 1;
            }
        }
        self.current_pct = 0.0;
    }
}

/// Parse a bare percentage line like "45.2%" or "100%"
fn parse_percentage(s: &str) -> Option<f64> {
    let body = s.strip_suffix('%')?.trim();
    let pct: f64 = body.parse().ok()?;
    if (0.0..=100.0).contains(&pct) {
        Some(pct)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_file_line() {
        let entry = parse_list_line("New File 2048 Data\\report.pdf").unwrap();
        assert_eq!(
            entry,
            ListEntry::File {
                size: 2048,
                path: "Data\\report.pdf".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_tagged_dir_line() {
        let entry = parse_list_line("New Dir 17 C:\\data\\projects").unwrap();
        assert_eq!(
            entry,
            ListEntry::Dir {
                path: "C:\\data\\projects".to_string(),
            }
        );
    }

    #[test]
    fn test_tag_beats_trailing_separator() {
        // A tagged file line stays a file even with a trailing backslash
        let entry = parse_list_line("New File 512 Data\\odd.name\\").unwrap();
        assert_eq!(
            entry,
            ListEntry::File {
                size: 512,
                path: "Data\\odd.name".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_legacy_lines() {
        assert_eq!(
            parse_list_line("4096 docs\\manual.txt").unwrap(),
            ListEntry::File {
                size: 4096,
                path: "docs\\manual.txt".to_string(),
            }
        );
        assert_eq!(
            parse_list_line("0 C:\\data\\docs\\").unwrap(),
            ListEntry::Dir {
                path: "C:\\data\\docs".to_string(),
            }
        );
    }

    #[test]
    fn test_path_with_spaces() {
        let entry = parse_list_line("New File 77 Q4 Reports\\summary final.xlsx").unwrap();
        assert_eq!(
            entry,
            ListEntry::File {
                size: 77,
                path: "Q4 Reports\\summary final.xlsx".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_lines_ignored() {
        assert_eq!(parse_list_line(""), None);
        assert_eq!(parse_list_line("-----------------------------"), None);
        assert_eq!(parse_list_line("Total Copied Skipped"), None);
        assert_eq!(parse_list_line("New File abc notasize"), None);
    }

    #[test]
    fn test_progress_single_file() {
        let mut parser = ProgressParser::new();
        parser.feed("New File 1000 a.bin");
        assert_eq!(parser.bytes_copied(), 0);

        let mid = parser.feed("50.0%").unwrap();
        assert_eq!(mid, 500);

        parser.feed("100%");
        assert_eq!(parser.bytes_copied(), 1000);

        parser.finish();
        assert_eq!(parser.bytes_copied(), 1000);
        assert_eq!(parser.files_copied(), 1);
    }

    #[test]
    fn test_progress_rolls_between_files() {
        let mut parser = ProgressParser::new();
        parser.feed("New File 1000 a.bin");
        parser.feed("100%");
        parser.feed("New File 500 b.bin");
        parser.feed("40.0%");
        assert_eq!(parser.bytes_copied(), 1200);

        parser.finish();
        assert_eq!(parser.files_copied(), 1);
        assert_eq!(parser.bytes_copied(), 1200);
    }

    #[test]
    fn test_progress_skip_and_error_counters() {
        let mut parser = ProgressParser::new();
        parser.feed("Same 123 unchanged.txt");
        parser.feed("ERROR 5 (0x00000005) Access is denied.");
        assert_eq!(parser.files_skipped(), 1);
        assert_eq!(parser.files_failed(), 1);
        assert_eq!(
            parser.last_error().unwrap(),
            "5 (0x00000005) Access is denied."
        );
    }

    #[test]
    fn test_percentage_never_regresses() {
        let mut parser = ProgressParser::new();
        parser.feed("New File 1000 a.bin");
        parser.feed("80.0%");
        // Out-of-order or decorative percentages must not roll back the estimate
        assert_eq!(parser.feed("10.0%"), None);
        assert_eq!(parser.bytes_copied(), 800);
    }
}
