// src/core/changelog.rs
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use super::changeset::Changeset;
use crate::error::Result;

pub const REPORT_TITLE: &str = "TABLEAU WORKBOOK COMPARISON SUMMARY";
pub const NO_CHANGES: &str = "No changes detected between the workbooks.";
const RULE_WIDTH: usize = 60;

/// The two snapshots a changeset was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparedPair {
    pub old_file: String,
    pub old_revision: String,
    pub new_file: String,
    pub new_revision: String,
}

impl ComparedPair {
    pub fn describe(&self) -> String {
        format!(
            "Compared: {} (revision {}) -> {} (revision {})",
            self.old_file, self.old_revision, self.new_file, self.new_revision
        )
    }
}

/// Formats changesets and prepends them to per-document changelog files
pub struct ChangelogWriter;

impl ChangelogWriter {
    /// Render a changeset as a plain-text report
    pub fn render(changeset: &Changeset, pair: Option<&ComparedPair>) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();

        out.push_str(&format!("{}\n{}\n", rule, REPORT_TITLE));
        if let Some(pair) = pair {
            out.push_str(&pair.describe());
            out.push('\n');
        }
        out.push_str(&format!("{}\n", rule));

        if changeset.is_empty() {
            out.push_str(&format!("{}\n", NO_CHANGES));
            return out;
        }

        for (kind, items) in changeset.iter() {
            out.push_str(&format!("\n{}:\n", kind.title()));
            for item in items {
                out.push_str(&format!("  {}: {}\n", kind.key(), item));
            }
        }

        out.push_str(&format!("\nTotal Changes: {}\n", changeset.total_changes()));
        out.push_str(&format!("{}\n", rule));
        out
    }

    /// Header line that opens every changelog entry
    pub fn entry_header(timestamp: NaiveDateTime) -> String {
        format!("=== Comparison on {} ===", timestamp.format("%Y-%m-%d %H:%M:%S"))
    }

    /// Prepend `text` under a timestamp header, keeping all existing content.
    ///
    /// The log is replaced through a sibling temp file and a rename, so a
    /// crash leaves either the old or the new log, never a truncated one.
    pub fn append(log_path: &Path, text: &str, timestamp: NaiveDateTime) -> Result<()> {
        let existing = match std::fs::read_to_string(log_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Creating new changelog file: {}", log_path.display());
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut content = String::with_capacity(text.len() + existing.len() + 64);
        content.push_str(&Self::entry_header(timestamp));
        content.push('\n');
        content.push_str(text.trim_end());
        content.push_str("\n\n");
        content.push_str(&existing);

        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut staged, content.as_bytes())?;
        staged.persist(log_path).map_err(|e| e.error)?;

        debug!("Changelog updated at: {}", log_path.display());
        Ok(())
    }

    /// Render and prepend a changeset; returns false when nothing was written.
    ///
    /// Empty changesets are never logged, and neither is a pair already
    /// recorded by the newest entry (a cycle interrupted after logging).
    pub fn record(
        log_path: &Path,
        changeset: &Changeset,
        pair: &ComparedPair,
        timestamp: NaiveDateTime,
    ) -> Result<bool> {
        if changeset.is_empty() {
            return Ok(false);
        }
        if Self::newest_entry_records(log_path, pair)? {
            info!(
                "Changelog already records {}; not writing it again",
                pair.describe()
            );
            return Ok(false);
        }

        let text = Self::render(changeset, Some(pair));
        Self::append(log_path, &text, timestamp)?;
        Ok(true)
    }

    fn newest_entry_records(log_path: &Path, pair: &ComparedPair) -> Result<bool> {
        let existing = match std::fs::read_to_string(log_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let marker = pair.describe();
        let newest_entry = existing
            .lines()
            .skip_while(|line| !line.starts_with("=== Comparison on "))
            .skip(1)
            .take_while(|line| !line.starts_with("=== Comparison on "));

        for line in newest_entry {
            if line == marker {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::changeset::{ChangeKind, ChangesetBuilder};
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    fn pair(new_revision: &str) -> ComparedPair {
        ComparedPair {
            old_file: "Sales_2024-02-28.twb".to_string(),
            old_revision: "5".to_string(),
            new_file: "Sales_2024-03-01.twb".to_string(),
            new_revision: new_revision.to_string(),
        }
    }

    fn sample_changes() -> Changeset {
        let mut builder = ChangesetBuilder::default();
        builder.push(ChangeKind::ParametersRemoved, "[Parameter 3]");
        builder.push(ChangeKind::WorksheetsAdded, "Regions");
        builder.build()
    }

    #[test]
    fn test_render_uses_fixed_kind_order() {
        let text = ChangelogWriter::render(&sample_changes(), None);

        let worksheets = text.find("Worksheets Added:").unwrap();
        let parameters = text.find("Parameters Removed:").unwrap();
        assert!(worksheets < parameters);
        assert!(text.contains("  worksheets_added: Regions"));
        assert!(text.contains("Total Changes: 2"));
        assert!(!text.contains("Dashboards"));
    }

    #[test]
    fn test_render_layout_with_pair() {
        let text = ChangelogWriter::render(&sample_changes(), Some(&pair("6")));
        let rule = "=".repeat(RULE_WIDTH);
        let expected = format!(
            "{rule}\n{title}\n{compared}\n{rule}\n\nWorksheets Added:\n  worksheets_added: Regions\n\nParameters Removed:\n  parameters_removed: [Parameter 3]\n\nTotal Changes: 2\n{rule}\n",
            rule = rule,
            title = REPORT_TITLE,
            compared = pair("6").describe(),
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_empty_changeset() {
        let text = ChangelogWriter::render(&Changeset::default(), None);
        assert!(text.contains(NO_CHANGES));
    }

    #[test]
    fn test_append_prepends_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("changelog.txt");

        ChangelogWriter::append(&log, "first entry", at(9)).unwrap();
        ChangelogWriter::append(&log, "second entry", at(10)).unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.starts_with("=== Comparison on 2024-03-01 10:30:00 ==="));
        let second = content.find("second entry").unwrap();
        let first = content.find("first entry").unwrap();
        assert!(second < first);
        assert!(content.contains("=== Comparison on 2024-03-01 09:30:00 ==="));
    }

    #[test]
    fn test_record_skips_empty_changeset() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("changelog.txt");

        let written = ChangelogWriter::record(&log, &Changeset::default(), &pair("6"), at(9)).unwrap();
        assert!(!written);
        assert!(!log.exists());
    }

    #[test]
    fn test_record_does_not_repeat_newest_pair() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("changelog.txt");
        let changes = sample_changes();

        assert!(ChangelogWriter::record(&log, &changes, &pair("6"), at(9)).unwrap());
        assert!(!ChangelogWriter::record(&log, &changes, &pair("6"), at(10)).unwrap());
        assert!(ChangelogWriter::record(&log, &changes, &pair("7"), at(11)).unwrap());

        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.matches("=== Comparison on").count(), 2);
    }
}
