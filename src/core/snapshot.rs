// src/core/snapshot.rs
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// Infix marking a snapshot whose retention has not been resolved yet
pub const PENDING_MARKER: &str = "pending";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Replace every character outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9_\-]").expect("Invalid name sanitizer regex")
    });
    unsafe_chars.replace_all(name, "_").into_owned()
}

/// Decoded form of `{base}_{date}.{ext}`, `{base}_{date}.{seq}.{ext}` or
/// `{base}_{date}.pending.{ext}`.
///
/// `sequence` tells apart settled snapshots that share a capture date; the
/// first one of a date carries no sequence in its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotName {
    pub base: String,
    pub capture_date: NaiveDate,
    pub sequence: u32,
    pub pending: bool,
}

impl SnapshotName {
    /// Name for a freshly captured, not yet resolved snapshot
    pub fn pending(base: &str, capture_date: NaiveDate) -> Self {
        Self {
            base: base.to_string(),
            capture_date,
            sequence: 0,
            pending: true,
        }
    }

    pub fn settled(&self) -> Self {
        Self {
            pending: false,
            ..self.clone()
        }
    }

    /// The settled name taking slot `sequence` of the same capture date
    pub fn with_sequence(&self, sequence: u32) -> Self {
        Self {
            sequence,
            ..self.clone()
        }
    }

    pub fn file_name(&self, ext: &str) -> String {
        let date = self.capture_date.format(DATE_FORMAT);
        if self.pending {
            format!("{}_{}.{}.{}", self.base, date, PENDING_MARKER, ext)
        } else if self.sequence > 0 {
            format!("{}_{}.{}.{}", self.base, date, self.sequence, ext)
        } else {
            format!("{}_{}.{}", self.base, date, ext)
        }
    }

    /// Decode a file name belonging to `base`.
    ///
    /// `None` means the file is not a snapshot of this document;
    /// `Some(Err(..))` means it is, but its date suffix is unreadable.
    pub fn parse(file_name: &str, base: &str, ext: &str) -> Option<std::result::Result<Self, String>> {
        let rest = file_name.strip_prefix(base)?.strip_prefix('_')?;
        let stem = rest.strip_suffix(ext)?.strip_suffix('.')?;

        let (date_part, qualifier) = match stem.split_once('.') {
            Some((date_part, qualifier)) => (date_part, Some(qualifier)),
            None => (stem, None),
        };
        let (sequence, pending) = match qualifier {
            None => (0, false),
            Some(PENDING_MARKER) => (0, true),
            Some(digits) => match digits.parse::<u32>() {
                Ok(sequence) => (sequence, false),
                Err(_) => return Some(Err(format!("invalid sequence '{}'", digits))),
            },
        };

        let normalized = date_part.replace('_', "-");
        Some(
            NaiveDate::parse_from_str(&normalized, DATE_FORMAT)
                .map(|capture_date| Self {
                    base: base.to_string(),
                    capture_date,
                    sequence,
                    pending,
                })
                .map_err(|e| format!("invalid date '{}': {}", date_part, e)),
        )
    }
}

/// A snapshot file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub name: SnapshotName,
}

impl SnapshotFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// List the snapshots of one document, newest first.
///
/// Files whose date suffix does not parse are skipped with a warning. On equal
/// dates a pending snapshot sorts newer than a settled one, and a higher
/// sequence sorts newer than a lower one.
pub fn inventory(dir: &Path, base: &str, ext: &str) -> Result<Vec<SnapshotFile>> {
    let mut snapshots = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir loop"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        match SnapshotName::parse(&file_name, base, ext) {
            Some(Ok(name)) => snapshots.push(SnapshotFile {
                path: entry.path().to_path_buf(),
                name,
            }),
            Some(Err(reason)) => {
                warn!("Skipping file with invalid date format {}: {}", file_name, reason);
            }
            None => {}
        }
    }

    snapshots.sort_by(|a, b| {
        (b.name.capture_date, b.name.pending, b.name.sequence, b.file_name())
            .cmp(&(a.name.capture_date, a.name.pending, a.name.sequence, a.file_name()))
    });

    debug!("Found {} snapshot(s) of {} in {}", snapshots.len(), base, dir.display());
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Sales & Ops: Q1"), "Sales___Ops__Q1");
        assert_eq!(sanitize_name("my-report_v2"), "my-report_v2");
    }

    #[test]
    fn test_file_name_round_trip() {
        let name = SnapshotName::pending("Sales", date(2024, 1, 5));
        assert_eq!(name.file_name("twb"), "Sales_2024-01-05.pending.twb");
        assert_eq!(name.settled().file_name("twb"), "Sales_2024-01-05.twb");

        let parsed = SnapshotName::parse("Sales_2024-01-05.pending.twb", "Sales", "twb")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_same_date_sequence_names() {
        let name = SnapshotName::pending("Sales", date(2024, 1, 5)).settled().with_sequence(2);
        assert_eq!(name.file_name("twb"), "Sales_2024-01-05.2.twb");

        let parsed = SnapshotName::parse("Sales_2024-01-05.2.twb", "Sales", "twb")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, name);
        assert!(matches!(
            SnapshotName::parse("Sales_2024-01-05.copy.twb", "Sales", "twb"),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_parse_accepts_underscore_dates() {
        let parsed = SnapshotName::parse("Sales_2024_01_05.twb", "Sales", "twb")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.capture_date, date(2024, 1, 5));
        assert!(!parsed.pending);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(SnapshotName::parse("changelog.txt", "Sales", "twb").is_none());
        assert!(SnapshotName::parse("Sales_2024-01-05.twbx", "Sales", "twb").is_none());
        assert!(matches!(
            SnapshotName::parse("Sales_latest.twb", "Sales", "twb"),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_inventory_orders_newest_first_and_skips_bad_dates() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb").write_str("<workbook/>").unwrap();
        temp.child("Sales_2024-01-03.twb").write_str("<workbook/>").unwrap();
        temp.child("Sales_2024-01-03.pending.twb").write_str("<workbook/>").unwrap();
        temp.child("Sales_2024-01-03.1.twb").write_str("<workbook/>").unwrap();
        temp.child("Sales_2024-01-02.twb").write_str("<workbook/>").unwrap();
        temp.child("Sales_backup.twb").write_str("<workbook/>").unwrap();
        temp.child("changelog.txt").write_str("").unwrap();

        let found = inventory(temp.path(), "Sales", "twb").unwrap();
        let names: Vec<_> = found.iter().map(SnapshotFile::file_name).collect();
        assert_eq!(
            names,
            vec![
                "Sales_2024-01-03.pending.twb",
                "Sales_2024-01-03.1.twb",
                "Sales_2024-01-03.twb",
                "Sales_2024-01-02.twb",
                "Sales_2024-01-01.twb",
            ]
        );
    }
}
