// src/core/retention.rs
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::changelog::{ChangelogWriter, ComparedPair};
use super::changeset::Changeset;
use super::comparator;
use super::snapshot::{inventory, SnapshotFile};
use super::workbook::{read_revision, WorkbookTree};
use crate::config::RetentionConfig;
use crate::error::Result;

/// A snapshot together with the server revision it captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub file: SnapshotFile,
    pub revision: String,
}

/// One filesystem step; each maps onto a single syscall
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionAction {
    Delete(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

/// Actions to apply, in order: newest snapshot first, then older snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub actions: Vec<RetentionAction>,
}

impl RetentionPlan {
    pub fn deletes(&self) -> impl Iterator<Item = &PathBuf> + '_ {
        self.actions.iter().filter_map(|action| match action {
            RetentionAction::Delete(path) => Some(path),
            RetentionAction::Rename { .. } => None,
        })
    }
}

/// Decide what happens to every snapshot of one document.
///
/// `ordered` is newest first. The newest snapshot is deleted when it shares
/// its revision with the second newest and no change was recorded; otherwise
/// it is settled. Among the older snapshots, each run of consecutive equal
/// revisions keeps at most `max_per_revision` members: its newest ones plus
/// its oldest, which marks the revision boundary and is never pruned.
///
/// `occupied` lists files on disk that are not in `ordered` (snapshots
/// excluded from the cycle). Settling never renames onto an existing file.
pub fn plan_retention(
    ordered: &[SnapshotMeta],
    changes_recorded: bool,
    max_per_revision: usize,
    ext: &str,
    occupied: &[PathBuf],
) -> RetentionPlan {
    let mut plan = RetentionPlan::default();
    let Some((newest, older)) = ordered.split_first() else {
        return plan;
    };

    match older.first() {
        Some(second) if !changes_recorded && second.revision == newest.revision => {
            plan.actions.push(RetentionAction::Delete(newest.file.path.clone()));
        }
        _ => {
            if let Some(action) = resolve_pending(newest, ordered, occupied, ext) {
                plan.actions.push(action);
            }
        }
    }

    let keep_newest = max_per_revision.max(1) - 1;
    for run in revision_runs(older) {
        let (boundary, rest) = match run.split_last() {
            Some(split) => split,
            None => continue,
        };
        for (index, meta) in rest.iter().enumerate() {
            if index >= keep_newest {
                plan.actions.push(RetentionAction::Delete(meta.file.path.clone()));
            } else if meta.file.name.pending {
                plan.actions.extend(resolve_pending(meta, ordered, occupied, ext));
            }
        }
        if boundary.file.name.pending {
            plan.actions.extend(resolve_pending(boundary, ordered, occupied, ext));
        }
    }

    plan
}

/// Split newest-first snapshots into runs of consecutive equal revisions
fn revision_runs(ordered: &[SnapshotMeta]) -> Vec<&[SnapshotMeta]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for index in 1..=ordered.len() {
        if index == ordered.len() || ordered[index].revision != ordered[start].revision {
            runs.push(&ordered[start..index]);
            start = index;
        }
    }
    runs
}

/// Where a snapshot ends up once settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Already settled
    InPlace,
    /// Rename to a free settled name
    Rename(PathBuf),
    /// A settled file of the same revision already holds the name
    Duplicate(PathBuf),
}

/// Find the settled name for `meta`.
///
/// The plain `{base}_{date}` name is tried first, then `{base}_{date}.1`,
/// `.2` and so on, skipping names held by a different revision or by a file
/// outside the cycle.
pub fn settlement(
    meta: &SnapshotMeta,
    ordered: &[SnapshotMeta],
    occupied: &[PathBuf],
    ext: &str,
) -> Settlement {
    if !meta.file.name.pending {
        return Settlement::InPlace;
    }

    let settled = meta.file.name.settled();
    let mut sequence = 0;
    loop {
        let target = sibling(meta, &settled.with_sequence(sequence).file_name(ext));
        match ordered.iter().find(|other| other.file.path == target) {
            Some(existing) if existing.revision == meta.revision => {
                return Settlement::Duplicate(target);
            }
            Some(_) => {}
            None if occupied.contains(&target) => {}
            None => return Settlement::Rename(target),
        }
        sequence += 1;
    }
}

fn sibling(meta: &SnapshotMeta, file_name: &str) -> PathBuf {
    meta.file
        .path
        .parent()
        .map(|dir| dir.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

fn resolve_pending(
    meta: &SnapshotMeta,
    ordered: &[SnapshotMeta],
    occupied: &[PathBuf],
    ext: &str,
) -> Option<RetentionAction> {
    match settlement(meta, ordered, occupied, ext) {
        Settlement::InPlace => None,
        Settlement::Rename(to) => Some(RetentionAction::Rename {
            from: meta.file.path.clone(),
            to,
        }),
        Settlement::Duplicate(existing) => {
            debug!(
                "{} duplicates {}, dropping it",
                meta.file.path.display(),
                existing.display()
            );
            Some(RetentionAction::Delete(meta.file.path.clone()))
        }
    }
}

/// File name a snapshot will carry after this cycle
fn final_file_name(
    meta: &SnapshotMeta,
    ordered: &[SnapshotMeta],
    occupied: &[PathBuf],
    ext: &str,
) -> String {
    match settlement(meta, ordered, occupied, ext) {
        Settlement::InPlace => meta.file.file_name(),
        Settlement::Rename(path) | Settlement::Duplicate(path) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Apply a plan; stops at the first failure
pub fn execute_plan(plan: &RetentionPlan) -> Result<()> {
    for action in &plan.actions {
        match action {
            RetentionAction::Delete(path) => {
                std::fs::remove_file(path)?;
                info!("Deleted redundant snapshot: {}", path.display());
            }
            RetentionAction::Rename { from, to } => {
                if to.exists() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("refusing to settle {} onto {}", from.display(), to.display()),
                    )
                    .into());
                }
                std::fs::rename(from, to)?;
                info!("Settled snapshot {} as {}", from.display(), to.display());
            }
        }
    }
    Ok(())
}

/// What one retention cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub snapshots_considered: usize,
    pub changeset: Option<Changeset>,
    pub changelog_written: bool,
    pub plan: RetentionPlan,
}

impl CycleOutcome {
    pub fn deleted_count(&self) -> usize {
        self.plan.deletes().count()
    }
}

/// Runs the per-document retention cycle over a snapshot directory
pub struct RetentionManager {
    max_copies_per_revision: usize,
    extension: String,
    changelog_file: String,
}

impl RetentionManager {
    pub fn new(config: &RetentionConfig) -> Self {
        Self {
            max_copies_per_revision: config.max_copies_per_revision,
            extension: config.document_extension.clone(),
            changelog_file: config.changelog_file.clone(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn changelog_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.changelog_file)
    }

    /// Inventory, compare and prune the snapshots of `base` in `dir`
    pub fn run_cycle(&self, dir: &Path, base: &str) -> Result<CycleOutcome> {
        let (ordered, excluded) = self.load_metadata(inventory(dir, base, &self.extension)?)?;
        let mut outcome = CycleOutcome {
            snapshots_considered: ordered.len(),
            ..CycleOutcome::default()
        };

        if ordered.len() < 2 {
            info!(
                "Skipping comparison: only {} snapshot(s) of {} in {}",
                ordered.len(),
                base,
                dir.display()
            );
            outcome.plan = plan_retention(
                &ordered,
                false,
                self.max_copies_per_revision,
                &self.extension,
                &excluded,
            );
            execute_plan(&outcome.plan)?;
            return Ok(outcome);
        }

        let newest = &ordered[0];
        let second = &ordered[1];
        let mut changes_recorded = false;

        if newest.revision == second.revision {
            info!(
                "Skipping comparison: no revision change between {} and {} (rev {})",
                second.file.file_name(),
                newest.file.file_name(),
                newest.revision
            );
        } else {
            let pair = ComparedPair {
                old_file: final_file_name(second, &ordered, &excluded, &self.extension),
                old_revision: second.revision.clone(),
                new_file: final_file_name(newest, &ordered, &excluded, &self.extension),
                new_revision: newest.revision.clone(),
            };
            info!("Comparing workbooks due to revision change: {}", pair.describe());

            let old_tree = WorkbookTree::from_path(&second.file.path)?;
            let new_tree = WorkbookTree::from_path(&newest.file.path)?;
            let changeset = comparator::compare(&old_tree, &new_tree);

            if changeset.is_empty() {
                info!(
                    "Revision changed from {} to {} but no tracked differences were found",
                    second.revision, newest.revision
                );
            } else {
                changes_recorded = true;
                let now = chrono::Local::now().naive_local();
                outcome.changelog_written =
                    ChangelogWriter::record(&self.changelog_path(dir), &changeset, &pair, now)?;
            }
            outcome.changeset = Some(changeset);
        }

        outcome.plan = plan_retention(
            &ordered,
            changes_recorded,
            self.max_copies_per_revision,
            &self.extension,
            &excluded,
        );
        debug!("Retention plan for {}: {:?}", base, outcome.plan);
        execute_plan(&outcome.plan)?;

        Ok(outcome)
    }

    /// Attach revisions; snapshots without one come back as excluded paths
    fn load_metadata(&self, files: Vec<SnapshotFile>) -> Result<(Vec<SnapshotMeta>, Vec<PathBuf>)> {
        let mut metas = Vec::with_capacity(files.len());
        let mut excluded = Vec::new();
        for file in files {
            match read_revision(&file.path) {
                Ok(revision) => metas.push(SnapshotMeta { file, revision }),
                Err(e) if e.is_metadata_missing() => {
                    warn!("Excluding snapshot from retention: {}", e);
                    excluded.push(file.path);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((metas, excluded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::SnapshotName;
    use assert_fs::prelude::*;
    use chrono::NaiveDate;
    use predicates::prelude::*;

    fn meta(day: u32, revision: &str, pending: bool) -> SnapshotMeta {
        let name = SnapshotName {
            base: "Sales".to_string(),
            capture_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            sequence: 0,
            pending,
        };
        SnapshotMeta {
            file: SnapshotFile {
                path: PathBuf::from("/data").join(name.file_name("twb")),
                name,
            },
            revision: revision.to_string(),
        }
    }

    fn workbook(revision: &str, worksheets: &[&str], extra: &str) -> String {
        let sheets: String = worksheets
            .iter()
            .map(|name| format!("<worksheet name='{}' />", name))
            .collect();
        format!(
            "<?xml version='1.0' encoding='utf-8' ?>\n<workbook {}>\n<repository-location id='Sales' revision='{}' />\n<worksheets>{}</worksheets>\n</workbook>\n",
            extra, revision, sheets
        )
    }

    fn manager() -> RetentionManager {
        RetentionManager::new(&RetentionConfig::default())
    }

    #[test]
    fn test_plan_deletes_newest_with_same_revision() {
        let ordered = vec![meta(3, "5", true), meta(2, "5", false)];
        let plan = plan_retention(&ordered, false, 5, "twb", &[]);
        assert_eq!(
            plan.actions,
            vec![RetentionAction::Delete(ordered[0].file.path.clone())]
        );
    }

    #[test]
    fn test_plan_settles_newest_with_new_revision() {
        let ordered = vec![meta(3, "6", true), meta(2, "5", false)];
        let plan = plan_retention(&ordered, true, 5, "twb", &[]);
        assert_eq!(
            plan.actions,
            vec![RetentionAction::Rename {
                from: PathBuf::from("/data/Sales_2024-01-03.pending.twb"),
                to: PathBuf::from("/data/Sales_2024-01-03.twb"),
            }]
        );
    }

    #[test]
    fn test_plan_keeps_newest_when_revision_changed_without_differences() {
        let ordered = vec![meta(3, "6", false), meta(2, "5", false)];
        let plan = plan_retention(&ordered, false, 5, "twb", &[]);
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn test_plan_caps_each_revision_run() {
        // newest: rev 9; then seven copies of rev 8; then one of rev 7
        let mut ordered = vec![meta(20, "9", false)];
        for day in (11..=17).rev() {
            ordered.push(meta(day, "8", false));
        }
        ordered.push(meta(10, "7", false));

        let plan = plan_retention(&ordered, true, 5, "twb", &[]);
        let deleted: Vec<_> = plan.deletes().cloned().collect();
        assert_eq!(
            deleted,
            vec![
                PathBuf::from("/data/Sales_2024-01-13.twb"),
                PathBuf::from("/data/Sales_2024-01-12.twb"),
            ]
        );
        // oldest copy of rev 8 sits next to rev 7 and marks the boundary
        assert!(!deleted.contains(&PathBuf::from("/data/Sales_2024-01-11.twb")));
        assert!(!deleted.contains(&PathBuf::from("/data/Sales_2024-01-10.twb")));
        assert!(!deleted.contains(&PathBuf::from("/data/Sales_2024-01-17.twb")));
    }

    #[test]
    fn test_plan_never_prunes_revision_boundaries() {
        let ordered = vec![
            meta(6, "4", false),
            meta(5, "3", false),
            meta(4, "2", false),
            meta(3, "1", false),
        ];
        let plan = plan_retention(&ordered, true, 1, "twb", &[]);
        assert_eq!(plan.deletes().count(), 0);
    }

    #[test]
    fn test_plan_settles_stale_pending_snapshot() {
        let ordered = vec![meta(5, "7", false), meta(4, "6", true), meta(3, "5", false)];
        let plan = plan_retention(&ordered, true, 5, "twb", &[]);
        assert_eq!(
            plan.actions,
            vec![RetentionAction::Rename {
                from: PathBuf::from("/data/Sales_2024-01-04.pending.twb"),
                to: PathBuf::from("/data/Sales_2024-01-04.twb"),
            }]
        );
    }

    #[test]
    fn test_plan_settles_beside_same_date_snapshot_of_other_revision() {
        let ordered = vec![meta(3, "6", true), meta(3, "5", false), meta(1, "4", false)];
        let plan = plan_retention(&ordered, true, 5, "twb", &[]);
        assert_eq!(
            plan.actions,
            vec![RetentionAction::Rename {
                from: PathBuf::from("/data/Sales_2024-01-03.pending.twb"),
                to: PathBuf::from("/data/Sales_2024-01-03.1.twb"),
            }]
        );
    }

    #[test]
    fn test_plan_skips_names_held_by_excluded_files() {
        let ordered = vec![meta(3, "6", true), meta(2, "5", false)];
        let occupied = vec![PathBuf::from("/data/Sales_2024-01-03.twb")];
        let plan = plan_retention(&ordered, true, 5, "twb", &occupied);
        assert_eq!(
            plan.actions,
            vec![RetentionAction::Rename {
                from: PathBuf::from("/data/Sales_2024-01-03.pending.twb"),
                to: PathBuf::from("/data/Sales_2024-01-03.1.twb"),
            }]
        );
    }

    #[test]
    fn test_execute_refuses_to_overwrite() {
        let temp = assert_fs::TempDir::new().unwrap();
        let from = temp.child("Sales_2024-01-03.pending.twb");
        let to = temp.child("Sales_2024-01-03.twb");
        from.write_str("new").unwrap();
        to.write_str("old").unwrap();

        let plan = RetentionPlan {
            actions: vec![RetentionAction::Rename {
                from: from.path().to_path_buf(),
                to: to.path().to_path_buf(),
            }],
        };
        assert!(execute_plan(&plan).is_err());
        to.assert("old");
        from.assert(predicate::path::exists());
    }

    #[test]
    fn test_cycle_keeps_same_day_revisions_apart() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb")
            .write_str(&workbook("4", &["Overview"], ""))
            .unwrap();
        temp.child("Sales_2024-01-03.twb")
            .write_str(&workbook("5", &["Overview"], ""))
            .unwrap();
        temp.child("Sales_2024-01-03.pending.twb")
            .write_str(&workbook("6", &["Overview", "Regions"], ""))
            .unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();
        assert_eq!(outcome.deleted_count(), 0);

        let revisions: Vec<_> = inventory(temp.path(), "Sales", "twb")
            .unwrap()
            .iter()
            .map(|s| read_revision(&s.path).unwrap())
            .collect();
        assert_eq!(revisions, vec!["6", "5", "4"]);

        temp.child("Sales_2024-01-03.twb").assert(predicate::str::contains("revision='5'"));
        temp.child("Sales_2024-01-03.1.twb").assert(predicate::str::contains("revision='6'"));
        temp.child("changelog.txt").assert(predicate::str::contains(
            "Compared: Sales_2024-01-03.twb (revision 5) -> Sales_2024-01-03.1.twb (revision 6)",
        ));
    }

    #[test]
    fn test_cycle_records_new_worksheet() {
        let temp = assert_fs::TempDir::new().unwrap();
        let d1 = temp.child("Sales_2024-01-01.twb");
        let d2 = temp.child("Sales_2024-01-02.twb");
        let d3 = temp.child("Sales_2024-01-03.pending.twb");
        d1.write_str(&workbook("5", &["Overview"], "")).unwrap();
        d2.write_str(&workbook("5", &["Overview"], "")).unwrap();
        d3.write_str(&workbook("6", &["Overview", "Regions"], "")).unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();

        assert!(outcome.changelog_written);
        let log = std::fs::read_to_string(temp.path().join("changelog.txt")).unwrap();
        assert_eq!(log.matches("=== Comparison on").count(), 1);
        assert!(log.contains("worksheets_added: Regions"));
        assert!(log.contains(
            "Compared: Sales_2024-01-02.twb (revision 5) -> Sales_2024-01-03.twb (revision 6)"
        ));

        d1.assert(predicate::path::exists());
        d2.assert(predicate::path::exists());
        d3.assert(predicate::path::missing());
        temp.child("Sales_2024-01-03.twb").assert(predicate::path::exists());
    }

    #[test]
    fn test_cycle_drops_reserialized_copy_with_same_revision() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb")
            .write_str(&workbook("5", &["Overview"], "version='18.1'"))
            .unwrap();
        let newest = temp.child("Sales_2024-01-02.pending.twb");
        newest
            .write_str(&workbook("5", &["Overview", "Scratch"], "version='18.2'"))
            .unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();

        assert!(outcome.changeset.is_none());
        assert!(!outcome.changelog_written);
        newest.assert(predicate::path::missing());
        temp.child("Sales_2024-01-02.twb").assert(predicate::path::missing());
        temp.child("changelog.txt").assert(predicate::path::missing());
    }

    #[test]
    fn test_cycle_without_tracked_differences_keeps_newest() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb")
            .write_str(&workbook("5", &["Overview"], ""))
            .unwrap();
        temp.child("Sales_2024-01-02.pending.twb")
            .write_str(&workbook("6", &["Overview"], ""))
            .unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();

        assert!(outcome.changeset.as_ref().is_some_and(Changeset::is_empty));
        assert!(!outcome.changelog_written);
        temp.child("Sales_2024-01-02.twb").assert(predicate::path::exists());
        temp.child("changelog.txt").assert(predicate::path::missing());
    }

    #[test]
    fn test_cycle_caps_copies_per_revision() {
        let temp = assert_fs::TempDir::new().unwrap();
        for day in 1..=7 {
            temp.child(format!("Sales_2024-01-0{}.twb", day))
                .write_str(&workbook("5", &["Overview"], ""))
                .unwrap();
        }
        temp.child("Sales_2024-01-08.pending.twb")
            .write_str(&workbook("6", &["Overview", "Regions"], ""))
            .unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();
        assert_eq!(outcome.deleted_count(), 2);

        let remaining = inventory(temp.path(), "Sales", "twb").unwrap();
        let rev5 = remaining
            .iter()
            .filter(|s| read_revision(&s.path).unwrap() == "5")
            .count();
        assert_eq!(rev5, 5);
        temp.child("Sales_2024-01-01.twb").assert(predicate::path::exists());
        temp.child("Sales_2024-01-02.twb").assert(predicate::path::missing());
        temp.child("Sales_2024-01-03.twb").assert(predicate::path::missing());
        temp.child("Sales_2024-01-07.twb").assert(predicate::path::exists());
    }

    #[test]
    fn test_cycle_excludes_snapshot_without_revision() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb")
            .write_str("<workbook><worksheets /></workbook>")
            .unwrap();
        let only = temp.child("Sales_2024-01-02.pending.twb");
        only.write_str(&workbook("5", &["Overview"], "")).unwrap();

        let outcome = manager().run_cycle(temp.path(), "Sales").unwrap();

        assert_eq!(outcome.snapshots_considered, 1);
        temp.child("Sales_2024-01-01.twb").assert(predicate::path::exists());
        temp.child("Sales_2024-01-02.twb").assert(predicate::path::exists());
        only.assert(predicate::path::missing());
    }

    #[test]
    fn test_cycle_fails_on_malformed_snapshot() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Sales_2024-01-01.twb").write_str("<workbook>").unwrap();

        assert!(manager().run_cycle(temp.path(), "Sales").is_err());
    }
}
