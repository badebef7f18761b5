// src/core/engine.rs
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use super::{
    comparator, sanitize_name, ArchiveExtractor, Changeset, CycleOutcome, DocumentFilter,
    DocumentStore, DocumentSummary, RetentionManager, Session, SnapshotName, TableauRestStore,
    WorkbookTree,
};

/// Totals for one capture run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub selected: usize,
    pub processed: usize,
    pub failed: Vec<String>,
    pub changelog_entries: usize,
    pub snapshots_deleted: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn log(&self) {
        info!("📊 Run complete:");
        info!("  - {} documents listed", self.listed);
        info!("  - {} documents selected", self.selected);
        info!("  - {} documents processed", self.processed);
        info!("  - {} changelog entries written", self.changelog_entries);
        info!("  - {} redundant snapshots deleted", self.snapshots_deleted);
        if !self.failed.is_empty() {
            warn!("  - {} documents failed: {}", self.failed.len(), self.failed.join(", "));
        }
    }
}

/// Main orchestration engine for Tabsentry
pub struct Engine {
    config: Config,
    filter: DocumentFilter,
    extractor: ArchiveExtractor,
    retention: RetentionManager,
}

impl Engine {
    /// Create a new engine from a config file, or the default locations
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config.tracking);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        let filter = DocumentFilter::from_config(&config.tracking);
        let extractor = ArchiveExtractor::new(&config.retention.document_extension);
        let retention = RetentionManager::new(&config.retention);
        Self {
            config,
            filter,
            extractor,
            retention,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// REST client for the configured server
    pub fn remote_store(&self) -> Result<TableauRestStore> {
        Ok(TableauRestStore::new(&self.config.server)?)
    }

    /// Capture every selected document and run its retention cycle
    pub async fn run(&self, store: &dyn DocumentStore, dry_run: bool) -> Result<RunSummary> {
        let save_dir = &self.config.tracking.save_dir;
        if !dry_run && !save_dir.is_dir() {
            anyhow::bail!(
                "Save directory does not exist: {} (run `tabsentry init` or create it)",
                save_dir.display()
            );
        }

        info!("🔄 Starting capture run into {}", save_dir.display());
        let session = store.authenticate().await?;

        let result = self.capture_all(store, &session, dry_run).await;

        if let Err(e) = store.sign_out(&session).await {
            warn!("Sign-out failed: {}", e);
        }

        let summary = result?;
        summary.log();
        Ok(summary)
    }

    async fn capture_all(
        &self,
        store: &dyn DocumentStore,
        session: &Session,
        dry_run: bool,
    ) -> Result<RunSummary> {
        let listed = store.list_documents(session).await?;
        let mut summary = RunSummary {
            listed: listed.len(),
            ..RunSummary::default()
        };

        let complete: Vec<DocumentSummary> = listed
            .into_iter()
            .filter(|doc| {
                let ok = !doc.id.is_empty() && !doc.name.is_empty() && !doc.project.is_empty();
                if !ok {
                    error!("Missing required workbook details (id: {:?}, name: {:?})", doc.id, doc.name);
                }
                ok
            })
            .collect();

        let selected = self.filter.select(complete, Utc::now());
        summary.selected = selected.len();
        info!("Selected {} of {} workbooks", summary.selected, summary.listed);

        for doc in &selected {
            if dry_run {
                info!(
                    "📋 Would capture {} / {} into {}",
                    doc.project,
                    doc.name,
                    self.document_dir(doc).display()
                );
                continue;
            }

            match self.process_document(store, session, doc).await {
                Ok(outcome) => {
                    summary.processed += 1;
                    if outcome.changelog_written {
                        summary.changelog_entries += 1;
                    }
                    summary.snapshots_deleted += outcome.deleted_count();
                }
                Err(e) => {
                    error!("❌ Failed to process {} / {}: {:#}", doc.project, doc.name, e);
                    summary.failed.push(format!("{}/{}", doc.project, doc.name));
                }
            }
        }

        Ok(summary)
    }

    fn document_dir(&self, doc: &DocumentSummary) -> PathBuf {
        self.config
            .tracking
            .save_dir
            .join(sanitize_name(&doc.project))
            .join(sanitize_name(&doc.name))
    }

    /// Download one document, store it as a pending snapshot and resolve retention
    async fn process_document(
        &self,
        store: &dyn DocumentStore,
        session: &Session,
        doc: &DocumentSummary,
    ) -> Result<CycleOutcome> {
        info!("Processing {} / {} ({})", doc.project, doc.name, doc.id);
        let folder = self.document_dir(doc);
        tokio::fs::create_dir_all(&folder).await?;

        let base = sanitize_name(&doc.name);
        let name = SnapshotName::pending(&base, doc.updated_at.date_naive());

        let content = store.fetch_content(session, &doc.id).await?;
        debug!(
            "Downloaded {} bytes for {} (served as {})",
            content.bytes.len(),
            doc.name,
            content.suggested_file_name
        );

        let mut scratch = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&folder)?;
        scratch.write_all(&content.bytes)?;
        scratch.flush()?;

        if ArchiveExtractor::is_package(scratch.path())? {
            let extracted = self.extractor.extract(scratch.path(), &folder, &name)?;
            if extracted.is_empty() {
                anyhow::bail!(
                    "No .{} workbook found inside {}",
                    self.retention.extension(),
                    content.suggested_file_name
                );
            }
        } else {
            let target = folder.join(name.file_name(self.retention.extension()));
            scratch
                .persist(&target)
                .map_err(|e| anyhow::anyhow!("Failed to save {}: {}", target.display(), e.error))?;
            info!("Saved workbook: {}", target.display());
        }

        let outcome = self.retention.run_cycle(&folder, &base)?;
        Ok(outcome)
    }

    /// Structural diff of two local workbooks, packaged or not
    pub fn compare_files(&self, old: &Path, new: &Path) -> Result<Changeset> {
        let scratch = tempfile::tempdir()?;
        let old_tree = self.load_tree(old, scratch.path(), "old")?;
        let new_tree = self.load_tree(new, scratch.path(), "new")?;
        Ok(comparator::compare(&old_tree, &new_tree))
    }

    fn load_tree(&self, path: &Path, scratch: &Path, label: &str) -> Result<WorkbookTree> {
        if !ArchiveExtractor::is_package(path)? {
            return Ok(WorkbookTree::from_path(path)?);
        }

        let name = SnapshotName::pending(label, Utc::now().date_naive());
        let extracted = self.extractor.extract(path, scratch, &name)?;
        match extracted.first() {
            Some(document) => Ok(WorkbookTree::from_path(document)?),
            None => anyhow::bail!(
                "No .{} workbook found inside {}",
                self.retention.extension(),
                path.display()
            ),
        }
    }

    /// Run a retention cycle on an existing snapshot folder
    pub fn retain(&self, dir: &Path, base: &str) -> Result<CycleOutcome> {
        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {}", dir.display());
        }
        Ok(self.retention.run_cycle(dir, base)?)
    }

    pub fn changelog_path(&self, dir: &Path) -> PathBuf {
        self.retention.changelog_path(dir)
    }
}
