// src/core/mod.rs
mod engine;
mod workbook;
mod changeset;
mod comparator;
mod changelog;
mod snapshot;
mod archive;
mod retention;
mod selection;

// Remote document sources
mod store;

pub use workbook::{read_revision, Datasource, DatasourceDetail, Section, WorkbookTree};
pub use changeset::{ChangeKind, Changeset};
pub use changelog::{ChangelogWriter, ComparedPair, NO_CHANGES, REPORT_TITLE};
pub use snapshot::{inventory, sanitize_name, SnapshotFile, SnapshotName, PENDING_MARKER};
pub use archive::ArchiveExtractor;
pub use retention::{
    execute_plan, plan_retention, CycleOutcome, RetentionAction, RetentionManager,
    RetentionPlan, SnapshotMeta,
};
pub use selection::DocumentFilter;
pub use store::{
    parse_content_disposition, DocumentStore, DocumentSummary, FetchedContent, Session,
    TableauRestStore,
};

// Export the main engine
pub use engine::{Engine, RunSummary};
