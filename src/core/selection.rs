// src/core/selection.rs
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::store::DocumentSummary;
use crate::config::TrackingConfig;

/// Roughly a century; larger windows are clamped
const MAX_LOOKBACK_HOURS: u64 = 24 * 365 * 100;

/// Decides which listed documents are captured in a run
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    allowed_projects: Vec<String>,
    excluded_fragments: Vec<String>,
    lookback: Option<Duration>,
}

impl DocumentFilter {
    pub fn from_config(config: &TrackingConfig) -> Self {
        let lookback = match config.lookback_hours {
            0 => None,
            hours => Some(Duration::hours(hours.min(MAX_LOOKBACK_HOURS) as i64)),
        };
        Self {
            allowed_projects: config.allowed_projects.clone(),
            excluded_fragments: config
                .excluded_name_fragments
                .iter()
                .filter(|f| !f.is_empty())
                .cloned()
                .collect(),
            lookback,
        }
    }

    pub fn accepts(&self, doc: &DocumentSummary, now: DateTime<Utc>) -> bool {
        if !self.allowed_projects.is_empty() && !self.allowed_projects.contains(&doc.project) {
            debug!("Skipping {} (project {} not tracked)", doc.name, doc.project);
            return false;
        }

        if let Some(fragment) = self
            .excluded_fragments
            .iter()
            .find(|f| doc.project.contains(f.as_str()) || doc.name.contains(f.as_str()))
        {
            debug!("Skipping {} (matches excluded fragment '{}')", doc.name, fragment);
            return false;
        }

        if let Some(lookback) = self.lookback {
            if doc.updated_at < now - lookback {
                debug!("Skipping {} (not updated since {})", doc.name, doc.updated_at);
                return false;
            }
        }

        true
    }

    /// Keep the accepted documents, in listing order
    pub fn select(&self, docs: Vec<DocumentSummary>, now: DateTime<Utc>) -> Vec<DocumentSummary> {
        docs.into_iter().filter(|doc| self.accepts(doc, now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(name: &str, project: &str, hours_ago: i64) -> DocumentSummary {
        DocumentSummary {
            id: format!("id-{}", name),
            name: name.to_string(),
            project: project.to_string(),
            updated_at: now() - Duration::hours(hours_ago),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn tracking(projects: &[&str], lookback_hours: u64, excluded: &[&str]) -> TrackingConfig {
        TrackingConfig {
            save_dir: "workbooks".into(),
            allowed_projects: projects.iter().map(|s| s.to_string()).collect(),
            lookback_hours,
            excluded_name_fragments: excluded.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_project_list_tracks_everything() {
        let filter = DocumentFilter::from_config(&tracking(&[], 0, &[]));
        assert!(filter.accepts(&doc("Sales", "Finance", 500), now()));
        assert!(filter.accepts(&doc("Churn", "Marketing", 1), now()));
    }

    #[test]
    fn test_project_allow_list() {
        let filter = DocumentFilter::from_config(&tracking(&["Finance"], 0, &[]));
        assert!(filter.accepts(&doc("Sales", "Finance", 1), now()));
        assert!(!filter.accepts(&doc("Churn", "Marketing", 1), now()));
    }

    #[test]
    fn test_excluded_fragments_match_name_or_project() {
        let filter = DocumentFilter::from_config(&tracking(&[], 0, &["Sandbox", "copy"]));
        assert!(!filter.accepts(&doc("Sales copy", "Finance", 1), now()));
        assert!(!filter.accepts(&doc("Sales", "Sandbox - Finance", 1), now()));
        assert!(filter.accepts(&doc("Sales", "Finance", 1), now()));
    }

    #[test]
    fn test_lookback_window() {
        let filter = DocumentFilter::from_config(&tracking(&[], 24, &[]));
        let docs = vec![doc("Fresh", "Finance", 2), doc("Stale", "Finance", 48)];
        let selected = filter.select(docs, now());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Fresh");
    }
}
