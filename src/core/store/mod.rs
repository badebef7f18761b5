// src/core/store/mod.rs
mod tableau;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use tableau::{parse_content_disposition, TableauRestStore};

/// Authenticated handle to a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub site_id: String,
}

/// Listing metadata for one remote document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub project: String,
    pub updated_at: DateTime<Utc>,
}

/// Raw content of a document as served
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub suggested_file_name: String,
}

/// Remote source of tracked documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Sign in and resolve the site
    async fn authenticate(&self) -> Result<Session>;

    /// Every document on the site, with pagination flattened
    async fn list_documents(&self, session: &Session) -> Result<Vec<DocumentSummary>>;

    /// Current content of one document
    async fn fetch_content(&self, session: &Session, id: &str) -> Result<FetchedContent>;

    async fn sign_out(&self, session: &Session) -> Result<()>;
}
