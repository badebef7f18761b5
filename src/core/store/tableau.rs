// src/core/store/tableau.rs
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use super::{DocumentStore, DocumentSummary, FetchedContent, Session};
use crate::config::ServerConfig;
use crate::error::{TabsentryError, Result};

const AUTH_HEADER: &str = "X-Tableau-Auth";

/// Tableau Server / Cloud REST API client
pub struct TableauRestStore {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    token_name: String,
    token_secret: String,
    site_content_url: String,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    token: String,
    site: SiteRef,
}

#[derive(Debug, Deserialize)]
struct SiteRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WorkbooksPage {
    pagination: Option<Pagination>,
    #[serde(default)]
    workbooks: WorkbookList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    /// Sent as a string by the server
    total_available: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct WorkbookList {
    #[serde(default)]
    workbook: Vec<WorkbookEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkbookEntry {
    id: Option<String>,
    name: Option<String>,
    updated_at: Option<String>,
    project: Option<ProjectRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    name: Option<String>,
}

impl Pagination {
    fn total(&self) -> Option<u64> {
        self.total_available
            .as_u64()
            .or_else(|| self.total_available.as_str().and_then(|s| s.parse().ok()))
    }
}

impl WorkbookEntry {
    /// `None` when a required field is missing or unparseable
    fn into_summary(self) -> Option<DocumentSummary> {
        let id = self.id.filter(|v| !v.is_empty())?;
        let name = self.name.filter(|v| !v.is_empty())?;
        let project = self.project.and_then(|p| p.name).filter(|v| !v.is_empty())?;
        let updated_at = DateTime::parse_from_rfc3339(self.updated_at.as_deref()?)
            .ok()?
            .with_timezone(&Utc);

        Some(DocumentSummary {
            id,
            name,
            project,
            updated_at,
        })
    }
}

/// Extract the file name from a `Content-Disposition` header value
pub fn parse_content_disposition(value: &str) -> Option<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let regex = FILENAME.get_or_init(|| {
        Regex::new(r#"filename="([^"]+)""#).expect("Invalid content-disposition regex")
    });
    regex
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

impl TableauRestStore {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        if config.token_name.is_empty() {
            return Err(TabsentryError::Config(
                "server.token_name is required".to_string(),
            ));
        }
        let token_secret = config.token_secret.clone().ok_or_else(|| {
            TabsentryError::Config(format!(
                "server.token_secret is required (or set {})",
                crate::config::TOKEN_SECRET_ENV
            ))
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token_name: config.token_name.clone(),
            token_secret,
            site_content_url: config.site_content_url.clone(),
            page_size: config.page_size,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, self.api_version, path)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("{} failed: {} {}", what, status, body);
        Err(TabsentryError::Server(format!("{} failed with {}: {}", what, status, body)))
    }

    async fn fetch_page(&self, session: &Session, page_number: u32) -> Result<WorkbooksPage> {
        let url = self.api_url(&format!(
            "sites/{}/workbooks?pageSize={}&pageNumber={}",
            session.site_id, self.page_size, page_number
        ));
        debug!("Querying workbooks with URL: {}", url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(AUTH_HEADER, &session.token)
            .send()
            .await?;
        let response = Self::check(response, "Listing workbooks").await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl DocumentStore for TableauRestStore {
    async fn authenticate(&self) -> Result<Session> {
        let url = self.api_url("auth/signin");
        let payload = json!({
            "credentials": {
                "personalAccessTokenName": self.token_name,
                "personalAccessTokenSecret": self.token_secret,
                "site": { "contentUrl": self.site_content_url }
            }
        });

        info!("Signing in to {}", url);
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;
        let response = Self::check(response, "Sign-in").await?;
        let text = response.text().await?;
        let body: SignInResponse = serde_json::from_str(&text)?;

        info!("Successfully signed in");
        Ok(Session {
            token: body.credentials.token,
            site_id: body.credentials.site.id,
        })
    }

    async fn list_documents(&self, session: &Session) -> Result<Vec<DocumentSummary>> {
        let mut documents = Vec::new();
        let mut seen: u64 = 0;
        let mut page_number = 1;

        loop {
            let page = self.fetch_page(session, page_number).await?;
            let total = page.pagination.as_ref().and_then(Pagination::total);
            let entries = page.workbooks.workbook;
            let page_len = entries.len();
            seen += page_len as u64;

            for entry in entries {
                let label = entry.name.clone().unwrap_or_else(|| "unknown".to_string());
                match entry.into_summary() {
                    Some(summary) => documents.push(summary),
                    None => error!("Missing required fields in workbook listing entry: {}", label),
                }
            }

            info!(
                "Fetched page {}, {} workbooks, total available: {}",
                page_number,
                page_len,
                total.map_or_else(|| "unknown".to_string(), |t| t.to_string())
            );

            let exhausted = total.map_or(false, |t| seen >= t);
            if page_len == 0 || page_len < self.page_size as usize || exhausted {
                break;
            }
            page_number += 1;
        }

        Ok(documents)
    }

    async fn fetch_content(&self, session: &Session, id: &str) -> Result<FetchedContent> {
        let url = self.api_url(&format!("sites/{}/workbooks/{}/content", session.site_id, id));
        info!("Downloading workbook {} from {}", id, url);

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, &session.token)
            .send()
            .await?;
        let response = Self::check(response, "Downloading workbook").await?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TabsentryError::Server("Content-Disposition header missing".to_string()))?;
        let suggested_file_name = parse_content_disposition(disposition).ok_or_else(|| {
            TabsentryError::Server(format!(
                "Could not parse filename from Content-Disposition: {}",
                disposition
            ))
        })?;

        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedContent {
            bytes,
            suggested_file_name,
        })
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("auth/signout"))
            .header(AUTH_HEADER, &session.token)
            .send()
            .await?;
        Self::check(response, "Sign-out").await?;
        info!("Signed out successfully");
        Ok(())
    }
}
