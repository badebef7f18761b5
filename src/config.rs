use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TabsentryError, Result};

/// Environment variable that overrides `server.token_secret`
pub const TOKEN_SECRET_ENV: &str = "TABSENTRY_TOKEN_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tableau Server connection settings
    pub server: ServerConfig,

    /// Which documents to track and where snapshots live
    pub tracking: TrackingConfig,

    /// Snapshot retention and changelog settings
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server base URL (e.g. "https://tableau.example.com")
    pub url: String,

    /// REST API version
    pub api_version: String,

    /// Personal access token name
    pub token_name: String,

    /// Personal access token secret
    pub token_secret: Option<String>,

    /// Site content URL, empty for the default site
    pub site_content_url: String,

    /// Page size used when listing workbooks
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Root directory for all snapshots
    pub save_dir: PathBuf,

    /// Projects to track; empty tracks every project
    pub allowed_projects: Vec<String>,

    /// Only fetch documents modified within this many hours (0 disables)
    pub lookback_hours: u64,

    /// Skip documents whose project or name contains any of these
    pub excluded_name_fragments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum snapshots kept for one run of equal revisions
    pub max_copies_per_revision: usize,

    /// Changelog file name inside each document folder
    pub changelog_file: String,

    /// Extension of structured workbook snapshots
    pub document_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "https://tableau.example.com".to_string(),
                api_version: "3.4".to_string(),
                token_name: String::new(),
                token_secret: None,
                site_content_url: String::new(),
                page_size: 100,
            },
            tracking: TrackingConfig {
                save_dir: PathBuf::from("workbooks"),
                allowed_projects: vec![],
                lookback_hours: 24,
                excluded_name_fragments: vec![],
            },
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_copies_per_revision: 5,
            changelog_file: "changelog.txt".to_string(),
            document_extension: "twb".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| TabsentryError::Config(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TabsentryError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(TabsentryError::Config(format!(
                        "Config file not found: {}",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                for candidate in Self::default_locations() {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    pub fn default_locations() -> &'static [&'static str] {
        &["tabsentry.toml", "Tabsentry.toml", ".tabsentry.toml"]
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
            if !secret.is_empty() {
                self.server.token_secret = Some(secret);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.retention.max_copies_per_revision == 0 {
            return Err(TabsentryError::Config(
                "retention.max_copies_per_revision must be at least 1".to_string(),
            ));
        }
        if self.server.page_size == 0 {
            return Err(TabsentryError::Config(
                "server.page_size must be at least 1".to_string(),
            ));
        }
        let ext = &self.retention.document_extension;
        if ext.is_empty() || ext.contains('.') {
            return Err(TabsentryError::Config(format!(
                "retention.document_extension must be a bare extension, got '{}'",
                ext
            )));
        }
        Ok(())
    }
}
