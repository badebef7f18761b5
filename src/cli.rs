use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::core::{ChangelogWriter, Engine};

#[derive(Parser)]
#[command(name = "tabsentry")]
#[command(about = "Version tracking and change logs for Tableau workbooks")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Fetch tracked workbooks, update change logs and prune snapshots
    Run {
        /// Dry run - list what would be fetched without downloading
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare two local workbooks (.twb or .twbx)
    Compare {
        /// Older workbook
        old: PathBuf,

        /// Newer workbook
        new: PathBuf,

        /// Print the changes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the retention cycle on an existing snapshot folder
    Retain {
        /// Folder holding the snapshots
        dir: PathBuf,

        /// Snapshot base name (the sanitized workbook name)
        #[arg(long)]
        base: String,

        /// Snapshot extension, overriding the configured one
        #[arg(long)]
        ext: Option<String>,
    },
}

impl Cli {
    /// Commands that need no configured engine
    pub fn is_init(&self) -> bool {
        matches!(self.command, Commands::Init { .. })
    }

    pub fn init(&self) -> Result<()> {
        match &self.command {
            Commands::Init { path, force } => write_default_config(path.clone(), *force),
            _ => anyhow::bail!("init called for a different command"),
        }
    }

    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path, force } => write_default_config(path, force),
            Commands::Run { dry_run } => {
                let store = engine.remote_store()?;
                let summary = engine.run(&store, dry_run).await?;
                println!(
                    "Listed: {}, selected: {}, processed: {}, failed: {}, changelog entries: {}, snapshots deleted: {}",
                    summary.listed,
                    summary.selected,
                    summary.processed,
                    summary.failed.len(),
                    summary.changelog_entries,
                    summary.snapshots_deleted
                );
                if !summary.is_success() {
                    anyhow::bail!(
                        "{} workbook(s) failed: {}",
                        summary.failed.len(),
                        summary.failed.join(", ")
                    );
                }
                Ok(())
            }
            Commands::Compare { old, new, json } => {
                let changes = engine.compare_files(&old, &new)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&changes)?);
                } else {
                    print!("{}", ChangelogWriter::render(&changes, None));
                }
                Ok(())
            }
            Commands::Retain { dir, base, ext } => {
                let engine = match ext {
                    Some(ext) => {
                        let mut config = engine.config().clone();
                        config.retention.document_extension = ext.trim_start_matches('.').to_string();
                        Engine::with_config(config)
                    }
                    None => engine,
                };
                let outcome = engine.retain(&dir, &base)?;
                println!(
                    "Snapshots considered: {}, changelog entry written: {}, snapshots deleted: {}",
                    outcome.snapshots_considered,
                    outcome.changelog_written,
                    outcome.deleted_count()
                );
                if outcome.changelog_written {
                    println!("Changelog: {}", engine.changelog_path(&dir).display());
                }
                Ok(())
            }
        }
    }
}

fn write_default_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let target_dir = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let config_path = target_dir.join(Config::default_locations()[0]);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = Config::default();
    std::fs::create_dir_all(target_dir.join(&config.tracking.save_dir))?;
    config.save(&config_path)?;
    info!("✅ Wrote default configuration to {}", config_path.display());
    Ok(())
}
