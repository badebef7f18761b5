// src/core/archive.rs
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::snapshot::SnapshotName;
use crate::error::{TabsentryError, Result};

const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Pulls the structured workbook out of a packaged (zipped) workbook
pub struct ArchiveExtractor {
    suffix: String,
}

impl ArchiveExtractor {
    /// `suffix` is the structured-document extension, without the dot
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
        }
    }

    /// Detect a package by its container signature, not its extension
    pub fn is_package(path: &Path) -> Result<bool> {
        let mut header = [0u8; 4];
        let mut file = File::open(path)?;
        let mut read = 0;
        while read < header.len() {
            match file.read(&mut header[read..])? {
                0 => break,
                n => read += n,
            }
        }
        Ok(read == header.len() && header == ZIP_MAGIC)
    }

    /// Extract every structured member of `package_path` into `dest_dir`
    /// under the snapshot name `name`.
    ///
    /// A plain (non-package) document is already structured and is returned
    /// as is. An empty result means the package held no structured member;
    /// the caller decides whether that is an error. Scratch space lives in
    /// `dest_dir` and is removed whatever the outcome.
    pub fn extract(
        &self,
        package_path: &Path,
        dest_dir: &Path,
        name: &SnapshotName,
    ) -> Result<Vec<PathBuf>> {
        if !Self::is_package(package_path)? {
            debug!("{} is not a package, nothing to extract", package_path.display());
            return Ok(vec![package_path.to_path_buf()]);
        }

        let file = File::open(package_path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| corrupt(package_path, e))?;
        info!("Inspecting contents of {}", package_path.display());

        let scratch = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(dest_dir)?;
        let dest_path = dest_dir.join(name.file_name(&self.suffix));
        let mut extracted = Vec::new();

        for index in 0..archive.len() {
            let mut member = archive.by_index(index).map_err(|e| corrupt(package_path, e))?;
            let member_name = member.name().to_string();

            if member.is_dir() || !self.is_structured(&member_name) {
                debug!("Skipping non-workbook member in archive: {}", member_name);
                continue;
            }

            let staged = scratch.path().join(format!("member-{}.{}", index, self.suffix));
            let mut out = File::create(&staged)?;
            std::io::copy(&mut member, &mut out)?;
            out.sync_all()?;
            drop(out);

            std::fs::rename(&staged, &dest_path)?;
            info!("Extracted {} to {}", member_name, dest_path.display());
            if !extracted.contains(&dest_path) {
                extracted.push(dest_path.clone());
            }
        }

        scratch.close()?;

        if extracted.is_empty() {
            warn!("No .{} members found in {}", self.suffix, package_path.display());
        }
        Ok(extracted)
    }

    fn is_structured(&self, member_name: &str) -> bool {
        Path::new(member_name)
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case(self.suffix.as_str()))
    }
}

fn corrupt(path: &Path, error: zip::result::ZipError) -> TabsentryError {
    TabsentryError::CorruptArchive {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}
