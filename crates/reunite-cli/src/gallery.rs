//! TOML manifest of filed reports, standing in for the report store.
//!
//! ```toml
//! [[report]]
//! id = 1
//! child_name = "Meera"
//! age = 6
//! last_seen_area = "Central Bus Stand"
//! photo = "photos/meera.jpg"
//!
//! [report.reporter]
//! name = "Lakshmi"
//! relation = "mother"
//! phone = "555-0100"
//! email = "lakshmi@example.org"
//! ```
//!
//! Relative photo paths resolve against the manifest's directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reunite_core::{FaceEmbedding, MissingChildRecord, Photo, ReportStatus, ReporterContact};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    report: Vec<ReportEntry>,
}

/// One `[[report]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: u64,
    pub child_name: String,
    pub age: u32,
    pub last_seen_area: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub distinguishing_marks: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dress_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<PathBuf>,
    #[serde(default)]
    pub status: ReportStatus,
    /// RFC 3339 string; missing means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub reporter: ReporterContact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<FaceEmbedding>,
}

/// A loaded manifest and where it came from.
#[derive(Debug)]
pub struct Gallery {
    path: PathBuf,
    manifest: Manifest,
}

impl Gallery {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading gallery {}", path.display()))?;
        let manifest: Manifest = toml::from_str(&raw).with_context(|| format!("parsing gallery {}", path.display()))?;
        tracing::debug!(path = %path.display(), reports = manifest.report.len(), "gallery loaded");
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.manifest.report
    }

    pub fn entries_mut(&mut self) -> &mut [ReportEntry] {
        &mut self.manifest.report
    }

    fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Absolute (or manifest-relative resolved) photo path for an entry.
    pub fn photo_path(&self, entry: &ReportEntry) -> Option<PathBuf> {
        entry.photo.as_ref().map(|p| self.base_dir().join(p))
    }

    /// Reports in manifest order, optionally only those still missing.
    pub fn records(&self, missing_only: bool) -> Vec<MissingChildRecord> {
        let loaded_at = Utc::now();
        self.manifest
            .report
            .iter()
            .filter(|e| !missing_only || e.status == ReportStatus::Missing)
            .map(|e| MissingChildRecord {
                id: e.id,
                child_name: e.child_name.clone(),
                age: e.age,
                last_seen_area: e.last_seen_area.clone(),
                distinguishing_marks: e.distinguishing_marks.clone(),
                dress_color: e.dress_color.clone(),
                reporter: e.reporter.clone(),
                photo: self.photo_path(e).map_or(Photo::Missing, Photo::File),
                embedding: e.embedding.clone(),
                status: e.status,
                submitted_at: e.submitted_at.unwrap_or(loaded_at),
            })
            .collect()
    }

    /// Write the manifest back to its file.
    pub fn save(&self) -> Result<()> {
        let raw = toml::to_string_pretty(&self.manifest).context("serializing gallery")?;
        std::fs::write(&self.path, raw).with_context(|| format!("writing gallery {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "gallery saved");
        Ok(())
    }
}
