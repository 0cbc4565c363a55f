//! Report and upload records as the matching engine sees them.
//!
//! Persistence belongs to the host application; these types only carry the
//! fields matching and notification read.

use crate::types::FaceEmbedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("no photo attached")]
    Missing,
    #[error("photo {path} unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the bytes of a photo live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Photo {
    #[default]
    Missing,
    File(PathBuf),
    Inline(Vec<u8>),
}

impl Photo {
    /// Read the encoded image bytes.
    pub fn load(&self) -> Result<Cow<'_, [u8]>, PhotoError> {
        match self {
            Photo::Missing => Err(PhotoError::Missing),
            Photo::File(path) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|source| PhotoError::Unreadable {
                    path: path.clone(),
                    source,
                }),
            Photo::Inline(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }

    /// Path of the photo when it is an existing file on disk.
    pub fn existing_file(&self) -> Option<&Path> {
        match self {
            Photo::File(path) if path.exists() => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Missing,
    Found,
}

/// Person who filed a missing-child report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReporterContact {
    pub name: String,
    pub relation: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl ReporterContact {
    /// Email address, if one was given and is not blank.
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// A previously filed "missing child" report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingChildRecord {
    pub id: u64,
    pub child_name: String,
    pub age: u32,
    pub last_seen_area: String,
    #[serde(default)]
    pub distinguishing_marks: String,
    #[serde(default)]
    pub dress_color: String,
    pub reporter: ReporterContact,
    #[serde(default)]
    pub photo: Photo,
    /// Precomputed embedding of `photo`; extracted on demand when absent.
    #[serde(default)]
    pub embedding: Option<FaceEmbedding>,
    #[serde(default)]
    pub status: ReportStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Where a found-child photo was taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
}

/// A freshly submitted "found child" photo with its capture metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCandidate {
    pub id: Uuid,
    pub photo: Photo,
    pub uploader_name: String,
    pub uploader_contact: String,
    #[serde(default)]
    pub location: Location,
    /// Attached once extraction finds a face.
    #[serde(default)]
    pub embedding: Option<FaceEmbedding>,
    #[serde(default)]
    pub estimated_age: Option<f32>,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadCandidate {
    pub fn new(
        photo: Photo,
        uploader_name: impl Into<String>,
        uploader_contact: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            photo,
            uploader_name: uploader_name.into(),
            uploader_contact: uploader_contact.into(),
            location,
            embedding: None,
            estimated_age: None,
            uploaded_at: Utc::now(),
        }
    }
}
