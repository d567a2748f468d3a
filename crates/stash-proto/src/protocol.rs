//! Wire types for the local acquisition backend.
//!
//! The backend is a small JSON-over-HTTP service.  Field names follow its
//! snake_case wire format; optional fields are tolerated as absent so that
//! older backends (which omit `total`, `failed_tracks`, ...) still decode.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of catalog entity a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Track,
    Album,
    Playlist,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Track => "track",
            CollectionType::Album => "album",
            CollectionType::Playlist => "playlist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "track" => Some(CollectionType::Track),
            "album" => Some(CollectionType::Album),
            "playlist" => Some(CollectionType::Playlist),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-assigned job identifier.
///
/// Older backends send it as a string (`"1"`), newer ones as a number; both
/// decode to the same textual id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => JobId(n.to_string()),
            Raw::Str(s) => JobId(s),
        })
    }
}

/// Job lifecycle status as reported by `/progress/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One pre-resolved item handed to the backend with a download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub name: String,
    /// Absent for local files the catalog knows by name only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

// ── POST /download ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Started,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: SubmitStatus,
    #[serde(default)]
    pub download_id: Option<JobId>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

// ── GET /progress/{id} ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub done: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub percent: f64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub failed_tracks: Vec<String>,
}

// ── GET /logs/{id} ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub lines: Vec<String>,
}

// ── POST /capture-track ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureUpload {
    pub name: String,
    /// Base64-encoded recording.
    pub data: String,
    pub mime_type: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Saved,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub status: CaptureStatus,
    #[serde(default)]
    pub error: Option<String>,
}

// ── GET /config, POST /save-config ───────────────────────────────────────────

/// Backend settings.  Unknown fields (dependency probes etc.) are kept so the
/// settings form can show them untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub download_path: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSettingsRequest {
    pub path: String,
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

/// Error body some backend routes return alongside a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
