//! Core types for Multipost

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WebsiteError;

/// Response message used when a failure carries no text of its own
pub const UNKNOWN_ERROR: &str = "Unknown Error";

// ============================================================================
// Website identity
// ============================================================================

/// Identifier assigned to every adapter at registration time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum WebsiteId {
    Derpibooru,
    Discord,
    FurAffinity,
    Mastodon,
    Patreon,
    Weasyl,
}

impl WebsiteId {
    pub const ALL: [WebsiteId; 6] = [
        WebsiteId::Derpibooru,
        WebsiteId::Discord,
        WebsiteId::FurAffinity,
        WebsiteId::Mastodon,
        WebsiteId::Patreon,
        WebsiteId::Weasyl,
    ];

    /// Lowercase key used in configuration files and bundles
    pub fn as_str(&self) -> &'static str {
        match self {
            WebsiteId::Derpibooru => "derpibooru",
            WebsiteId::Discord => "discord",
            WebsiteId::FurAffinity => "furaffinity",
            WebsiteId::Mastodon => "mastodon",
            WebsiteId::Patreon => "patreon",
            WebsiteId::Weasyl => "weasyl",
        }
    }

    /// Human readable name used in validation messages and responses
    pub fn display_name(&self) -> &'static str {
        match self {
            WebsiteId::Derpibooru => "Derpibooru",
            WebsiteId::Discord => "Discord",
            WebsiteId::FurAffinity => "Fur Affinity",
            WebsiteId::Mastodon => "Mastodon",
            WebsiteId::Patreon => "Patreon",
            WebsiteId::Weasyl => "Weasyl",
        }
    }
}

impl std::fmt::Display for WebsiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebsiteId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        WebsiteId::ALL
            .into_iter()
            .find(|id| id.as_str() == key)
            .ok_or_else(|| format!("Unknown website: '{}'", s))
    }
}

// ============================================================================
// Submission
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionType {
    File,
    Notification,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionRating {
    General,
    Mature,
    Adult,
    Extreme,
}

impl std::fmt::Display for SubmissionRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionRating::General => "general",
            SubmissionRating::Mature => "mature",
            SubmissionRating::Adult => "adult",
            SubmissionRating::Extreme => "extreme",
        };
        f.write_str(name)
    }
}

/// Broad category of an uploaded file, derived from its mimetype
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Audio,
    Video,
    Text,
    Unknown,
}

impl FileType {
    pub fn from_mimetype(mimetype: &str) -> Self {
        let mimetype = mimetype.to_lowercase();
        match mimetype.split('/').next().unwrap_or_default() {
            "image" => FileType::Image,
            "audio" => FileType::Audio,
            "video" => FileType::Video,
            "text" => FileType::Text,
            _ => match mimetype.as_str() {
                "application/pdf"
                | "application/rtf"
                | "application/msword"
                | "application/vnd.oasis.opendocument.text"
                | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    FileType::Text
                }
                _ => FileType::Unknown,
            },
        }
    }
}

/// Metadata of a file attached to a submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub mimetype: String,
    /// Size in bytes
    pub size: u64,
    pub file_type: FileType,
    pub path: PathBuf,
    /// Accounts this file must not be uploaded to
    #[serde(default)]
    pub ignored_accounts: Vec<String>,
}

impl FileRecord {
    /// Build a record from a file on disk, guessing the mimetype from its extension
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mimetype = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            file_type: FileType::from_mimetype(&mimetype),
            name,
            mimetype,
            size: metadata.len(),
            path: path.to_path_buf(),
            ignored_accounts: Vec::new(),
        })
    }

    /// Lowercase extension of the file name, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    pub fn is_ignored_for(&self, account_id: &str) -> bool {
        self.ignored_accounts.iter().any(|a| a == account_id)
    }
}

/// File contents ready to be sent to a website
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub file_name: String,
    pub mimetype: String,
    pub file_type: FileType,
    pub data: Bytes,
}

impl FilePayload {
    pub fn new(file_name: impl Into<String>, mimetype: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let mimetype = mimetype.into();
        Self {
            file_name: file_name.into(),
            file_type: FileType::from_mimetype(&mimetype),
            mimetype,
            data: data.into(),
        }
    }

    /// Read the file described by `record` from disk
    pub async fn load(record: &FileRecord) -> std::io::Result<Self> {
        let data = tokio::fs::read(&record.path).await?;
        Ok(Self {
            file_name: record.name.clone(),
            mimetype: record.mimetype.clone(),
            file_type: record.file_type,
            data: Bytes::from(data),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub submission_type: SubmissionType,
    pub title: String,
    #[serde(default)]
    pub rating: Option<SubmissionRating>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub primary: Option<FileRecord>,
    #[serde(default)]
    pub thumbnail: Option<FileRecord>,
    #[serde(default)]
    pub additional: Vec<FileRecord>,
    /// Text substituted when a website cannot take the primary text file
    #[serde(default)]
    pub fallback: Option<FileRecord>,
}

impl Submission {
    pub fn new(submission_type: SubmissionType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            submission_type,
            title: title.into(),
            rating: None,
            sources: Vec::new(),
            primary: None,
            thumbnail: None,
            additional: Vec::new(),
            fallback: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.submission_type == SubmissionType::File
    }
}

// ============================================================================
// Parts and options
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagData {
    /// Append the default part's tags after these
    #[serde(default = "default_true")]
    pub extend_default: bool,
    #[serde(default)]
    pub value: Vec<String>,
}

impl Default for TagData {
    fn default() -> Self {
        Self {
            extend_default: true,
            value: Vec::new(),
        }
    }
}

impl TagData {
    pub fn new(value: Vec<String>) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DescriptionData {
    /// Replace the default description instead of inheriting it
    #[serde(default)]
    pub overwrite_default: bool,
    #[serde(default)]
    pub value: String,
}

/// Options every website understands; adapter option structs flatten this
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: TagData,
    #[serde(default)]
    pub description: DescriptionData,
    #[serde(default)]
    pub rating: Option<SubmissionRating>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub use_thumbnail: bool,
    #[serde(default = "default_true")]
    pub auto_scale: bool,
}

impl Default for DefaultOptions {
    fn default() -> Self {
        Self {
            title: None,
            tags: TagData::default(),
            description: DescriptionData::default(),
            rating: None,
            sources: Vec::new(),
            use_thumbnail: false,
            auto_scale: true,
        }
    }
}

/// Per-account override of submission fields plus an adapter option bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionPart<T = serde_json::Value> {
    #[serde(default)]
    pub submission_id: String,
    pub account_id: String,
    /// `None` only for the default part
    #[serde(default)]
    pub website: Option<WebsiteId>,
    #[serde(default)]
    pub is_default: bool,
    pub data: T,
}

impl SubmissionPart<serde_json::Value> {
    /// Decode the shared option fields, ignoring adapter-specific ones
    pub fn default_options(&self) -> Result<DefaultOptions, WebsiteError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            WebsiteError::InvalidOptions(format!(
                "Part for account {} has malformed options: {}",
                self.account_id, e
            ))
        })
    }

    /// Decode the option bag into an adapter's option struct
    pub fn options_as<U: DeserializeOwned>(&self) -> Result<U, WebsiteError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            WebsiteError::InvalidOptions(format!(
                "Part for account {} has malformed options: {}",
                self.account_id, e
            ))
        })
    }
}

/// Fully merged view of a submission for one account
#[derive(Debug, Clone)]
pub struct PostData<T = serde_json::Value> {
    pub submission_id: String,
    pub account_id: String,
    pub title: String,
    /// Description already rendered in the website's dialect
    pub description: String,
    /// Tags after the adapter's `parse_tags`
    pub tags: Vec<String>,
    pub rating: Option<SubmissionRating>,
    pub sources: Vec<String>,
    pub options: T,
    pub primary: Option<FilePayload>,
    pub thumbnail: Option<FilePayload>,
    pub additional: Vec<FilePayload>,
    pub fallback: Option<FilePayload>,
}

impl PostData<serde_json::Value> {
    pub fn options_as<U: DeserializeOwned>(&self) -> Result<U, WebsiteError> {
        serde_json::from_value(self.options.clone())
            .map_err(|e| WebsiteError::InvalidOptions(e.to_string()))
    }
}

impl<T> PostData<T> {
    /// Rating or an error naming the website that needs one
    pub fn require_rating(&self, website: WebsiteId) -> Result<SubmissionRating, WebsiteError> {
        self.rating.ok_or_else(|| {
            WebsiteError::InvalidOptions(format!("{} requires a rating", website.display_name()))
        })
    }
}

// ============================================================================
// Results
// ============================================================================

/// Validation feedback for one account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationParts {
    /// Blocking issues
    pub problems: Vec<String>,
    /// Informational notes, resolved automatically at post time
    pub warnings: Vec<String>,
}

impl ValidationParts {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problem(&mut self, message: impl Into<String>) {
        self.problems.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationParts) {
        self.problems.extend(other.problems);
        self.warnings.extend(other.warnings);
    }
}

/// Terminal record of one post attempt for one account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostResponse {
    pub message: String,
    /// URL of the published submission, when the website reveals it
    pub source: Option<String>,
    /// Diagnostic payload, usually the offending response body
    pub additional_info: Option<String>,
    pub time: DateTime<Utc>,
    pub website: WebsiteId,
}

impl PostResponse {
    pub fn success(website: WebsiteId, source: Option<String>) -> Self {
        Self {
            message: format!("Posted to {}", website.display_name()),
            source,
            additional_info: None,
            time: Utc::now(),
            website,
        }
    }

    /// Failure record; blank messages become [`UNKNOWN_ERROR`]
    pub fn failure(website: WebsiteId, message: Option<String>, additional_info: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        Self {
            message,
            source: None,
            additional_info,
            time: Utc::now(),
            website,
        }
    }

    pub fn from_error(website: WebsiteId, error: &WebsiteError) -> Self {
        Self::failure(
            website,
            Some(error.to_string()),
            error.body().map(str::to_string),
        )
    }
}

/// How a post attempt for one account ended
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Succeeded(PostResponse),
    Failed(PostResponse),
    Cancelled,
}

impl PostOutcome {
    pub fn response(&self) -> Option<&PostResponse> {
        match self {
            PostOutcome::Succeeded(r) | PostOutcome::Failed(r) => Some(r),
            PostOutcome::Cancelled => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PostOutcome::Succeeded(_))
    }
}

/// Result of a login check
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    pub logged_in: bool,
    pub username: Option<String>,
    /// Adapter-specific data the caller may persist (refreshed tokens etc.)
    pub data: Option<serde_json::Value>,
}

impl LoginResponse {
    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn logged_in(username: impl Into<String>) -> Self {
        Self {
            logged_in: true,
            username: Some(username.into()),
            data: None,
        }
    }
}

/// Byte ceiling handed to the image scaler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingOptions {
    pub max_size: u64,
}
