use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::utils::keys::is_key_safe;

/// Default grant lifetime: 5 minutes
pub const DEFAULT_EXPIRATION_SECONDS: u64 = 300;
pub const MIN_EXPIRATION_SECONDS: u64 = 60;
pub const MAX_EXPIRATION_SECONDS: u64 = 3600;

/// Default upload ceiling: 50 MB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MIN_MAX_FILE_SIZE: u64 = 1024;
pub const MAX_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Content types accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum FileType {
    #[serde(rename = "application/json")]
    Json,
    #[default]
    #[serde(rename = "application/xml")]
    Xml,
    #[serde(rename = "text/csv")]
    Csv,
    #[serde(rename = "text/plain")]
    Text,
}

impl FileType {
    pub fn mime(&self) -> &'static str {
        match self {
            FileType::Json => "application/json",
            FileType::Xml => "application/xml",
            FileType::Csv => "text/csv",
            FileType::Text => "text/plain",
        }
    }

    /// Extension used when the key has to be derived without a filename
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Json => "json",
            FileType::Xml => "xml",
            FileType::Csv => "csv",
            FileType::Text => "txt",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

fn default_expiration() -> u64 {
    DEFAULT_EXPIRATION_SECONDS
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.chars().any(is_key_safe) {
        Ok(())
    } else {
        let mut err = ValidationError::new("user_id_charset");
        err.message =
            Some("user_id must contain at least one letter, digit, '.', '-' or '_'".into());
        Err(err)
    }
}

/// Request for a direct-to-store upload grant
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct UploadRequest {
    /// Unique user identifier
    #[validate(
        length(min = 1, max = 100, message = "user_id must be between 1 and 100 characters"),
        custom(function = "validate_user_id")
    )]
    pub user_id: String,

    /// MIME type of the file
    #[serde(default)]
    pub file_type: FileType,

    /// Optional custom filename
    #[validate(length(max = 200, message = "filename must be at most 200 characters"))]
    #[serde(default)]
    pub filename: Option<String>,

    /// Grant lifetime in seconds (1 min - 1 hour)
    #[validate(range(
        min = 60,
        max = 3600,
        message = "expiration_seconds must be between 60 and 3600"
    ))]
    #[serde(default = "default_expiration")]
    pub expiration_seconds: u64,

    /// Maximum accepted object size in bytes (1 KB - 500 MB)
    #[validate(range(
        min = 1024,
        max = 524288000,
        message = "max_file_size must be between 1 KB and 500 MB"
    ))]
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl UploadRequest {
    /// Build a validated request. Fails before any store call when a bound is violated.
    pub fn new(
        user_id: impl Into<String>,
        file_type: FileType,
        filename: Option<String>,
        expiration_seconds: Option<u64>,
        max_file_size: Option<u64>,
    ) -> Result<Self, ValidationErrors> {
        let request = Self {
            user_id: user_id.into(),
            file_type,
            filename,
            expiration_seconds: expiration_seconds.unwrap_or(DEFAULT_EXPIRATION_SECONDS),
            max_file_size: max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Constrained upload grant the client posts its file with
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadGrant {
    pub upload_url: String,
    pub form_fields: BTreeMap<String, String>,
    pub file_key: String,
    pub expires_in: u64,
    pub max_file_size: u64,
    pub content_type: String,
    pub bucket: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmUploadParams {
    pub file_key: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileInfo {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadConfirmation {
    pub status: String,
    pub message: String,
    pub file_info: FileInfo,
}

/// A single object-store change extracted from a queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub bucket: String,
    pub key: String,
    pub event_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MessageOutcome {
    pub message_id: String,
    pub dispatched: usize,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one poll cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PollSummary {
    /// Conversion tasks dispatched
    pub messages_processed: usize,
    pub total_messages: usize,
    pub messages_acknowledged: usize,
    pub messages_failed: usize,
    pub messages: Vec<MessageOutcome>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub queue: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let req: UploadRequest = serde_json::from_str(r#"{"user_id": "1"}"#).unwrap();
        assert_eq!(req.file_type, FileType::Xml);
        assert_eq!(req.expiration_seconds, DEFAULT_EXPIRATION_SECONDS);
        assert_eq!(req.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_file_type_wire_names() {
        let ft: FileType = serde_json::from_str(r#""text/csv""#).unwrap();
        assert_eq!(ft, FileType::Csv);
        assert!(serde_json::from_str::<FileType>(r#""image/png""#).is_err());
        assert_eq!(serde_json::to_string(&FileType::Json).unwrap(), r#""application/json""#);
    }

    #[test]
    fn test_bounds_rejected() {
        assert!(UploadRequest::new("1", FileType::Xml, None, Some(59), None).is_err());
        assert!(UploadRequest::new("1", FileType::Xml, None, Some(3601), None).is_err());
        assert!(UploadRequest::new("1", FileType::Xml, None, None, Some(1023)).is_err());
        let xml = |expiration, size| UploadRequest::new("1", FileType::Xml, None, expiration, size);
        assert!(xml(None, Some(MAX_MAX_FILE_SIZE + 1)).is_err());
        assert!(xml(Some(60), Some(MIN_MAX_FILE_SIZE)).is_ok());
        assert!(xml(Some(3600), Some(MAX_MAX_FILE_SIZE)).is_ok());
    }

    #[test]
    fn test_user_id_rules() {
        assert!(UploadRequest::new("", FileType::Xml, None, None, None).is_err());
        assert!(UploadRequest::new("x".repeat(101), FileType::Xml, None, None, None).is_err());
        assert!(UploadRequest::new("@@@", FileType::Xml, None, None, None).is_err());
        assert!(UploadRequest::new("user@1", FileType::Xml, None, None, None).is_ok());
    }

    #[test]
    fn test_filename_length() {
        let long = Some("a".repeat(201));
        assert!(UploadRequest::new("1", FileType::Xml, long, None, None).is_err());
        let ok = Some("a".repeat(200));
        assert!(UploadRequest::new("1", FileType::Xml, ok, None, None).is_ok());
    }
}
