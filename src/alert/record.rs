use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const DEFAULT_ALERT_MESSAGE: &str = "Garbage detected! Cleanup required.";
pub const DEFAULT_LOCATION: &str = "Camera 1";

/// Length of a generated uid: 16 random bytes, hex encoded.
pub const UID_HEX_LEN: usize = 32;

const MAX_MESSAGE_CHARS: usize = 500;
const MAX_ASSIGNEE_CHARS: usize = 64;
const MAX_IMAGE_PATH_CHARS: usize = 512;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Pending,
    #[serde(alias = "in-progress")]
    InProgress,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::InProgress => "in_progress",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(AlertStatus::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(AlertStatus::InProgress),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(AlertError::Invalid(format!("unknown alert status '{}'", other))),
        }
    }
}

/// How an alert came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrigin {
    /// Raised by the presence state machine.
    Detection,
    /// Reported by a person through the API.
    Manual,
}

/// One stored alert.
///
/// `uid` is the stable identifier. `id` is the 1-based display index assigned
/// at creation, strictly increasing within a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: u64,
    pub uid: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub location: String,
    pub status: AlertStatus,
    pub origin: AlertOrigin,
    #[serde(rename = "assignedTo", default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(rename = "isRural", default, skip_serializing_if = "Option::is_none")]
    pub is_rural: Option<bool>,
}

impl AlertRecord {
    /// Timestamp as shown on the dashboard, e.g. `2024-05-01 12:00:00`.
    pub fn display_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Fields supplied when creating an alert.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NewAlert {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "assignedTo", default)]
    pub assigned_to: Option<String>,
    #[serde(default, alias = "imagePath")]
    pub image_path: Option<String>,
    #[serde(rename = "isRural", default)]
    pub is_rural: Option<bool>,
}

/// Partial update; absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AlertUpdate {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(rename = "assignedTo", default)]
    pub assigned_to: Option<String>,
}

impl AlertUpdate {
    pub fn status(status: AlertStatus) -> Self {
        Self {
            status: Some(status),
            assigned_to: None,
        }
    }
}

/// Reference to a stored alert by display index or uid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertRef {
    Seq(u64),
    Uid(String),
}

impl FromStr for AlertRef {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AlertError::Invalid("empty alert reference".to_string()));
        }
        let hex = s.chars().all(|c| c.is_ascii_hexdigit());
        if hex && s.len() == UID_HEX_LEN {
            return Ok(AlertRef::Uid(s.to_lowercase()));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            return s
                .parse::<u64>()
                .map(AlertRef::Seq)
                .map_err(|_| AlertError::Invalid(format!("alert id '{}' out of range", s)));
        }
        if hex {
            return Ok(AlertRef::Uid(s.to_lowercase()));
        }
        Err(AlertError::Invalid(format!("malformed alert reference '{}'", s)))
    }
}

impl fmt::Display for AlertRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertRef::Seq(id) => write!(f, "#{}", id),
            AlertRef::Uid(uid) => write!(f, "{}", uid),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertError {
    NotFound(AlertRef),
    Invalid(String),
    Unavailable(String),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::NotFound(r) => write!(f, "alert {} not found", r),
            AlertError::Invalid(msg) => write!(f, "invalid alert: {}", msg),
            AlertError::Unavailable(msg) => write!(f, "alert store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AlertError {}

pub fn validate_location(location: &str) -> Result<(), AlertError> {
    static LOCATION_RE: OnceLock<Result<regex::Regex, regex::Error>> = OnceLock::new();
    let re = LOCATION_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9 _.:-]{1,64}$"))
        .as_ref()
        .map_err(|e| AlertError::Invalid(format!("location pattern: {}", e)))?;
    if re.is_match(location) {
        Ok(())
    } else {
        Err(AlertError::Invalid(format!(
            "location '{}' must be 1-64 letters, digits, spaces or _.:-",
            location
        )))
    }
}

pub(crate) fn validate_message(message: &str) -> Result<(), AlertError> {
    if message.trim().is_empty() {
        return Err(AlertError::Invalid("message must not be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AlertError::Invalid(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

pub(crate) fn validate_assignee(assignee: &str) -> Result<(), AlertError> {
    if assignee.trim().is_empty() || assignee.chars().count() > MAX_ASSIGNEE_CHARS {
        return Err(AlertError::Invalid(format!(
            "assignee must be 1-{} characters",
            MAX_ASSIGNEE_CHARS
        )));
    }
    if assignee.chars().any(|c| c.is_control()) {
        return Err(AlertError::Invalid(
            "assignee contains control characters".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_image_path(path: &str) -> Result<(), AlertError> {
    if path.trim().is_empty() || path.chars().count() > MAX_IMAGE_PATH_CHARS {
        return Err(AlertError::Invalid(format!(
            "image path must be 1-{} characters",
            MAX_IMAGE_PATH_CHARS
        )));
    }
    Ok(())
}
