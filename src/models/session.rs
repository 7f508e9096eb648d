use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Fingerprint of the device a session was created on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub screen_resolution: String,
    /// Running as an installed PWA.
    pub is_standalone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: SessionUser,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub device_info: DeviceInfo,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_location: Option<GeoLocation>,
    pub remember_me: bool,
    /// Created from cached offline credentials rather than an online sign-in.
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictField {
    UserAgent,
    ScreenResolution,
}

/// Device fingerprint mismatch between the stored session and the current device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConflict {
    pub session_id: String,
    pub fields: Vec<ConflictField>,
}

/// Remaining lifetime of the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub remember_me: bool,
    pub expires_at: DateTime<Utc>,
    /// `None` for remembered sessions, which have no inactivity deadline.
    pub idle_expires_at: Option<DateTime<Utc>>,
}
