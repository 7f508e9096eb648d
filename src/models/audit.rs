use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

/// Event types for the security audit log.
///
/// The segment before the first `.` selects the [`AuditCategory`].
pub mod audit_events {
    // Authentication events
    pub const LOGIN_SUCCESS: &str = "auth.login_success";
    pub const LOGIN_FAILED: &str = "auth.login_failed";
    pub const OFFLINE_LOGIN_SUCCESS: &str = "auth.offline_login_success";
    pub const OFFLINE_LOGIN_FAILED: &str = "auth.offline_login_failed";
    pub const LOGOUT: &str = "auth.logout";
    pub const ACCOUNT_LOCKED: &str = "auth.account_locked";
    pub const TOKEN_REFRESHED: &str = "auth.token_refreshed";
    pub const TOKEN_REFRESH_FAILED: &str = "auth.token_refresh_failed";

    // Session events
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_EXPIRED: &str = "session.expired";
    pub const SESSION_RESTORED: &str = "session.restored";

    // Security events
    pub const CSRF_VIOLATION: &str = "security.csrf_violation";
    pub const XSS_ATTEMPT: &str = "security.xss_attempt";
    pub const SQL_INJECTION_ATTEMPT: &str = "security.sql_injection_attempt";
    pub const RATE_LIMIT_EXCEEDED: &str = "security.rate_limit_exceeded";
    pub const PAYLOAD_TOO_LARGE: &str = "security.payload_too_large";
    pub const SUSPICIOUS_USER_AGENT: &str = "security.suspicious_user_agent";
    pub const SESSION_CONFLICT: &str = "security.session_conflict";
    pub const SUSPICIOUS_ACTIVITY: &str = "security.suspicious_activity";

    // Data events
    pub const DATA_ACCESS: &str = "data.access";
    pub const DATA_EXPORT: &str = "data.export";

    // Administrative events
    pub const PERMISSION_CHANGED: &str = "admin.permission_changed";
    pub const CONFIG_CHANGED: &str = "admin.config_changed";

    // System events
    pub const SYSTEM_ERROR: &str = "system.error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    Session,
    Security,
    DataAccess,
    Administration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Blocked,
}

const CATEGORY_PREFIXES: &[(&str, AuditCategory)] = &[
    ("auth", AuditCategory::Authentication),
    ("session", AuditCategory::Session),
    ("security", AuditCategory::Security),
    ("data", AuditCategory::DataAccess),
    ("admin", AuditCategory::Administration),
    ("system", AuditCategory::System),
];

const SEVERITY_OVERRIDES: &[(&str, AuditSeverity)] = &[
    (audit_events::LOGIN_FAILED, AuditSeverity::Medium),
    (audit_events::OFFLINE_LOGIN_FAILED, AuditSeverity::Medium),
    (audit_events::ACCOUNT_LOCKED, AuditSeverity::High),
    (audit_events::TOKEN_REFRESH_FAILED, AuditSeverity::Medium),
    (audit_events::SESSION_EXPIRED, AuditSeverity::Low),
    (audit_events::CSRF_VIOLATION, AuditSeverity::High),
    (audit_events::XSS_ATTEMPT, AuditSeverity::High),
    (audit_events::SQL_INJECTION_ATTEMPT, AuditSeverity::Critical),
    (audit_events::RATE_LIMIT_EXCEEDED, AuditSeverity::Medium),
    (audit_events::PAYLOAD_TOO_LARGE, AuditSeverity::Medium),
    (audit_events::SUSPICIOUS_USER_AGENT, AuditSeverity::Low),
    (audit_events::SESSION_CONFLICT, AuditSeverity::High),
    (audit_events::SUSPICIOUS_ACTIVITY, AuditSeverity::High),
    (audit_events::DATA_EXPORT, AuditSeverity::Medium),
    (audit_events::PERMISSION_CHANGED, AuditSeverity::High),
];

impl AuditCategory {
    /// Category implied by the event type's prefix; unknown prefixes are `System`.
    pub fn for_event_type(event_type: &str) -> Self {
        let prefix = event_type.split('.').next().unwrap_or_default();
        CATEGORY_PREFIXES
            .iter()
            .find(|(candidate, _)| *candidate == prefix)
            .map(|(_, category)| *category)
            .unwrap_or(AuditCategory::System)
    }

    fn default_severity(self) -> AuditSeverity {
        match self {
            AuditCategory::Authentication | AuditCategory::Session | AuditCategory::DataAccess => AuditSeverity::Low,
            AuditCategory::Administration | AuditCategory::System => AuditSeverity::Medium,
            AuditCategory::Security => AuditSeverity::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditCategory::Authentication => "authentication",
            AuditCategory::Session => "session",
            AuditCategory::Security => "security",
            AuditCategory::DataAccess => "data_access",
            AuditCategory::Administration => "administration",
            AuditCategory::System => "system",
        }
    }
}

impl AuditSeverity {
    pub fn for_event_type(event_type: &str) -> Self {
        SEVERITY_OVERRIDES
            .iter()
            .find(|(candidate, _)| *candidate == event_type)
            .map(|(_, severity)| *severity)
            .unwrap_or_else(|| AuditCategory::for_event_type(event_type).default_severity())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditSeverity::Low => "low",
            AuditSeverity::Medium => "medium",
            AuditSeverity::High => "high",
            AuditSeverity::Critical => "critical",
        }
    }
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub details: JsonValue,
    pub outcome: AuditOutcome,
    #[validate(length(max = 2048))]
    pub message: String,
}

impl AuditEvent {
    /// Build an event, deriving category and severity from `event_type`.
    pub fn new(event_type: &str, outcome: AuditOutcome, message: impl Into<String>, details: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            event_type: event_type.to_string(),
            category: AuditCategory::for_event_type(event_type),
            severity: AuditSeverity::for_event_type(event_type),
            user_id: None,
            session_id: None,
            details,
            outcome,
            message: message.into(),
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Wire payload for `POST /api/audit`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuditBatch {
    #[validate(length(min = 1), nested)]
    pub events: Vec<AuditEvent>,
}

/// Filter for querying stored events. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub category: Option<AuditCategory>,
    pub min_severity: Option<AuditSeverity>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.as_ref().is_none_or(|t| *t == event.event_type)
            && self.category.is_none_or(|c| c == event.category)
            && self.min_severity.is_none_or(|s| event.severity >= s)
            && self.user_id.as_ref().is_none_or(|u| event.user_id.as_ref() == Some(u))
            && self.since.is_none_or(|since| event.timestamp >= since)
            && self.until.is_none_or(|until| event.timestamp <= until)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total: usize,
    pub by_severity: std::collections::BTreeMap<String, usize>,
    pub by_category: std::collections::BTreeMap<String, usize>,
    pub failed_logins_last_24h: usize,
    pub blocked_last_24h: usize,
}
