use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Csrf,
    Xss,
    SqlInjection,
    RateLimit,
    PayloadTooLarge,
    SuspiciousUserAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Result of a single request check. Not persisted; only `blocked` violations abort
/// the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityViolation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: ViolationSeverity,
    pub message: String,
    pub details: JsonValue,
    pub blocked: bool,
}

impl SecurityViolation {
    pub fn new(violation_type: ViolationType, severity: ViolationSeverity, message: impl Into<String>, blocked: bool) -> Self {
        Self {
            violation_type,
            severity,
            message: message.into(),
            details: JsonValue::Null,
            blocked,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// HTTP verbs the middleware distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn is_state_changing(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete)
    }
}

/// Transport-neutral description of a request to screen.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: HttpMethod,
    pub endpoint: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub body: Option<JsonValue>,
    pub csrf_token: Option<String>,
}

impl RequestInfo {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            client_ip: client_ip.into(),
            user_agent: None,
            body: None,
            csrf_token: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }
}
