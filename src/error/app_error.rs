use crate::models::security::SecurityViolation;
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::Responder;
use rocket::{Request, Response};
use std::io::Cursor;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },
    #[error("No offline credentials available")]
    NoOfflineCredentials,
    #[error("Offline credentials are stale, sign in online to refresh them")]
    StaleOfflineCredentials,
    #[error("Session expired")]
    SessionExpired,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Network unavailable")]
    NetworkUnavailable,
    #[error("Authentication backend error: {0}")]
    Backend(String),
    #[error("Security violation: request blocked")]
    SecurityViolation { violations: Vec<SecurityViolation> },
    #[error("Storage error: {message}")]
    Storage { message: String },
    #[error("Storage error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Audit delivery failed: {message}")]
    AuditDelivery { message: String },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("Internal server error")]
    ConfigurationError {
        message: String,
        #[source]
        source: figment::Error,
    },
}

impl AppError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }

    /// Violations that caused the request to be rejected, empty for every other variant.
    pub fn violations(&self) -> &[SecurityViolation] {
        match self {
            AppError::SecurityViolation { violations } => violations,
            _ => &[],
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::io("I/O failure", e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::serialization("Invalid JSON", e)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            AppError::NetworkUnavailable
        } else {
            AppError::AuditDelivery { message: e.to_string() }
        }
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationError {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::InvalidCredentials => Status::Forbidden,
            AppError::AccountLocked { .. } => Status::Locked,
            AppError::NoOfflineCredentials => Status::Unauthorized,
            AppError::StaleOfflineCredentials => Status::Unauthorized,
            AppError::SessionExpired => Status::Unauthorized,
            AppError::Unauthorized => Status::Unauthorized,
            AppError::InvalidToken(_) => Status::Unauthorized,
            AppError::NetworkUnavailable => Status::ServiceUnavailable,
            AppError::Backend(_) => Status::BadGateway,
            AppError::SecurityViolation { .. } => Status::Forbidden,
            AppError::Storage { .. } => Status::InternalServerError,
            AppError::Io { .. } => Status::InternalServerError,
            AppError::Serialization { .. } => Status::BadRequest,
            AppError::AuditDelivery { .. } => Status::BadGateway,
            AppError::BadRequest(_) => Status::BadRequest,
            AppError::ValidationError(_) => Status::BadRequest,
            AppError::ConfigurationError { .. } => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        error!(
            error = ?self,
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "request failed"
        );

        let status = Status::from(&self);
        let body = self.to_string();

        Response::build().status(status).sized_body(body.len(), Cursor::new(body)).ok()
    }
}
