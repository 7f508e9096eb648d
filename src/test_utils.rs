use crate::auth::{AuthBackend, LocationProvider, SignedIn};
use crate::audit::AuditSink;
use crate::error::app_error::AppError;
use crate::models::audit::AuditEvent;
use crate::models::session::{DeviceInfo, GeoLocation, SessionUser};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";

/// Unsigned JWT-shaped token with the given expiry and subject.
pub fn make_token(exp: i64, sub: Option<&str>) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
    let mut claims = json!({ "exp": exp, "iat": exp - 3600, "email": "grower@example.com" });
    if let Some(sub) = sub {
        claims["sub"] = json!(sub);
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn test_user() -> SessionUser {
    SessionUser {
        id: "user-1".to_string(),
        email: "grower@example.com".to_string(),
        name: Some("Pat Grower".to_string()),
        role: Some("admin".to_string()),
    }
}

pub fn test_device() -> DeviceInfo {
    DeviceInfo {
        user_agent: BROWSER_UA.to_string(),
        screen_resolution: "1440x900".to_string(),
        is_standalone: false,
        platform: Some("MacIntel".to_string()),
        language: Some("en-US".to_string()),
        timezone: Some("America/Chicago".to_string()),
    }
}

pub struct FixedLocation;

#[async_trait::async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<GeoLocation, AppError> {
        Ok(GeoLocation {
            latitude: 41.8781,
            longitude: -87.6298,
            accuracy: Some(25.0),
        })
    }
}

pub struct FailingLocation;

#[async_trait::async_trait]
impl LocationProvider for FailingLocation {
    async fn current_location(&self) -> Result<GeoLocation, AppError> {
        Err(AppError::Backend("permission denied".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<AuditEvent>>>,
}

impl RecordingSink {
    pub async fn batches(&self) -> Vec<Vec<AuditEvent>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for RecordingSink {
    async fn send(&self, events: &[AuditEvent]) -> Result<(), AppError> {
        self.batches.lock().await.push(events.to_vec());
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait::async_trait]
impl AuditSink for FailingSink {
    async fn send(&self, _events: &[AuditEvent]) -> Result<(), AppError> {
        Err(AppError::NetworkUnavailable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Online,
    Unreachable,
}

/// Auth backend with a single valid account, `grower@example.com` / `correct horse`.
pub struct MockBackend {
    mode: StdMutex<BackendMode>,
    fail_refresh: StdMutex<bool>,
    pub sign_out_calls: AtomicUsize,
}

pub const MOCK_PASSWORD: &str = "correct horse";

impl MockBackend {
    pub fn new(mode: BackendMode) -> Self {
        Self {
            mode: StdMutex::new(mode),
            fail_refresh: StdMutex::new(false),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn fail_refresh(&self) {
        *self.fail_refresh.lock().unwrap() = true;
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    fn mode(&self) -> BackendMode {
        *self.mode.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl AuthBackend for MockBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
        if self.mode() == BackendMode::Unreachable {
            return Err(AppError::NetworkUnavailable);
        }
        if email != test_user().email || password != MOCK_PASSWORD {
            return Err(AppError::InvalidCredentials);
        }
        Ok(SignedIn {
            user: test_user(),
            access_token: make_token((Utc::now() + Duration::hours(1)).timestamp(), Some("user-1")),
        })
    }

    async fn sign_out(&self, _access_token: Option<&str>) -> Result<(), AppError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            BackendMode::Online => Ok(()),
            BackendMode::Unreachable => Err(AppError::NetworkUnavailable),
        }
    }

    async fn refresh(&self, _access_token: &str) -> Result<String, AppError> {
        if self.mode() == BackendMode::Unreachable {
            return Err(AppError::NetworkUnavailable);
        }
        if *self.fail_refresh.lock().unwrap() {
            return Err(AppError::Unauthorized);
        }
        Ok(make_token((Utc::now() + Duration::hours(2)).timestamp(), Some("user-1")))
    }
}
