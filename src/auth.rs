//! Authentication state: access tokens, persisted sessions and the offline
//! credential cache, plus the seams to the hosted auth backend.

pub mod offline;
pub mod session;
pub mod token;

use crate::config::ApiConfig;
use crate::error::app_error::AppError;
use crate::models::session::{DeviceInfo, GeoLocation, SessionUser};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Result of a successful online sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: SessionUser,
    pub access_token: String,
}

/// Hosted authentication provider.
///
/// Implementations return [`AppError::NetworkUnavailable`] when the provider cannot be
/// reached, which lets the caller fall back to offline credentials.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AppError>;
    async fn sign_out(&self, access_token: Option<&str>) -> Result<(), AppError>;
    async fn refresh(&self, access_token: &str) -> Result<String, AppError>;
}

/// Source of the current device fingerprint.
pub trait DeviceProbe: Send + Sync {
    fn device_info(&self) -> DeviceInfo;
}

/// A probe that always reports the same device.
#[derive(Debug, Clone)]
pub struct StaticDeviceProbe(pub DeviceInfo);

impl DeviceProbe for StaticDeviceProbe {
    fn device_info(&self) -> DeviceInfo {
        self.0.clone()
    }
}

#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<GeoLocation, AppError>;
}

/// Caller allowed to read the ingested audit trail.
///
/// Presents `Authorization: Bearer <read_token>`. With no `read_token` configured
/// every read is refused.
#[derive(Debug, Clone, Copy)]
pub struct AuditReader;

fn bearer_token<'a>(req: &'a Request<'_>) -> Option<&'a str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuditReader {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(api) = req.rocket().state::<ApiConfig>() else {
            return Outcome::Error((Status::InternalServerError, AppError::Unauthorized));
        };
        let Some(expected) = api.read_token.as_deref().filter(|token| !token.is_empty()) else {
            warn!(uri = %req.uri(), "audit read refused: no read token configured");
            return Outcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        match bearer_token(req) {
            Some(presented) if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) => Outcome::Success(AuditReader),
            _ => Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
        }
    }
}
