use crate::auth::{DeviceProbe, LocationProvider};
use crate::config::SessionConfig;
use crate::error::app_error::AppError;
use crate::models::session::{ConflictField, DeviceInfo, GeoLocation, Session, SessionConflict, SessionInfo, SessionUser};
use crate::storage::{BrowserStorage, StorageScope, keys};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Persists the signed-in user across reloads.
///
/// Remembered sessions live in local scope, everything else in session scope; saving
/// one clears the other so at most one session is active.
pub struct SessionManager {
    storage: BrowserStorage,
    config: SessionConfig,
    device_probe: Arc<dyn DeviceProbe>,
    location_provider: Option<Arc<dyn LocationProvider>>,
}

impl SessionManager {
    pub fn new(storage: BrowserStorage, config: SessionConfig, device_probe: Arc<dyn DeviceProbe>) -> Self {
        Self {
            storage,
            config,
            device_probe,
            location_provider: None,
        }
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location_provider = Some(provider);
        self
    }

    fn session_timeout(&self) -> Duration {
        Duration::hours(self.config.session_timeout_hours)
    }

    fn activity_timeout(&self) -> Duration {
        Duration::hours(self.config.activity_timeout_hours)
    }

    async fn capture_location(&self) -> Option<GeoLocation> {
        let provider = self.location_provider.as_ref()?;
        let timeout = std::time::Duration::from_millis(self.config.geolocation_timeout_ms);

        match tokio::time::timeout(timeout, provider.current_location()).await {
            Ok(Ok(location)) => Some(location),
            Ok(Err(e)) => {
                debug!(error = %e, "geolocation unavailable");
                None
            }
            Err(_) => {
                debug!("geolocation timed out");
                None
            }
        }
    }

    pub async fn save_session(&self, user: SessionUser, remember_me: bool, offline: bool) -> Result<Session, AppError> {
        let login_location = self.capture_location().await;
        self.save_session_at(user, remember_me, offline, login_location, Utc::now())
    }

    pub fn save_session_at(
        &self,
        user: SessionUser,
        remember_me: bool,
        offline: bool,
        login_location: Option<GeoLocation>,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let session = Session {
            user,
            last_activity: now,
            created_at: now,
            device_info: self.device_probe.device_info(),
            session_id: Uuid::new_v4().to_string(),
            login_location,
            remember_me,
            offline,
        };

        let (target, other) = scopes_for(remember_me);
        self.storage.write_json(target, keys::SESSION, &session)?;
        self.storage.remove(other, keys::SESSION)?;

        info!(
            session_id = %session.session_id,
            user_id = %session.user.id,
            remember_me = remember_me,
            offline = offline,
            "session saved"
        );
        Ok(session)
    }

    fn stored_session(&self) -> Result<Option<(Session, StorageScope)>, AppError> {
        if let Some(session) = self.storage.read_json::<Session>(StorageScope::Local, keys::SESSION)? {
            return Ok(Some((session, StorageScope::Local)));
        }
        Ok(self
            .storage
            .read_json::<Session>(StorageScope::Session, keys::SESSION)?
            .map(|session| (session, StorageScope::Session)))
    }

    fn is_expired(&self, session: &Session, scope: StorageScope, now: DateTime<Utc>) -> bool {
        let idle = now - session.last_activity;
        if idle > self.session_timeout() {
            return true;
        }
        scope == StorageScope::Session && idle > self.activity_timeout()
    }

    pub fn load_session(&self) -> Result<Option<Session>, AppError> {
        self.load_session_at(Utc::now())
    }

    /// Active session, or `None`. Expired sessions are removed from storage.
    pub fn load_session_at(&self, now: DateTime<Utc>) -> Result<Option<Session>, AppError> {
        let Some((session, scope)) = self.stored_session()? else {
            return Ok(None);
        };

        if self.is_expired(&session, scope, now) {
            info!(session_id = %session.session_id, scope = ?scope, "session expired");
            self.storage.remove(scope, keys::SESSION)?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub fn update_activity(&self) -> Result<bool, AppError> {
        self.update_activity_at(Utc::now())
    }

    /// Refresh `last_activity`, writing at most once per throttle interval.
    pub fn update_activity_at(&self, now: DateTime<Utc>) -> Result<bool, AppError> {
        let Some((mut session, scope)) = self.stored_session()? else {
            return Ok(false);
        };
        if self.is_expired(&session, scope, now) {
            return Ok(false);
        }
        if now - session.last_activity < Duration::seconds(self.config.activity_throttle_seconds) {
            return Ok(false);
        }

        session.last_activity = now;
        self.storage.write_json(scope, keys::SESSION, &session)?;
        Ok(true)
    }

    /// Compare the stored fingerprint against `current`. A mismatch is a heuristic
    /// signal only: browser updates change the user agent too.
    pub fn check_session_conflict(&self, current: &DeviceInfo) -> Result<Option<SessionConflict>, AppError> {
        let Some((session, _)) = self.stored_session()? else {
            return Ok(None);
        };

        let mut fields = Vec::new();
        if session.device_info.user_agent != current.user_agent {
            fields.push(ConflictField::UserAgent);
        }
        if session.device_info.screen_resolution != current.screen_resolution {
            fields.push(ConflictField::ScreenResolution);
        }

        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(SessionConflict {
                session_id: session.session_id,
                fields,
            }))
        }
    }

    pub fn session_info_at(&self, now: DateTime<Utc>) -> Result<Option<SessionInfo>, AppError> {
        let Some(session) = self.load_session_at(now)? else {
            return Ok(None);
        };

        Ok(Some(SessionInfo {
            expires_at: session.last_activity + self.session_timeout(),
            idle_expires_at: (!session.remember_me).then(|| session.last_activity + self.activity_timeout()),
            session_id: session.session_id,
            user_id: session.user.id,
            remember_me: session.remember_me,
        }))
    }

    pub fn clear_session(&self) -> Result<(), AppError> {
        self.storage.remove(StorageScope::Local, keys::SESSION)?;
        self.storage.remove(StorageScope::Session, keys::SESSION)?;
        debug!("session cleared");
        Ok(())
    }
}

fn scopes_for(remember_me: bool) -> (StorageScope, StorageScope) {
    if remember_me {
        (StorageScope::Local, StorageScope::Session)
    } else {
        (StorageScope::Session, StorageScope::Local)
    }
}
