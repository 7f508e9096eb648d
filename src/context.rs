use crate::Config;
use crate::audit::{AuditLogger, sink::sink_for};
use crate::auth::offline::OfflineAuth;
use crate::auth::session::SessionManager;
use crate::auth::token::TokenStore;
use crate::auth::{AuthBackend, DeviceProbe, LocationProvider, SignedIn};
use crate::error::app_error::AppError;
use crate::middleware::SecurityMiddleware;
use crate::middleware::csrf::CsrfProtection;
use crate::middleware::rate_limit::RateLimiter;
use crate::models::audit::{AuditEvent, AuditOutcome, audit_events};
use crate::models::auth_state::{AuthState, Credentials};
use crate::models::offline::LockoutStatus;
use crate::models::security::RequestInfo;
use crate::models::session::{DeviceInfo, Session, SessionConflict, SessionUser};
use crate::models::token::TokenEvent;
use crate::storage::{BrowserStorage, StorageScope, keys};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owns the auth components for one client and the background tasks that drive them.
///
/// Built with [`AuthContext::init`] and torn down with [`AuthContext::shutdown`].
pub struct AuthContext {
    storage: BrowserStorage,
    backend: Arc<dyn AuthBackend>,
    tokens: Arc<TokenStore>,
    sessions: SessionManager,
    offline: OfflineAuth,
    security: SecurityMiddleware,
    audit: Arc<AuditLogger>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthContext {
    /// Construct every component and start the audit flush, rate-limit cleanup and
    /// token refresh tasks. Must be called from within a Tokio runtime.
    ///
    /// With a `location` provider, new sessions record a best-effort login location.
    pub async fn init(
        config: Config,
        storage: BrowserStorage,
        backend: Arc<dyn AuthBackend>,
        device_probe: Arc<dyn DeviceProbe>,
        location: Option<Arc<dyn LocationProvider>>,
    ) -> Result<Arc<Self>, AppError> {
        let audit = Arc::new(AuditLogger::new(storage.clone(), config.audit.clone(), sink_for(&config.audit)?));
        let rate_limiter = Arc::new(RateLimiter::new(&config.security));
        let security = SecurityMiddleware::new(
            config.security.clone(),
            CsrfProtection::new(storage.clone()),
            rate_limiter.clone(),
            audit.clone(),
        );

        let mut sessions = SessionManager::new(storage.clone(), config.session.clone(), device_probe);
        if let Some(provider) = location {
            sessions = sessions.with_location_provider(provider);
        }

        let context = Arc::new(Self {
            tokens: Arc::new(TokenStore::new(config.token.clone())),
            sessions,
            offline: OfflineAuth::new(storage.clone(), config.offline.clone()),
            storage,
            backend,
            security,
            audit: audit.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let refresh_listener = spawn_refresh_listener(Arc::downgrade(&context), context.tokens.subscribe());
        context
            .tasks
            .lock()
            .await
            .extend([audit.spawn_flush_task(), rate_limiter.spawn_cleanup_task(), refresh_listener]);

        info!(environment = ?config.audit.environment, "auth context initialized");
        Ok(context)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn offline(&self) -> &OfflineAuth {
        &self.offline
    }

    pub fn security(&self) -> &SecurityMiddleware {
        &self.security
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn auth_state(&self) -> Result<Option<AuthState>, AppError> {
        self.storage.read_json(StorageScope::Local, keys::AUTH_STATE)
    }

    /// Connectivity changed. Coming back online triggers an audit flush.
    pub fn set_online(&self, online: bool) {
        self.audit.set_online(online);
    }

    /// Sign in against the backend, falling back to cached credentials when the
    /// backend cannot be reached.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AppError> {
        match self.backend.sign_in(&credentials.email, &credentials.password).await {
            Ok(signed_in) => self.complete_online_login(signed_in, credentials).await,
            Err(AppError::NetworkUnavailable) => {
                info!(email = %credentials.email, "auth backend unreachable, trying offline credentials");
                self.audit.set_online(false);
                self.login_offline(&credentials.email, &credentials.password, credentials.remember_me)
                    .await
            }
            Err(e) => {
                self.audit
                    .log_audit_event(
                        audit_events::LOGIN_FAILED,
                        AuditOutcome::Failure,
                        "Online sign-in rejected",
                        json!({ "email": credentials.email, "reason": e.to_string() }),
                        Some(&credentials.email),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn complete_online_login(&self, signed_in: SignedIn, credentials: &Credentials) -> Result<Session, AppError> {
        self.audit.set_online(true);
        self.tokens.set_access_token(signed_in.access_token).await?;

        let session = self.sessions.save_session(signed_in.user, credentials.remember_me, false).await?;
        self.offline.store_offline_credentials(&credentials.email, &credentials.password)?;
        self.security.csrf().generate_token()?;
        self.write_auth_state(&session.user.id, false)?;

        self.record_login(audit_events::LOGIN_SUCCESS, "Signed in", &session).await;
        Ok(session)
    }

    /// Sign in with the cached verifier from the last online login.
    pub async fn login_offline(&self, email: &str, password: &str, remember_me: bool) -> Result<Session, AppError> {
        self.login_offline_at(email, password, remember_me, Utc::now()).await
    }

    pub async fn login_offline_at(&self, email: &str, password: &str, remember_me: bool, now: DateTime<Utc>) -> Result<Session, AppError> {
        if !self.offline.has_offline_credentials(email)? {
            self.offline_failure(email, AuditOutcome::Failure, "No cached credentials for this account")
                .await;
            return Err(AppError::NoOfflineCredentials);
        }
        if self.offline.credentials_stale_at(now)? {
            self.offline_failure(email, AuditOutcome::Blocked, "Cached credentials are stale").await;
            return Err(AppError::StaleOfflineCredentials);
        }

        match self.offline.verify_offline_credentials_at(email, password, now) {
            Ok(true) => {}
            Ok(false) => {
                if let Some(LockoutStatus::Locked { until }) = self.offline.lockout_status_at(now)? {
                    self.audit
                        .log_audit_event(
                            audit_events::ACCOUNT_LOCKED,
                            AuditOutcome::Blocked,
                            "Offline sign-in locked after repeated failures",
                            json!({ "email": email, "lockoutUntil": until }),
                            Some(email),
                        )
                        .await;
                    self.offline_failure(email, AuditOutcome::Failure, "Incorrect password").await;
                    return Err(AppError::AccountLocked { until });
                }
                self.offline_failure(email, AuditOutcome::Failure, "Incorrect password").await;
                return Err(AppError::InvalidCredentials);
            }
            Err(AppError::AccountLocked { until }) => {
                self.offline_failure(email, AuditOutcome::Blocked, "Sign-in attempted while locked").await;
                return Err(AppError::AccountLocked { until });
            }
            Err(e) => return Err(e),
        }

        let user_id = self
            .auth_state()?
            .and_then(|state| state.user_id)
            .unwrap_or_else(|| email.to_string());
        let user = SessionUser {
            id: user_id,
            email: email.to_string(),
            name: None,
            role: None,
        };

        let session = self.sessions.save_session(user, remember_me, true).await?;
        self.security.csrf().generate_token()?;
        self.write_auth_state(&session.user.id, true)?;

        self.record_login(audit_events::OFFLINE_LOGIN_SUCCESS, "Signed in offline", &session)
            .await;
        Ok(session)
    }

    async fn offline_failure(&self, email: &str, outcome: AuditOutcome, message: &str) {
        self.audit
            .log_audit_event(
                audit_events::OFFLINE_LOGIN_FAILED,
                outcome,
                message,
                json!({ "email": email }),
                Some(email),
            )
            .await;
    }

    async fn record_login(&self, event_type: &str, message: &str, session: &Session) {
        let details = json!({
            "rememberMe": session.remember_me,
            "offline": session.offline,
            "userAgent": session.device_info.user_agent,
        });
        for (event_type, message) in [(event_type, message), (audit_events::SESSION_CREATED, "Session created")] {
            let event = AuditEvent::new(event_type, AuditOutcome::Success, message, details.clone(), Utc::now())
                .with_user(Some(session.user.id.clone()))
                .with_session(Some(session.session_id.clone()));
            self.audit.log_event(event).await;
        }
    }

    fn write_auth_state(&self, user_id: &str, offline_mode: bool) -> Result<(), AppError> {
        let state = AuthState {
            is_authenticated: true,
            user_id: Some(user_id.to_string()),
            offline_mode,
            updated_at: Utc::now(),
        };
        self.storage.write_json(StorageScope::Local, keys::AUTH_STATE, &state)
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn logout(&self) -> Result<(), AppError> {
        let session = self.sessions.load_session().ok().flatten();
        let token = self.tokens.get_access_token().await;

        let backend_result = self.backend.sign_out(token.as_deref()).await;
        if let Err(e) = &backend_result {
            warn!(error = %e, "backend sign-out failed, clearing local state anyway");
        }

        self.tokens.clear_access_token().await;
        let cleared = [
            self.sessions.clear_session(),
            self.storage.remove(StorageScope::Local, keys::AUTH_STATE),
            self.security.csrf().clear(),
        ];

        let event = AuditEvent::new(
            audit_events::LOGOUT,
            AuditOutcome::Success,
            "Signed out",
            json!({ "backendSignOut": backend_result.is_ok() }),
            Utc::now(),
        )
        .with_user(session.as_ref().map(|s| s.user.id.clone()))
        .with_session(session.map(|s| s.session_id));
        self.audit.log_event(event).await;

        cleared.into_iter().collect::<Result<Vec<()>, AppError>>().map(|_| ())
    }

    /// The active session, refreshing its activity timestamp.
    pub async fn check_auth(&self) -> Result<Session, AppError> {
        self.check_auth_at(Utc::now()).await
    }

    pub async fn check_auth_at(&self, now: DateTime<Utc>) -> Result<Session, AppError> {
        if let Some(session) = self.sessions.load_session_at(now)? {
            self.sessions.update_activity_at(now)?;
            return Ok(session);
        }

        if let Some(state) = self.auth_state()?.filter(|state| state.is_authenticated) {
            self.audit
                .log_audit_event(
                    audit_events::SESSION_EXPIRED,
                    AuditOutcome::Success,
                    "Session expired",
                    json!({ "offlineMode": state.offline_mode }),
                    state.user_id.as_deref(),
                )
                .await;
            self.storage.remove(StorageScope::Local, keys::AUTH_STATE)?;
            self.tokens.clear_access_token().await;
        }
        Err(AppError::SessionExpired)
    }

    /// Load a persisted session on startup. Returns `None` when there is nothing to restore.
    pub async fn restore(&self) -> Result<Option<Session>, AppError> {
        let Some(session) = self.sessions.load_session()? else {
            return Ok(None);
        };

        let event = AuditEvent::new(
            audit_events::SESSION_RESTORED,
            AuditOutcome::Success,
            "Session restored",
            json!({ "offline": session.offline }),
            Utc::now(),
        )
        .with_user(Some(session.user.id.clone()))
        .with_session(Some(session.session_id.clone()));
        self.audit.log_event(event).await;
        Ok(Some(session))
    }

    /// The app became visible again: re-validate the session and compare device fingerprints.
    pub async fn resume(&self, current_device: &DeviceInfo) -> Result<Option<SessionConflict>, AppError> {
        let session = self.check_auth().await?;

        let Some(conflict) = self.sessions.check_session_conflict(current_device)? else {
            return Ok(None);
        };

        warn!(session_id = %conflict.session_id, fields = ?conflict.fields, "device fingerprint changed");
        let event = AuditEvent::new(
            audit_events::SESSION_CONFLICT,
            AuditOutcome::Failure,
            "Session resumed from a different device fingerprint",
            json!({
                "fields": conflict.fields,
                "storedUserAgent": session.device_info.user_agent,
                "currentUserAgent": current_device.user_agent,
            }),
            Utc::now(),
        )
        .with_user(Some(session.user.id))
        .with_session(Some(conflict.session_id.clone()));
        self.audit.log_event(event).await;
        Ok(Some(conflict))
    }

    /// Screen an outgoing request. State-changing requests without a CSRF token get the
    /// current one attached before the checks run.
    pub async fn guard_request(&self, mut request: RequestInfo) -> Result<RequestInfo, AppError> {
        if request.csrf_token.is_none() && request.method.is_state_changing() {
            request.csrf_token = self.security.csrf().current_token()?;
        }
        self.security.validate_request_security(&request).await?;
        self.sessions.update_activity()?;
        Ok(request)
    }

    /// Exchange the current access token for a fresh one.
    pub async fn refresh_token(&self) -> Result<String, AppError> {
        let Some(current) = self.tokens.get_access_token().await else {
            return Err(AppError::Unauthorized);
        };
        let user_id = self.sessions.load_session().ok().flatten().map(|s| s.user.id);

        match self.backend.refresh(&current).await {
            Ok(token) => {
                let claims = self.tokens.set_access_token(token.clone()).await?;
                self.audit
                    .log_audit_event(
                        audit_events::TOKEN_REFRESHED,
                        AuditOutcome::Success,
                        "Access token refreshed",
                        json!({ "expiresAt": claims.exp }),
                        user_id.as_deref(),
                    )
                    .await;
                Ok(token)
            }
            Err(e) => {
                if !matches!(e, AppError::NetworkUnavailable) {
                    self.tokens.clear_access_token().await;
                }
                self.audit
                    .log_audit_event(
                        audit_events::TOKEN_REFRESH_FAILED,
                        AuditOutcome::Failure,
                        "Access token refresh failed",
                        json!({ "reason": e.to_string() }),
                        user_id.as_deref(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Stop background tasks and push any buffered audit events.
    pub async fn shutdown(&self) -> Result<usize, AppError> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.tokens.clear_access_token().await;

        let flushed = self.audit.flush().await?;
        info!(flushed, "auth context shut down");
        Ok(flushed)
    }
}

fn spawn_refresh_listener(context: Weak<AuthContext>, mut events: tokio::sync::broadcast::Receiver<TokenEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TokenEvent::Expiring { expires_at }) => {
                    let Some(context) = context.upgrade() else {
                        break;
                    };
                    debug!(expires_at, "refreshing expiring access token");
                    if let Err(e) = context.refresh_token().await {
                        warn!(error = %e, "scheduled token refresh failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "token events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
