use crate::config::OfflineConfig;
use crate::error::app_error::AppError;
use crate::models::offline::{LockoutStatus, OfflineCredentials};
use crate::storage::{BrowserStorage, StorageScope, keys};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Hex SHA-256 of `password` followed by `email`.
pub fn hash_password(password: &str, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(email.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache of the last successful online login, allowing sign-in without network.
///
/// Only one identity is kept per device.
pub struct OfflineAuth {
    storage: BrowserStorage,
    config: OfflineConfig,
}

impl OfflineAuth {
    pub fn new(storage: BrowserStorage, config: OfflineConfig) -> Self {
        Self { storage, config }
    }

    fn load(&self) -> Result<Option<OfflineCredentials>, AppError> {
        self.storage.read_json(StorageScope::Local, keys::OFFLINE_CREDENTIALS)
    }

    fn save(&self, credentials: &OfflineCredentials) -> Result<(), AppError> {
        self.storage.write_json(StorageScope::Local, keys::OFFLINE_CREDENTIALS, credentials)
    }

    pub fn store_offline_credentials(&self, email: &str, password: &str) -> Result<(), AppError> {
        self.store_offline_credentials_at(email, password, Utc::now())
    }

    pub fn store_offline_credentials_at(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let credentials = OfflineCredentials {
            email: email.to_string(),
            password_hash: hash_password(password, email),
            last_sync: now,
            attempts: 0,
            lockout_until: None,
        };
        self.save(&credentials)?;
        info!(email = %email, "offline credentials cached");
        Ok(())
    }

    pub fn verify_offline_credentials(&self, email: &str, password: &str) -> Result<bool, AppError> {
        self.verify_offline_credentials_at(email, password, Utc::now())
    }

    /// Check `password` against the cached verifier.
    ///
    /// Errors with [`AppError::AccountLocked`] while a lockout is active. A different
    /// email than the cached one is a plain mismatch and does not count as an attempt.
    pub fn verify_offline_credentials_at(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let Some(mut credentials) = self.load()? else {
            return Ok(false);
        };

        if let Some(until) = credentials.lockout_until {
            if until > now {
                warn!(email = %email, until = %until, "offline login attempted while locked");
                return Err(AppError::AccountLocked { until });
            }
            credentials.lockout_until = None;
            credentials.attempts = 0;
        }

        if credentials.email != email {
            self.save(&credentials)?;
            return Ok(false);
        }

        if bool::from(hash_password(password, email).as_bytes().ct_eq(credentials.password_hash.as_bytes())) {
            credentials.attempts = 0;
            self.save(&credentials)?;
            return Ok(true);
        }

        credentials.attempts += 1;
        if credentials.attempts >= self.config.max_attempts {
            let until = now + Duration::minutes(self.config.lockout_minutes);
            credentials.lockout_until = Some(until);
            warn!(email = %email, attempts = credentials.attempts, until = %until, "offline credentials locked");
        }
        self.save(&credentials)?;
        Ok(false)
    }

    pub fn has_offline_credentials(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.load()?.is_some_and(|credentials| credentials.email == email))
    }

    /// Whether the cached credentials are older than the configured maximum age.
    pub fn credentials_stale_at(&self, now: DateTime<Utc>) -> Result<bool, AppError> {
        let max_age = Duration::days(self.config.max_credential_age_days);
        Ok(self.load()?.is_some_and(|credentials| now - credentials.last_sync > max_age))
    }

    pub fn lockout_status_at(&self, now: DateTime<Utc>) -> Result<Option<LockoutStatus>, AppError> {
        Ok(self.load()?.map(|credentials| match credentials.lockout_until {
            Some(until) if until > now => LockoutStatus::Locked { until },
            Some(_) => LockoutStatus::Unlocked {
                attempts: 0,
                remaining: self.config.max_attempts,
            },
            None => LockoutStatus::Unlocked {
                attempts: credentials.attempts,
                remaining: self.config.max_attempts.saturating_sub(credentials.attempts),
            },
        }))
    }

    pub fn clear_offline_credentials(&self) -> Result<(), AppError> {
        self.storage.remove(StorageScope::Local, keys::OFFLINE_CREDENTIALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EMAIL: &str = "broker@forkflow.test";

    fn offline() -> OfflineAuth {
        OfflineAuth::new(BrowserStorage::in_memory(), OfflineConfig::default())
    }

    #[test]
    fn hash_is_sha256_of_password_then_email() {
        assert_eq!(hash_password("pw", "a@b.c"), hex::encode(Sha256::digest(b"pwa@b.c")));
    }

    #[test]
    fn verifies_only_the_cached_identity() {
        let auth = offline();
        assert!(!auth.verify_offline_credentials(EMAIL, "secret").unwrap());

        auth.store_offline_credentials(EMAIL, "secret").unwrap();
        assert!(auth.has_offline_credentials(EMAIL).unwrap());
        assert!(auth.verify_offline_credentials(EMAIL, "secret").unwrap());
        assert!(!auth.verify_offline_credentials("other@forkflow.test", "secret").unwrap());
    }

    #[test]
    fn newer_login_overwrites_cached_identity() {
        let auth = offline();
        auth.store_offline_credentials(EMAIL, "secret").unwrap();
        auth.store_offline_credentials("second@forkflow.test", "other").unwrap();

        assert!(!auth.has_offline_credentials(EMAIL).unwrap());
        assert!(!auth.verify_offline_credentials(EMAIL, "secret").unwrap());
    }

    #[test]
    fn locks_after_max_attempts_until_lockout_elapses() {
        let auth = offline();
        let now = Utc::now();
        auth.store_offline_credentials_at(EMAIL, "secret", now).unwrap();

        for _ in 0..5 {
            assert!(!auth.verify_offline_credentials_at(EMAIL, "wrong", now).unwrap());
        }

        let locked = auth.verify_offline_credentials_at(EMAIL, "secret", now + Duration::minutes(14));
        assert!(matches!(locked, Err(AppError::AccountLocked { .. })));
        assert!(matches!(auth.lockout_status_at(now).unwrap(), Some(LockoutStatus::Locked { .. })));

        let after = now + Duration::minutes(15) + Duration::seconds(1);
        assert!(auth.verify_offline_credentials_at(EMAIL, "secret", after).unwrap());
    }

    #[test]
    fn success_resets_attempt_counter() {
        let auth = offline();
        let now = Utc::now();
        auth.store_offline_credentials_at(EMAIL, "secret", now).unwrap();

        for _ in 0..4 {
            auth.verify_offline_credentials_at(EMAIL, "wrong", now).unwrap();
        }
        assert!(auth.verify_offline_credentials_at(EMAIL, "secret", now).unwrap());
        assert_eq!(
            auth.lockout_status_at(now).unwrap(),
            Some(LockoutStatus::Unlocked { attempts: 0, remaining: 5 })
        );
    }

    #[test]
    fn mismatched_email_does_not_count_toward_lockout() {
        let auth = offline();
        let now = Utc::now();
        auth.store_offline_credentials_at(EMAIL, "secret", now).unwrap();

        for _ in 0..10 {
            auth.verify_offline_credentials_at("intruder@forkflow.test", "x", now).unwrap();
        }
        assert!(auth.verify_offline_credentials_at(EMAIL, "secret", now).unwrap());
    }

    #[test]
    fn stale_credentials_are_detected() {
        let auth = offline();
        let now = Utc::now();
        auth.store_offline_credentials_at(EMAIL, "secret", now).unwrap();
        assert!(!auth.credentials_stale_at(now + Duration::days(29)).unwrap());
        assert!(auth.credentials_stale_at(now + Duration::days(31)).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn only_the_stored_password_verifies(stored in "[a-zA-Z0-9!@#]{1,24}", attempt in "[a-zA-Z0-9!@#]{1,24}") {
            let auth = offline();
            auth.store_offline_credentials(EMAIL, &stored).unwrap();
            let verified = auth.verify_offline_credentials(EMAIL, &attempt).unwrap();
            prop_assert_eq!(verified, attempt == stored);
        }
    }
}
