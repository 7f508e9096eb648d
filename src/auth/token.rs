use crate::config::TokenConfig;
use crate::error::app_error::AppError;
use crate::models::token::{TokenClaims, TokenEvent};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Decode a JWT's payload without verifying its signature.
pub fn decode_token(token: &str) -> Result<TokenClaims, AppError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (segments.next(), segments.next(), segments.next(), segments.next()) else {
        return Err(AppError::InvalidToken("expected three segments".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AppError::InvalidToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| AppError::InvalidToken(format!("payload is not valid claims JSON: {e}")))
}

/// Whether `token` expires within `buffer` of `now`. Undecodable tokens count as expired.
pub fn is_token_expired_at(token: &str, now: DateTime<Utc>, buffer: Duration) -> bool {
    match decode_token(token) {
        Ok(claims) => claims.exp <= (now + buffer).timestamp(),
        Err(_) => true,
    }
}

pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, Utc::now(), Duration::seconds(TokenConfig::default().expiry_buffer_seconds))
}

/// Holds the access token in memory only and announces upcoming expiry.
#[derive(Debug)]
pub struct TokenStore {
    config: TokenConfig,
    access_token: RwLock<Option<String>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TokenEvent>,
}

impl TokenStore {
    pub fn new(config: TokenConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            access_token: RwLock::new(None),
            refresh_timer: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.events.subscribe()
    }

    /// Time to wait before announcing expiry: `refresh_margin` ahead of `exp`, never
    /// sooner than `min_refresh_delay`.
    pub fn refresh_delay(&self, claims: &TokenClaims, now: DateTime<Utc>) -> Duration {
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or(now);
        let until_refresh = expires_at - now - Duration::seconds(self.config.refresh_margin_seconds);
        until_refresh.max(Duration::seconds(self.config.min_refresh_delay_seconds))
    }

    pub async fn set_access_token(&self, token: String) -> Result<TokenClaims, AppError> {
        let claims = decode_token(&token)?;
        let delay = self.refresh_delay(&claims, Utc::now());

        // Token and timer are swapped under the timer lock so they always belong to the same call.
        let mut timer = self.refresh_timer.lock().await;
        *self.access_token.write().await = Some(token);

        let events = self.events.clone();
        let expires_at = claims.exp;
        let wait = delay.to_std().unwrap_or_default();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            debug!(expires_at = expires_at, "access token nearing expiry");
            // No receivers just means nobody is listening for refreshes.
            let _ = events.send(TokenEvent::Expiring { expires_at });
        });

        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
        drop(timer);

        info!(
            subject = claims.sub.as_deref().unwrap_or("-"),
            refresh_in_secs = delay.num_seconds(),
            "access token set"
        );
        Ok(claims)
    }

    pub async fn get_access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub async fn clear_access_token(&self) {
        let mut timer = self.refresh_timer.lock().await;
        *self.access_token.write().await = None;
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    /// Current token if present and not within the expiry buffer.
    pub async fn valid_access_token(&self) -> Option<String> {
        let token = self.get_access_token().await?;
        if is_token_expired_at(&token, Utc::now(), Duration::seconds(self.config.expiry_buffer_seconds)) {
            warn!("stored access token is expired");
            None
        } else {
            Some(token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_token;
    use proptest::prelude::*;

    #[test]
    fn decodes_claims_from_payload() {
        let token = make_token(1_900_000_000, Some("user-1"));
        let claims = decode_token(&token).unwrap();
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(decode_token("abc"), Err(AppError::InvalidToken(_))));
        assert!(matches!(decode_token("a.!!!.c"), Err(AppError::InvalidToken(_))));
        assert!(matches!(decode_token("a.b.c.d"), Err(AppError::InvalidToken(_))));
        assert!(is_token_expired("not-a-token"));
    }

    #[test]
    fn refresh_delay_is_five_minutes_before_expiry_with_one_minute_floor() {
        let store = TokenStore::new(TokenConfig::default());
        let now = Utc::now();

        let claims = decode_token(&make_token((now + Duration::hours(1)).timestamp(), None)).unwrap();
        let delay = store.refresh_delay(&claims, now);
        assert!((delay - Duration::minutes(55)).num_seconds().abs() <= 1);

        let soon = decode_token(&make_token((now + Duration::minutes(2)).timestamp(), None)).unwrap();
        assert_eq!(store.refresh_delay(&soon, now), Duration::minutes(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_event_fires_after_refresh_delay() {
        let store = TokenStore::new(TokenConfig::default());
        let mut events = store.subscribe();
        let exp = (Utc::now() + Duration::minutes(3)).timestamp();

        store.set_access_token(make_token(exp, None)).await.unwrap();
        assert!(store.get_access_token().await.is_some());

        let event = events.recv().await.unwrap();
        assert_eq!(event, TokenEvent::Expiring { expires_at: exp });
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_token_cancels_timer() {
        let store = TokenStore::new(TokenConfig::default());
        let mut events = store.subscribe();
        let exp = (Utc::now() + Duration::minutes(3)).timestamp();

        store.set_access_token(make_token(exp, None)).await.unwrap();
        store.clear_access_token().await;
        assert!(store.get_access_token().await.is_none());

        let waited = tokio::time::timeout(std::time::Duration::from_secs(600), events.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sets_keep_token_and_timer_together() {
        let store = TokenStore::new(TokenConfig::default());
        let mut events = store.subscribe();
        let now = Utc::now();
        let first = make_token((now + Duration::minutes(10)).timestamp(), Some("first"));
        let second = make_token((now + Duration::minutes(20)).timestamp(), Some("second"));

        let (a, b) = tokio::join!(store.set_access_token(first), store.set_access_token(second));
        a.unwrap();
        b.unwrap();

        let stored = store.get_access_token().await.unwrap();
        let stored_exp = decode_token(&stored).unwrap().exp;
        let TokenEvent::Expiring { expires_at } = events.recv().await.unwrap();
        assert_eq!(expires_at, stored_exp);

        let waited = tokio::time::timeout(std::time::Duration::from_secs(3600), events.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn malformed_token_is_not_stored() {
        let store = TokenStore::new(TokenConfig::default());
        assert!(store.set_access_token("garbage".to_string()).await.is_err());
        assert!(store.get_access_token().await.is_none());
    }

    proptest! {
        #[test]
        fn expired_iff_exp_within_sixty_seconds(offset in -100_000i64..100_000i64) {
            let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
            let exp = now.timestamp() + offset;
            let token = make_token(exp, None);
            let expired = is_token_expired_at(&token, now, Duration::seconds(60));
            prop_assert_eq!(expired, exp <= now.timestamp() + 60);
        }
    }
}
