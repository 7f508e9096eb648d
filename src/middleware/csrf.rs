use crate::error::app_error::AppError;
use crate::storage::{BrowserStorage, StorageScope, keys};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

const TOKEN_BYTES: usize = 32;

/// Per-tab CSRF token, kept in session scope and mirrored into a meta tag.
pub struct CsrfProtection {
    storage: BrowserStorage,
}

impl CsrfProtection {
    pub fn new(storage: BrowserStorage) -> Self {
        Self { storage }
    }

    pub fn generate_token(&self) -> Result<String, AppError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.storage.write_json(StorageScope::Session, keys::CSRF_TOKEN, &token)?;
        debug!("issued csrf token");
        Ok(token)
    }

    pub fn current_token(&self) -> Result<Option<String>, AppError> {
        self.storage.read_json(StorageScope::Session, keys::CSRF_TOKEN)
    }

    /// Existing token, or a freshly issued one.
    pub fn ensure_token(&self) -> Result<String, AppError> {
        match self.current_token()? {
            Some(token) => Ok(token),
            None => self.generate_token(),
        }
    }

    pub fn validate(&self, presented: Option<&str>) -> Result<bool, AppError> {
        let (Some(presented), Some(expected)) = (presented, self.current_token()?) else {
            return Ok(false);
        };
        Ok(bool::from(presented.as_bytes().ct_eq(expected.as_bytes())))
    }

    pub fn meta_tag(&self) -> Result<String, AppError> {
        Ok(format!(r#"<meta name="csrf-token" content="{}">"#, self.ensure_token()?))
    }

    pub fn clear(&self) -> Result<(), AppError> {
        self.storage.remove(StorageScope::Session, keys::CSRF_TOKEN)
    }
}
