use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_PATH: &str = "/api";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    /// Upper bound on events accepted in a single ingestion batch.
    pub max_batch_events: usize,
    /// Events retained in memory by the ingestion service.
    pub retained_events: usize,
    /// Bearer token required by the export and summary endpoints. Reads are refused when unset.
    #[serde(default)]
    pub read_token: Option<String>,
}

/// Access-token lifecycle timings, in seconds.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    pub expiry_buffer_seconds: i64,
    pub refresh_margin_seconds: i64,
    pub min_refresh_delay_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub session_timeout_hours: i64,
    pub activity_timeout_hours: i64,
    pub activity_throttle_seconds: i64,
    pub geolocation_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OfflineConfig {
    pub max_attempts: u32,
    pub lockout_minutes: i64,
    pub max_credential_age_days: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub csrf_enabled: bool,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditEnvironment {
    Production,
    Development,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    pub environment: AuditEnvironment,
    pub base_url: String,
    pub endpoint: String,
    pub flush_interval_seconds: u64,
    pub max_local_events: usize,
    pub request_timeout_seconds: u64,
    pub failed_login_threshold: usize,
    pub failed_login_window_minutes: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    /// Directory backing persistent ("local") storage. In-memory when unset.
    pub data_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            max_batch_events: 500,
            retained_events: 10_000,
            read_token: None,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_seconds: 60,
            refresh_margin_seconds: 5 * 60,
            min_refresh_delay_seconds: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: 7 * 24,
            activity_timeout_hours: 4,
            activity_throttle_seconds: 60,
            geolocation_timeout_ms: 5_000,
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_minutes: 15,
            max_credential_age_days: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csrf_enabled: true,
            rate_limit_max_requests: 100,
            rate_limit_window_seconds: 60,
            cleanup_interval_seconds: 300,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            environment: AuditEnvironment::Development,
            base_url: "http://127.0.0.1:8000".to_string(),
            endpoint: "/api/audit".to_string(),
            flush_interval_seconds: 60,
            max_local_events: 1000,
            request_timeout_seconds: 10,
            failed_login_threshold: 5,
            failed_login_window_minutes: 15,
        }
    }
}

impl SecurityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds.max(1))
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.endpoint.trim_start_matches('/'))
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. ForkFlow.toml (if present)
    /// 3. Environment variables prefixed with FORKFLOW_ (e.g. FORKFLOW_AUDIT__ENDPOINT)
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("ForkFlow.toml"))
            .merge(Env::prefixed("FORKFLOW_").split("__"))
    }
}
