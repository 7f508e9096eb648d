pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod storage;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use context::AuthContext;

use crate::audit::store::AuditStore;
use crate::middleware::RequestLogger;
use crate::middleware::rate_limit::RateLimiter;
use crate::routes as app_routes;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` takes precedence over `log_level`, e.g.
/// `RUST_LOG=info,forkflow_auth::audit=debug`.
pub fn init_tracing(log_level: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    let installed = if json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

pub fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Authorization", "Accept", "X-CSRF-Token"]),
        // Wildcard origins cannot be combined with credentials.
        allow_credentials: cors_config.allow_credentials && !is_wildcard,
        ..Default::default()
    }
}

pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

pub fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

fn stage_rate_limiter(security_config: config::SecurityConfig) -> AdHoc {
    AdHoc::on_ignite("Rate Limiter", move |rocket| {
        let limiter = Arc::new(RateLimiter::new(&security_config));
        limiter.clone().spawn_cleanup_task();

        Box::pin(async move { rocket.manage(limiter) })
    })
}

/// Assemble the audit ingestion service.
pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let base_path = normalize_base_path(&config.api.base_path);
    if config.cors.allow_credentials && config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        warn!("CORS credentials disabled: wildcard origins cannot carry credentials");
    }

    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let mut rocket = rocket::custom(figment)
        .attach(stage_rate_limiter(config.security.clone()))
        .attach(RequestLogger);

    match build_cors(&config.cors).to_cors() {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(e) => error!(error = %e, "invalid CORS configuration, cross-origin requests will be refused"),
    }

    rocket
        .manage(Arc::new(AuditStore::new(config.api.retained_events)))
        .manage(config.api.clone())
        .mount(join_base_path(&base_path, "health"), app_routes::health::routes())
        .mount(join_base_path(&base_path, "audit"), app_routes::audit::routes())
        .register(
            base_path.as_str(),
            catchers![
                app_routes::error::bad_request,
                app_routes::error::unauthorized,
                app_routes::error::not_found,
                app_routes::error::payload_too_large,
                app_routes::error::unprocessable_entity,
                app_routes::error::too_many_requests
            ],
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(normalize_base_path(""), "/api");
        assert_eq!(normalize_base_path("v1/"), "/v1");
        assert_eq!(normalize_base_path(" /api// "), "/api");
        assert_eq!(normalize_base_path("/"), "/");
    }

    #[test]
    fn join_avoids_double_slashes() {
        assert_eq!(join_base_path("/api", "/audit"), "/api/audit");
        assert_eq!(join_base_path("/", "health"), "/health");
    }

    #[test]
    fn wildcard_cors_never_allows_credentials() {
        let options = build_cors(&config::CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
        });
        assert!(!options.allow_credentials);
    }
}
