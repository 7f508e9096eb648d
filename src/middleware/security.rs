use crate::audit::AuditLogger;
use crate::config::SecurityConfig;
use crate::error::app_error::AppError;
use crate::middleware::csrf::CsrfProtection;
use crate::middleware::patterns::{check_payload_size, check_user_agent, detect_sql_injection, detect_xss_attempt};
use crate::middleware::rate_limit::{RateLimitDecision, RateLimiter, ceil_secs};
use crate::models::audit::{AuditOutcome, audit_events};
use crate::models::security::{RequestInfo, SecurityViolation, ViolationSeverity, ViolationType};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Screens outgoing requests: CSRF, rate limit, XSS/SQLi signatures, payload size
/// and user agent.
pub struct SecurityMiddleware {
    config: SecurityConfig,
    csrf: CsrfProtection,
    rate_limiter: Arc<RateLimiter>,
    audit: Arc<AuditLogger>,
}

fn audit_event_type(violation_type: ViolationType) -> &'static str {
    match violation_type {
        ViolationType::Csrf => audit_events::CSRF_VIOLATION,
        ViolationType::Xss => audit_events::XSS_ATTEMPT,
        ViolationType::SqlInjection => audit_events::SQL_INJECTION_ATTEMPT,
        ViolationType::RateLimit => audit_events::RATE_LIMIT_EXCEEDED,
        ViolationType::PayloadTooLarge => audit_events::PAYLOAD_TOO_LARGE,
        ViolationType::SuspiciousUserAgent => audit_events::SUSPICIOUS_USER_AGENT,
    }
}

impl SecurityMiddleware {
    pub fn new(config: SecurityConfig, csrf: CsrfProtection, rate_limiter: Arc<RateLimiter>, audit: Arc<AuditLogger>) -> Self {
        Self {
            config,
            csrf,
            rate_limiter,
            audit,
        }
    }

    pub fn csrf(&self) -> &CsrfProtection {
        &self.csrf
    }

    /// Run every check against `request`.
    ///
    /// All violations are audited. Returns the advisory ones on success, or
    /// [`AppError::SecurityViolation`] carrying every violation when any is blocking.
    pub async fn validate_request_security(&self, request: &RequestInfo) -> Result<Vec<SecurityViolation>, AppError> {
        let violations = self.collect_violations(request).await?;

        for violation in &violations {
            self.audit
                .log_audit_event(
                    audit_event_type(violation.violation_type),
                    if violation.blocked { AuditOutcome::Blocked } else { AuditOutcome::Failure },
                    violation.message.clone(),
                    json!({
                        "endpoint": request.endpoint,
                        "clientIp": request.client_ip,
                        "severity": violation.severity,
                        "violation": violation.details,
                    }),
                    None,
                )
                .await;
        }

        if violations.iter().any(|v| v.blocked) {
            warn!(
                endpoint = %request.endpoint,
                client_ip = %request.client_ip,
                violations = violations.len(),
                "request blocked by security middleware"
            );
            return Err(AppError::SecurityViolation { violations });
        }
        Ok(violations)
    }

    async fn collect_violations(&self, request: &RequestInfo) -> Result<Vec<SecurityViolation>, AppError> {
        let mut violations = Vec::new();

        if self.config.csrf_enabled && request.method.is_state_changing() && !self.csrf.validate(request.csrf_token.as_deref())? {
            violations.push(
                SecurityViolation::new(ViolationType::Csrf, ViolationSeverity::High, "Missing or invalid CSRF token", true)
                    .with_details(json!({ "tokenPresent": request.csrf_token.is_some() })),
            );
        }

        if let RateLimitDecision::Limited { retry_after } = self.rate_limiter.check(&request.client_ip, &request.endpoint).await {
            violations.push(
                SecurityViolation::new(ViolationType::RateLimit, ViolationSeverity::Medium, "Rate limit exceeded", true)
                    .with_details(json!({ "retryAfterSecs": ceil_secs(retry_after) })),
            );
        }

        if let Some(body) = &request.body {
            let serialized = serde_json::to_string(body)?;
            violations.extend(detect_xss_attempt(&serialized));
            violations.extend(detect_sql_injection(&serialized));
            violations.extend(check_payload_size(serialized.len(), self.config.max_payload_bytes));
        }

        violations.extend(check_user_agent(request.user_agent.as_deref()));
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::models::audit::AuditFilter;
    use crate::models::security::HttpMethod;
    use crate::storage::BrowserStorage;
    use crate::test_utils::{BROWSER_UA, RecordingSink};

    fn middleware(config: SecurityConfig) -> (SecurityMiddleware, Arc<AuditLogger>) {
        let storage = BrowserStorage::in_memory();
        let audit = Arc::new(AuditLogger::new(
            storage.clone(),
            AuditConfig::default(),
            Arc::new(RecordingSink::default()),
        ));
        let limiter = Arc::new(RateLimiter::new(&config));
        let middleware = SecurityMiddleware::new(config, CsrfProtection::new(storage), limiter, audit.clone());
        (middleware, audit)
    }

    fn post(body: serde_json::Value, csrf: &str) -> RequestInfo {
        RequestInfo::new(HttpMethod::Post, "/rest/v1/contacts", "10.0.0.5")
            .with_user_agent(BROWSER_UA)
            .with_body(body)
            .with_csrf_token(csrf)
    }

    #[tokio::test]
    async fn clean_request_passes() {
        let (middleware, audit) = middleware(SecurityConfig::default());
        let token = middleware.csrf().generate_token().unwrap();

        let advisories = middleware
            .validate_request_security(&post(json!({ "name": "Acme Produce" }), &token))
            .await
            .unwrap();
        assert!(advisories.is_empty());
        assert!(audit.local_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_csrf_blocks_state_changing_requests_only() {
        let (middleware, _) = middleware(SecurityConfig::default());
        middleware.csrf().generate_token().unwrap();

        let err = middleware
            .validate_request_security(&post(json!({}), "forged"))
            .await
            .unwrap_err();
        assert_eq!(err.violations()[0].violation_type, ViolationType::Csrf);

        let get = RequestInfo::new(HttpMethod::Get, "/rest/v1/contacts", "10.0.0.5").with_user_agent(BROWSER_UA);
        assert!(middleware.validate_request_security(&get).await.is_ok());
    }

    #[tokio::test]
    async fn script_payload_is_blocked_and_audited() {
        let (middleware, audit) = middleware(SecurityConfig::default());
        let token = middleware.csrf().generate_token().unwrap();

        let err = middleware
            .validate_request_security(&post(json!({ "notes": "<script>alert(1)</script>" }), &token))
            .await
            .unwrap_err();
        let violation = &err.violations()[0];
        assert_eq!(violation.violation_type, ViolationType::Xss);
        assert!(violation.blocked);

        let logged = audit
            .get_events(&AuditFilter {
                event_type: Some(audit_events::XSS_ATTEMPT.to_string()),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].outcome, AuditOutcome::Blocked);
    }

    #[tokio::test]
    async fn advisory_violations_do_not_block() {
        let (middleware, audit) = middleware(SecurityConfig::default());
        let request = RequestInfo::new(HttpMethod::Get, "/rest/v1/products", "10.0.0.5");

        let advisories = middleware.validate_request_security(&request).await.unwrap();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].violation_type, ViolationType::SuspiciousUserAgent);
        assert_eq!(audit.local_events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_quota() {
        let (middleware, _) = middleware(SecurityConfig {
            rate_limit_max_requests: 2,
            ..SecurityConfig::default()
        });
        let request = RequestInfo::new(HttpMethod::Get, "/rest/v1/deals", "10.0.0.9").with_user_agent(BROWSER_UA);

        assert!(middleware.validate_request_security(&request).await.is_ok());
        assert!(middleware.validate_request_security(&request).await.is_ok());
        let err = middleware.validate_request_security(&request).await.unwrap_err();
        assert_eq!(err.violations()[0].violation_type, ViolationType::RateLimit);
    }

    #[tokio::test]
    async fn oversized_payload_is_blocked() {
        let (middleware, _) = middleware(SecurityConfig {
            max_payload_bytes: 64,
            csrf_enabled: false,
            ..SecurityConfig::default()
        });
        let request = post(json!({ "notes": "x".repeat(100) }), "");

        let err = middleware.validate_request_security(&request).await.unwrap_err();
        assert!(err.violations().iter().any(|v| v.violation_type == ViolationType::PayloadTooLarge));
    }
}
