use crate::config::{AuditConfig, AuditEnvironment};
use crate::error::app_error::AppError;
use crate::models::audit::AuditEvent;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Destination for flushed audit batches.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn send(&self, events: &[AuditEvent]) -> Result<(), AppError>;
}

/// Posts `{ "events": [...] }` to the audit endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuditSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAuditSink {
    pub fn new(config: &AuditConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            url: config.endpoint_url(),
        })
    }
}

#[async_trait::async_trait]
impl AuditSink for HttpAuditSink {
    async fn send(&self, events: &[AuditEvent]) -> Result<(), AppError> {
        self.client
            .post(&self.url)
            .json(&json!({ "events": events }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Development sink: writes each event to the log instead of the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleAuditSink;

#[async_trait::async_trait]
impl AuditSink for ConsoleAuditSink {
    async fn send(&self, events: &[AuditEvent]) -> Result<(), AppError> {
        for event in events {
            info!(
                category = "audit",
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                outcome = event.outcome.as_str(),
                user_id = event.user_id.as_deref().unwrap_or("-"),
                message = %event.message,
                "audit event flushed"
            );
        }
        Ok(())
    }
}

pub fn sink_for(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AppError> {
    Ok(match config.environment {
        AuditEnvironment::Production => Arc::new(HttpAuditSink::new(config)?),
        AuditEnvironment::Development => Arc::new(ConsoleAuditSink),
    })
}
