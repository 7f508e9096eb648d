use crate::audit::export::{export_csv, summarize};
use crate::audit::sink::AuditSink;
use crate::config::AuditConfig;
use crate::error::app_error::AppError;
use crate::models::audit::{AuditEvent, AuditFilter, AuditOutcome, AuditSeverity, AuditSummary, audit_events};
use crate::storage::{BrowserStorage, StorageScope, keys};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffers audit events, keeps the most recent ones in local storage and ships
/// batches to an [`AuditSink`].
pub struct AuditLogger {
    storage: BrowserStorage,
    config: AuditConfig,
    sink: Arc<dyn AuditSink>,
    buffer: Mutex<VecDeque<AuditEvent>>,
    online: AtomicBool,
    flush_now: Notify,
}

impl AuditLogger {
    pub fn new(storage: BrowserStorage, config: AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            storage,
            config,
            sink,
            buffer: Mutex::new(VecDeque::new()),
            online: AtomicBool::new(true),
            flush_now: Notify::new(),
        }
    }

    pub async fn log_audit_event(
        &self,
        event_type: &str,
        outcome: AuditOutcome,
        message: impl Into<String>,
        details: JsonValue,
        user_id: Option<&str>,
    ) -> AuditEvent {
        let event = AuditEvent::new(event_type, outcome, message, details, Utc::now()).with_user(user_id.map(str::to_string));
        self.log_event(event).await
    }

    /// Record a prepared event. Storage failures are logged, never returned.
    pub async fn log_event(&self, event: AuditEvent) -> AuditEvent {
        self.record(event.clone()).await;

        if let Some(alert) = self.failed_login_alert(&event) {
            self.record(alert).await;
        }
        event
    }

    async fn record(&self, event: AuditEvent) {
        mirror_to_tracing(&event);

        if let Err(e) = self.persist(&event) {
            warn!(error = %e, event_type = %event.event_type, "failed to persist audit event");
        }

        let critical = event.severity == AuditSeverity::Critical;
        {
            let mut buffer = self.buffer.lock().await;
            buffer.push_back(event);
            while buffer.len() > self.config.max_local_events {
                buffer.pop_front();
            }
        }

        if critical {
            self.flush_now.notify_one();
        }
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), AppError> {
        let mut stored = self.local_events()?;
        stored.push(event.clone());
        let overflow = stored.len().saturating_sub(self.config.max_local_events);
        stored.drain(..overflow);
        self.storage.write_json(StorageScope::Local, keys::AUDIT_LOG, &stored)
    }

    fn failed_login_alert(&self, event: &AuditEvent) -> Option<AuditEvent> {
        if event.event_type != audit_events::LOGIN_FAILED && event.event_type != audit_events::OFFLINE_LOGIN_FAILED {
            return None;
        }
        let user_id = event.user_id.as_ref()?;
        let since = event.timestamp - Duration::minutes(self.config.failed_login_window_minutes);

        let failures = self
            .local_events()
            .ok()?
            .iter()
            .filter(|e| e.event_type == event.event_type && e.user_id.as_ref() == Some(user_id) && e.timestamp >= since)
            .count();

        (failures == self.config.failed_login_threshold).then(|| {
            AuditEvent::new(
                audit_events::SUSPICIOUS_ACTIVITY,
                AuditOutcome::Failure,
                format!("{failures} failed logins within {} minutes", self.config.failed_login_window_minutes),
                json!({ "failedAttempts": failures, "trigger": event.event_type }),
                event.timestamp,
            )
            .with_user(Some(user_id.clone()))
        })
    }

    /// Events persisted in local storage, oldest first.
    pub fn local_events(&self) -> Result<Vec<AuditEvent>, AppError> {
        Ok(self
            .storage
            .read_json::<Vec<AuditEvent>>(StorageScope::Local, keys::AUDIT_LOG)?
            .unwrap_or_default())
    }

    pub fn get_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AppError> {
        Ok(self.local_events()?.into_iter().filter(|event| filter.matches(event)).collect())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> Result<AuditSummary, AppError> {
        Ok(summarize(&self.local_events()?, now))
    }

    /// CSV of matching local events. The export itself is audited.
    pub async fn export_local_csv(&self, filter: &AuditFilter, user_id: Option<&str>) -> Result<String, AppError> {
        let events = self.get_events(filter)?;
        let csv = export_csv(&events);
        self.log_audit_event(
            audit_events::DATA_EXPORT,
            AuditOutcome::Success,
            "Audit log exported",
            json!({ "format": "csv", "events": events.len() }),
            user_id,
        )
        .await;
        Ok(csv)
    }

    pub fn clear_local_events(&self) -> Result<(), AppError> {
        self.storage.remove(StorageScope::Local, keys::AUDIT_LOG)
    }

    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Track connectivity; regaining it triggers a flush.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("connectivity restored, flushing audit buffer");
            self.flush_now.notify_one();
        }
    }

    /// Send the buffered batch. On failure the batch is put back ahead of newer events.
    pub async fn flush(&self) -> Result<usize, AppError> {
        if !self.is_online() {
            return Ok(0);
        }

        let batch: Vec<AuditEvent> = self.buffer.lock().await.drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }

        match self.sink.send(&batch).await {
            Ok(()) => {
                debug!(events = batch.len(), "audit batch flushed");
                Ok(batch.len())
            }
            Err(e) => {
                warn!(error = %e, events = batch.len(), "audit flush failed, requeueing batch");
                let mut buffer = self.buffer.lock().await;
                for event in batch.into_iter().rev() {
                    buffer.push_front(event);
                }
                while buffer.len() > self.config.max_local_events {
                    buffer.pop_front();
                }
                Err(e)
            }
        }
    }

    pub fn spawn_flush_task(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.flush_now.notified() => {}
                }
                if let Err(e) = self.flush().await {
                    debug!(error = %e, "scheduled audit flush failed");
                }
            }
        })
    }
}

fn mirror_to_tracing(event: &AuditEvent) {
    let user_id = event.user_id.as_deref().unwrap_or("-");
    if event.outcome == AuditOutcome::Success {
        info!(
            category = "audit",
            event_type = %event.event_type,
            severity = event.severity.as_str(),
            user_id = user_id,
            "{}",
            event.message
        );
    } else {
        warn!(
            category = "audit",
            event_type = %event.event_type,
            severity = event.severity.as_str(),
            outcome = event.outcome.as_str(),
            user_id = user_id,
            "{}",
            event.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingSink, RecordingSink};
    use crate::models::audit::AuditCategory;

    fn logger_with(sink: Arc<dyn AuditSink>, config: AuditConfig) -> AuditLogger {
        AuditLogger::new(BrowserStorage::in_memory(), config, sink)
    }

    #[tokio::test]
    async fn events_are_buffered_and_persisted() {
        let logger = logger_with(Arc::new(RecordingSink::default()), AuditConfig::default());
        let event = logger
            .log_audit_event(audit_events::LOGIN_SUCCESS, AuditOutcome::Success, "signed in", JsonValue::Null, Some("u1"))
            .await;

        assert_eq!(event.category, AuditCategory::Authentication);
        assert_eq!(logger.pending().await, 1);
        assert_eq!(logger.local_events().unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn clearing_local_events_empties_the_log() {
        let logger = logger_with(Arc::new(RecordingSink::default()), AuditConfig::default());
        logger
            .log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "signed out", JsonValue::Null, Some("u1"))
            .await;
        assert_eq!(logger.local_events().unwrap().len(), 1);

        logger.clear_local_events().unwrap();

        assert!(logger.local_events().unwrap().is_empty());
        assert!(logger.get_events(&AuditFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_log_is_capped_oldest_first() {
        let config = AuditConfig {
            max_local_events: 1000,
            ..AuditConfig::default()
        };
        let logger = logger_with(Arc::new(RecordingSink::default()), config);

        for i in 0..1005 {
            logger
                .log_audit_event(audit_events::DATA_ACCESS, AuditOutcome::Success, format!("read {i}"), JsonValue::Null, None)
                .await;
        }

        let stored = logger.local_events().unwrap();
        assert_eq!(stored.len(), 1000);
        assert_eq!(stored[0].message, "read 5");
        assert_eq!(logger.pending().await, 1000);
    }

    #[tokio::test]
    async fn flush_sends_batch_and_empties_buffer() {
        let sink = Arc::new(RecordingSink::default());
        let logger = logger_with(sink.clone(), AuditConfig::default());
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "bye", JsonValue::Null, None).await;

        assert_eq!(logger.flush().await.unwrap(), 1);
        assert_eq!(logger.pending().await, 0);
        assert_eq!(sink.batches().await.len(), 1);
        assert_eq!(logger.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_flush_requeues_without_duplicating() {
        let logger = logger_with(Arc::new(FailingSink), AuditConfig::default());
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "a", JsonValue::Null, None).await;
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "b", JsonValue::Null, None).await;

        assert!(logger.flush().await.is_err());
        assert!(logger.flush().await.is_err());
        assert_eq!(logger.pending().await, 2);
    }

    #[tokio::test]
    async fn offline_logger_holds_events() {
        let sink = Arc::new(RecordingSink::default());
        let logger = logger_with(sink.clone(), AuditConfig::default());
        logger.set_online(false);
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "bye", JsonValue::Null, None).await;

        assert_eq!(logger.flush().await.unwrap(), 0);
        assert_eq!(logger.pending().await, 1);

        logger.set_online(true);
        assert_eq!(logger.flush().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_event_triggers_immediate_flush() {
        let sink = Arc::new(RecordingSink::default());
        let logger = Arc::new(logger_with(sink.clone(), AuditConfig::default()));
        let task = logger.clone().spawn_flush_task();

        logger
            .log_audit_event(audit_events::SQL_INJECTION_ATTEMPT, AuditOutcome::Blocked, "sqli", JsonValue::Null, None)
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(sink.batches().await.len(), 1);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flush_runs_on_interval() {
        let sink = Arc::new(RecordingSink::default());
        let logger = Arc::new(logger_with(sink.clone(), AuditConfig::default()));
        let task = logger.clone().spawn_flush_task();

        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "bye", JsonValue::Null, None).await;
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert!(sink.batches().await.is_empty());

        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        assert_eq!(sink.batches().await.len(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn repeated_failed_logins_raise_suspicious_activity() {
        let logger = logger_with(Arc::new(RecordingSink::default()), AuditConfig::default());
        for _ in 0..5 {
            logger
                .log_audit_event(audit_events::LOGIN_FAILED, AuditOutcome::Failure, "bad password", JsonValue::Null, Some("u1"))
                .await;
        }

        let alerts = logger
            .get_events(&AuditFilter {
                event_type: Some(audit_events::SUSPICIOUS_ACTIVITY.to_string()),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn export_is_itself_audited() {
        let logger = logger_with(Arc::new(RecordingSink::default()), AuditConfig::default());
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "bye", JsonValue::Null, None).await;

        let csv = logger.export_local_csv(&AuditFilter::default(), Some("admin")).await.unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert_eq!(logger.local_events().unwrap().last().unwrap().event_type, audit_events::DATA_EXPORT);
    }

    #[tokio::test]
    async fn corrupt_local_log_is_treated_as_empty() {
        let storage = BrowserStorage::in_memory();
        storage.store(StorageScope::Local).set(keys::AUDIT_LOG, "[{broken").unwrap();
        let logger = AuditLogger::new(storage, AuditConfig::default(), Arc::new(RecordingSink::default()));

        assert!(logger.local_events().unwrap().is_empty());
        logger.log_audit_event(audit_events::LOGOUT, AuditOutcome::Success, "bye", JsonValue::Null, None).await;
        assert_eq!(logger.local_events().unwrap().len(), 1);
    }
}
