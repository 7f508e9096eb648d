use crate::audit::export::summarize;
use crate::models::audit::{AuditEvent, AuditFilter, AuditOutcome, AuditSummary};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Events received by the ingestion service, newest last, bounded by `capacity`.
#[derive(Debug)]
pub struct AuditStore {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl AuditStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Append a batch and log each event. Returns how many events were evicted.
    pub async fn ingest(&self, batch: Vec<AuditEvent>, client_ip: Option<&str>) -> usize {
        for event in &batch {
            let user_id = event.user_id.as_deref().unwrap_or("-");
            let ip = client_ip.unwrap_or("-");
            if event.outcome == AuditOutcome::Success {
                tracing::info!(
                    category = "audit",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    severity = event.severity.as_str(),
                    user_id = user_id,
                    ip = ip,
                    "security audit event"
                );
            } else {
                tracing::warn!(
                    category = "audit",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    severity = event.severity.as_str(),
                    outcome = event.outcome.as_str(),
                    user_id = user_id,
                    ip = ip,
                    "security audit event (failure)"
                );
            }
        }

        let mut events = self.events.write().await;
        events.extend(batch);
        let overflow = events.len().saturating_sub(self.capacity);
        events.drain(..overflow);
        overflow
    }

    pub async fn events(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        self.events.read().await.iter().filter(|event| filter.matches(event)).cloned().collect()
    }

    pub async fn summary_at(&self, now: DateTime<Utc>) -> AuditSummary {
        summarize(self.events.read().await.iter(), now)
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::audit_events;
    use serde_json::Value as JsonValue;

    fn event(message: &str) -> AuditEvent {
        AuditEvent::new(audit_events::DATA_ACCESS, AuditOutcome::Success, message, JsonValue::Null, Utc::now())
    }

    #[tokio::test]
    async fn ingest_evicts_oldest_beyond_capacity() {
        let store = AuditStore::new(3);
        assert_eq!(store.ingest(vec![event("a"), event("b")], Some("10.0.0.1")).await, 0);
        assert_eq!(store.ingest(vec![event("c"), event("d")], None).await, 1);

        let messages: Vec<String> = store.events(&AuditFilter::default()).await.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c", "d"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn summary_reflects_ingested_events() {
        let store = AuditStore::new(10);
        store.ingest(vec![event("a")], None).await;
        assert_eq!(store.summary_at(Utc::now()).await.total, 1);
    }
}
