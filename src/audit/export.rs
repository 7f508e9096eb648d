use crate::models::audit::{AuditEvent, AuditOutcome, AuditSummary, audit_events};
use chrono::{DateTime, Duration, Utc};

pub const CSV_HEADER: &str = "Timestamp,Type,Category,Severity,User,Message,Outcome";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn export_csv(events: &[AuditEvent]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for event in events {
        let row = [
            event.timestamp.to_rfc3339(),
            event.event_type.clone(),
            event.category.as_str().to_string(),
            event.severity.as_str().to_string(),
            event.user_id.clone().unwrap_or_default(),
            event.message.clone(),
            event.outcome.as_str().to_string(),
        ];
        let line: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn is_failed_login(event: &AuditEvent) -> bool {
    event.event_type == audit_events::LOGIN_FAILED || event.event_type == audit_events::OFFLINE_LOGIN_FAILED
}

pub fn summarize<'a>(events: impl IntoIterator<Item = &'a AuditEvent>, now: DateTime<Utc>) -> AuditSummary {
    let day_ago = now - Duration::hours(24);
    let mut summary = AuditSummary::default();

    for event in events {
        summary.total += 1;
        *summary.by_severity.entry(event.severity.as_str().to_string()).or_default() += 1;
        *summary.by_category.entry(event.category.as_str().to_string()).or_default() += 1;

        if event.timestamp >= day_ago {
            if is_failed_login(event) {
                summary.failed_logins_last_24h += 1;
            }
            if event.outcome == AuditOutcome::Blocked {
                summary.blocked_last_24h += 1;
            }
        }
    }
    summary
}
