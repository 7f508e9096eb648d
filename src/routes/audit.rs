use crate::audit::export::export_csv;
use crate::auth::AuditReader;
use crate::audit::store::AuditStore;
use crate::config::ApiConfig;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::models::audit::{AuditBatch, AuditCategory, AuditFilter, AuditSeverity, AuditSummary};
use chrono::{DateTime, Utc};
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::{FromForm, State, routes};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::net::IpAddr;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

/// Query string accepted by the read endpoints. Every field is optional.
#[derive(Debug, Default, FromForm)]
pub struct AuditQuery {
    #[field(name = "type")]
    pub event_type: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    #[field(name = "userId")]
    pub user_id: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

fn parse_enum<T: DeserializeOwned>(field: &str, raw: Option<String>) -> Result<Option<T>, AppError> {
    raw.map(|value| serde_json::from_value(JsonValue::String(value.clone())).map_err(|_| AppError::BadRequest(format!("Unknown {field}: {value}"))))
        .transpose()
}

fn parse_timestamp(field: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| AppError::BadRequest(format!("Invalid {field} timestamp: {value}")))
    })
    .transpose()
}

impl TryFrom<AuditQuery> for AuditFilter {
    type Error = AppError;

    fn try_from(query: AuditQuery) -> Result<Self, Self::Error> {
        Ok(AuditFilter {
            event_type: query.event_type,
            category: parse_enum::<AuditCategory>("category", query.category)?,
            min_severity: parse_enum::<AuditSeverity>("severity", query.severity)?,
            user_id: query.user_id,
            since: parse_timestamp("since", query.since)?,
            until: parse_timestamp("until", query.until)?,
        })
    }
}

#[rocket::post("/", data = "<payload>")]
pub async fn ingest_events(
    store: &State<Arc<AuditStore>>,
    api: &State<ApiConfig>,
    _rate_limit: RateLimit,
    client_ip: Option<IpAddr>,
    payload: Json<AuditBatch>,
) -> Result<(Status, Json<IngestResponse>), AppError> {
    payload.validate()?;

    let batch = payload.into_inner();
    if batch.events.len() > api.max_batch_events {
        return Err(AppError::BadRequest(format!(
            "Batch of {} events exceeds the limit of {}",
            batch.events.len(),
            api.max_batch_events
        )));
    }

    let accepted = batch.events.len();
    let ip = client_ip.map(|ip| ip.to_string());
    let evicted = store.ingest(batch.events, ip.as_deref()).await;
    if evicted > 0 {
        tracing::debug!(evicted, "audit store at capacity, dropped oldest events");
    }

    Ok((Status::Accepted, Json(IngestResponse { accepted })))
}

#[rocket::get("/export?<query..>")]
pub async fn export_events(
    store: &State<Arc<AuditStore>>,
    _reader: AuditReader,
    _rate_limit: RateLimit,
    query: AuditQuery,
) -> Result<(ContentType, String), AppError> {
    let filter = AuditFilter::try_from(query)?;
    let events = store.events(&filter).await;
    Ok((ContentType::CSV, export_csv(&events)))
}

#[rocket::get("/summary")]
pub async fn summary(store: &State<Arc<AuditStore>>, _reader: AuditReader, _rate_limit: RateLimit) -> Json<AuditSummary> {
    Json(store.summary_at(Utc::now()).await)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![ingest_events, export_events, summary]
}
