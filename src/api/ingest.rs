use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::device::AuthDevice;
use crate::config::Config;
use crate::engine::ingest::{self, IngestOutcome, RawPunch};
use crate::error::ApiError;
use crate::model::punch::{PunchSource, VerificationState};

#[derive(Deserialize, ToSchema)]
pub struct DeviceEvent {
    /// Device-scoped employee identifier as enrolled on the terminal.
    #[schema(example = "EMP-00421")]
    pub external_ref: String,
    /// Provider status code; mapped through the per-provider table.
    #[schema(example = "0")]
    pub code: String,
    #[schema(value_type = String, format = "date-time", example = "2026-08-01T09:02:11")]
    pub punched_at: NaiveDateTime,
    #[schema(example = "fingerprint")]
    pub verification: Option<VerificationState>,
}

#[derive(Deserialize, ToSchema)]
pub struct BatchSync {
    pub events: Vec<DeviceEvent>,
}

#[derive(Serialize, Default, ToSchema)]
#[schema(example = json!({"synced": 40, "processed": 38, "orphaned": 2, "rejected": 0}))]
pub struct SyncCounts {
    /// Events persisted (processed + orphaned).
    pub synced: u32,
    pub processed: u32,
    pub orphaned: u32,
    /// Duplicates and malformed events, not persisted.
    pub rejected: u32,
}

/// Single-event terminal sync
#[utoipa::path(
    post,
    path = "/ingest/punch",
    request_body(content = DeviceEvent, content_type = "application/json"),
    responses(
        (status = 200, description = "Event ingested", body = SyncCounts),
        (status = 401, description = "Unknown device or bad signature"),
        (status = 409, description = "Duplicate punch")
    ),
    tag = "Ingestion"
)]
pub async fn sync_single(
    device: AuthDevice,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<DeviceEvent>,
) -> actix_web::Result<impl Responder> {
    let outcome = ingest_device_event(&pool, &config, &device, &payload).await?;

    let mut counts = SyncCounts {
        synced: 1,
        ..SyncCounts::default()
    };
    match outcome {
        IngestOutcome::Processed { .. } => counts.processed = 1,
        IngestOutcome::Orphaned { .. } => counts.orphaned = 1,
    }
    Ok(HttpResponse::Ok().json(counts))
}

/// Batch terminal sync
///
/// Per-event failures are counted, never aborting the rest of the batch;
/// terminals replay their queue until everything is acknowledged.
#[utoipa::path(
    post,
    path = "/ingest/punch/batch",
    request_body(content = BatchSync, content_type = "application/json"),
    responses(
        (status = 200, description = "Batch ingested", body = SyncCounts),
        (status = 401, description = "Unknown device or bad signature")
    ),
    tag = "Ingestion"
)]
pub async fn sync_batch(
    device: AuthDevice,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<BatchSync>,
) -> actix_web::Result<impl Responder> {
    let mut counts = SyncCounts::default();

    for event in &payload.events {
        match ingest_device_event(&pool, &config, &device, event).await {
            Ok(IngestOutcome::Processed { .. }) => {
                counts.synced += 1;
                counts.processed += 1;
            }
            Ok(IngestOutcome::Orphaned { .. }) => {
                counts.synced += 1;
                counts.orphaned += 1;
            }
            Err(e) => {
                counts.rejected += 1;
                tracing::warn!(
                    device_id = %device.device_id,
                    external_ref = %event.external_ref,
                    kind = e.kind(),
                    error = %e,
                    "batch event rejected"
                );
            }
        }
    }

    Ok(HttpResponse::Ok().json(counts))
}

async fn ingest_device_event(
    pool: &MySqlPool,
    config: &Config,
    device: &AuthDevice,
    event: &DeviceEvent,
) -> Result<IngestOutcome, ApiError> {
    let raw = RawPunch {
        external_ref: Some(event.external_ref.clone()),
        user_id: None,
        source: PunchSource::Terminal,
        code: Some(event.code.clone()),
        punch_type: None,
        punched_at: event.punched_at,
        latitude: None,
        longitude: None,
        accuracy_m: None,
        verification: event.verification.unwrap_or(VerificationState::Unverified),
        provider: Some(device.provider),
    };
    ingest::ingest_punch(pool, config, device.org_id, device.branch_id, raw).await
}
