use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::engine::geofence::{self, GeoClaim, GeoPoint, GeofencePolicy};
use crate::engine::ingest::{self, IngestOutcome, RawPunch};
use crate::error::ApiError;
use crate::external::directory;
use crate::model::punch::{PunchSource, PunchType, VerificationState};
use crate::utils::punch_limiter;

#[derive(Deserialize, ToSchema)]
pub struct SelfPunch {
    #[schema(example = "in")]
    pub punch_type: PunchType,
    /// Present when punching from the mobile app, absent for web.
    pub device_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
}

#[derive(Serialize, ToSchema)]
#[schema(example = json!({
    "punch_id": 9321, "punch_type": "in",
    "attributed_date": "2026-08-01", "flagged": false
}))]
pub struct SelfPunchResponse {
    pub punch_id: u64,
    pub punch_type: PunchType,
    #[schema(value_type = String, format = "date")]
    pub attributed_date: chrono::NaiveDate,
    /// Out-of-sequence punches are recorded but flagged for correction.
    pub flagged: bool,
}

/// Self-service punch (web/mobile)
///
/// Coordinates are mandatory when the subject's branch has a reference
/// point; the fix must pass accuracy, movement plausibility and radius
/// checks before the punch is accepted.
#[utoipa::path(
    post,
    path = "/api/v1/punch",
    request_body(content = SelfPunch, content_type = "application/json"),
    responses(
        (status = 200, description = "Punch recorded", body = SelfPunchResponse),
        (status = 403, description = "Geofence violation",
         body = Object, example = json!({"error": "geofence", "message": "location 420m from branch, allowed radius 100m"})),
        (status = 409, description = "Duplicate punch"),
        (status = 429, description = "Punch rate exceeded")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn self_punch(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<SelfPunch>,
) -> actix_web::Result<impl Responder> {
    let now = Utc::now();

    punch_limiter::check_punch_window(
        &pool,
        auth.org_id,
        auth.user_id,
        now,
        config.punch_window_secs,
        config.punch_window_max,
    )
    .await?;

    let subject = directory::subject_by_id(&pool, auth.org_id, auth.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("user not found in this organization".into()))?;
    if !subject.is_active || !subject.attendance_enabled {
        return Err(ApiError::Forbidden("attendance disabled for user".into()).into());
    }

    // Punch timestamps are stored on the org's wall clock, same as the
    // ones terminals report, so the day attribution lines up.
    let offset = directory::org_utc_offset_minutes(&pool, auth.org_id)
        .await
        .map_err(ApiError::from)?;
    let wall_now = org_wall_clock(now, offset);

    let verification = check_geofence(&pool, &config, &auth, &subject, &payload, wall_now).await?;

    let source = if payload.device_id.is_some() {
        PunchSource::Mobile
    } else {
        PunchSource::Web
    };

    let raw = RawPunch {
        external_ref: None,
        user_id: Some(auth.user_id),
        source,
        code: None,
        punch_type: Some(payload.punch_type),
        punched_at: wall_now,
        latitude: payload.latitude,
        longitude: payload.longitude,
        accuracy_m: payload.accuracy_m,
        verification,
        provider: None,
    };

    match ingest::ingest_punch(&pool, &config, auth.org_id, subject.branch_id, raw).await? {
        IngestOutcome::Processed {
            punch_id,
            punch_type,
            attributed_date,
            flagged,
            ..
        } => Ok(HttpResponse::Ok().json(SelfPunchResponse {
            punch_id,
            punch_type,
            attributed_date,
            flagged,
        })),
        // Self-punches carry a resolved user id, so this arm is dead in
        // practice; kept total rather than panicking.
        IngestOutcome::Orphaned { .. } => {
            Err(ApiError::Internal("self punch resolved to orphan".into()).into())
        }
    }
}

/// Validate the claimed fix against the branch reference point, when the
/// branch has one. A passing fix upgrades verification to `location`.
async fn check_geofence(
    pool: &MySqlPool,
    config: &Config,
    auth: &AuthUser,
    subject: &directory::Subject,
    payload: &SelfPunch,
    wall_now: chrono::NaiveDateTime,
) -> Result<VerificationState, ApiError> {
    let Some(branch_id) = subject.branch_id else {
        return Ok(VerificationState::Unverified);
    };
    let Some(branch) = directory::branch_location(pool, auth.org_id, branch_id).await? else {
        return Ok(VerificationState::Unverified);
    };

    let (Some(lat), Some(lon)) = (payload.latitude, payload.longitude) else {
        return Err(ApiError::Validation(
            "branch requires a location; send latitude and longitude".into(),
        ));
    };
    let claim = GeoClaim {
        lat,
        lon,
        accuracy_m: payload.accuracy_m.unwrap_or(0.0),
    };
    let reference = GeoPoint {
        lat: branch.latitude,
        lon: branch.longitude,
    };
    let policy = GeofencePolicy {
        radius_m: if branch.radius_m > 0.0 {
            branch.radius_m
        } else {
            config.geofence_default_radius_m
        },
        accuracy_ceiling_m: config.geofence_accuracy_ceiling_m,
        max_speed_kmh: config.geofence_max_speed_kmh,
    };

    let last_fix = ingest::last_located_punch(pool, auth.org_id, auth.user_id)
        .await?
        .map(|(lat, lon, at)| (GeoPoint { lat, lon }, at));

    // Stored fixes are on the org clock too, so movement plausibility
    // compares like with like.
    let distance_m = geofence::validate(claim, reference, policy, last_fix, wall_now)
        .map_err(ApiError::Geofence)?;
    tracing::debug!(
        org_id = auth.org_id,
        user_id = auth.user_id,
        distance_m,
        "geofence check passed"
    );
    Ok(VerificationState::Location)
}

fn org_wall_clock(now: chrono::DateTime<Utc>, offset_minutes: i32) -> chrono::NaiveDateTime {
    (now + chrono::Duration::minutes(offset_minutes as i64)).naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn wall_clock_applies_org_offset() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 20, 0, 0).unwrap();
        // UTC+05:30 pushes an evening UTC punch past local midnight.
        let local = org_wall_clock(now, 330);
        assert_eq!(
            local,
            NaiveDate::from_ymd_opt(2026, 8, 2)
                .unwrap()
                .and_hms_opt(1, 30, 0)
                .unwrap()
        );
        // Zero offset leaves the UTC instant untouched.
        assert_eq!(org_wall_clock(now, 0), now.naive_utc());
        // Negative offsets work too.
        let west = org_wall_clock(now, -240);
        assert_eq!(
            west,
            NaiveDate::from_ymd_opt(2026, 8, 1)
                .unwrap()
                .and_hms_opt(16, 0, 0)
                .unwrap()
        );
    }
}
