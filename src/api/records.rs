use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::ApiError;
use crate::model::daily::DailyAttendanceRecord;
use crate::model::punch::PunchEvent;

const RECORD_COLS: &str = "id, org_id, user_id, date, shift_id, first_in, last_out, \
     total_work_hours, net_work_hours, break_hours, overtime_hours, status, is_late, \
     is_half_day, is_overtime, overtime_multiplier, payout_multiplier, punch_ids, \
     source_request_id, updated_at";

const MAX_RANGE_DAYS: i64 = 92;

#[derive(Deserialize, IntoParams)]
pub struct RecordRange {
    #[param(example = "2026-08-01")]
    pub from: NaiveDate,
    #[param(example = "2026-08-31")]
    pub to: NaiveDate,
}

#[derive(Serialize, ToSchema)]
pub struct RecordList {
    pub data: Vec<DailyAttendanceRecord>,
    pub total: usize,
}

/* =========================
My attendance records
========================= */
#[utoipa::path(
    get,
    path = "/api/v1/attendance",
    params(RecordRange),
    responses(
        (status = 200, description = "Daily records for the range", body = RecordList),
        (status = 400, description = "Range invalid or too wide")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn my_records(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    range: web::Query<RecordRange>,
) -> actix_web::Result<impl Responder> {
    let data = fetch_records(&pool, auth.org_id, auth.user_id, &range).await?;
    Ok(HttpResponse::Ok().json(RecordList {
        total: data.len(),
        data,
    }))
}

/* =========================
Records for another user (manager / HR)
========================= */
#[utoipa::path(
    get,
    path = "/api/v1/attendance/{user_id}",
    params(("user_id" = u64, Path, description = "Subject user id"), RecordRange),
    responses(
        (status = 200, description = "Daily records for the range", body = RecordList),
        (status = 403, description = "Manager/HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn user_records(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    range: web::Query<RecordRange>,
) -> actix_web::Result<impl Responder> {
    auth.require_manager_or_above()?;
    let user_id = path.into_inner();
    let data = fetch_records(&pool, auth.org_id, user_id, &range).await?;
    Ok(HttpResponse::Ok().json(RecordList {
        total: data.len(),
        data,
    }))
}

/* =========================
Punches behind one record
========================= */
#[utoipa::path(
    get,
    path = "/api/v1/attendance/{user_id}/punches",
    params(
        ("user_id" = u64, Path, description = "Subject user id"),
        ("date" = String, Query, description = "Attributed date, YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Punch events attributed to the date", body = [PunchEvent]),
        (status = 403, description = "Manager/HR/Admin only, unless own punches")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn day_punches(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DayQuery>,
) -> actix_web::Result<impl Responder> {
    let user_id = path.into_inner();
    if user_id != auth.user_id {
        auth.require_manager_or_above()?;
    }

    let punches = sqlx::query_as::<_, PunchEvent>(
        r#"
        SELECT id, org_id, branch_id, user_id, external_ref, source, punch_type,
               punched_at, received_at, attributed_date, latitude, longitude,
               accuracy_m, verification, state, request_id
        FROM punch_events
        WHERE org_id = ? AND user_id = ? AND attributed_date = ?
        ORDER BY punched_at, id
        "#,
    )
    .bind(auth.org_id)
    .bind(user_id)
    .bind(query.date)
    .fetch_all(pool.get_ref())
    .await
    .map_err(ApiError::from)?;

    Ok(HttpResponse::Ok().json(punches))
}

#[derive(Deserialize, IntoParams)]
pub struct DayQuery {
    pub date: NaiveDate,
}

async fn fetch_records(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
    range: &RecordRange,
) -> Result<Vec<DailyAttendanceRecord>, ApiError> {
    if range.to < range.from {
        return Err(ApiError::Validation("'to' is before 'from'".into()));
    }
    if (range.to - range.from).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::Validation(format!(
            "range wider than {MAX_RANGE_DAYS} days"
        )));
    }

    let sql = format!(
        "SELECT {RECORD_COLS} FROM daily_attendance
         WHERE org_id = ? AND user_id = ? AND date BETWEEN ? AND ?
         ORDER BY date"
    );
    let rows = sqlx::query_as::<_, DailyAttendanceRecord>(&sql)
        .bind(org_id)
        .bind(user_id)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
