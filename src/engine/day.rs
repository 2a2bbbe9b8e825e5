//! Per-(user, date) persistence helpers shared by online ingestion, the
//! correction applier and the nightly batch. All three serialize on the
//! same daily row lock so a concurrent punch and a concurrent correction
//! cannot silently drop each other's update.

use chrono::NaiveDate;
use sqlx::{MySql, MySqlPool, Transaction};

use crate::engine::aggregator::{DayFacts, DerivedDay, HolidayFact, LeaveFact};
use crate::external::holidays;
use crate::model::punch::PunchLite;
use crate::model::request::RequestType;
use crate::model::shift::Shift;

/// Create the daily row if missing, then take a row lock on it. Every
/// writer goes through this, which is what makes per-key updates
/// transactional read-modify-write instead of last-writer-wins.
pub async fn ensure_locked_record(
    tx: &mut Transaction<'_, MySql>,
    org_id: u64,
    user_id: u64,
    date: NaiveDate,
    shift_id: Option<u64>,
) -> Result<u64, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT IGNORE INTO daily_attendance
            (org_id, user_id, date, shift_id, status, punch_ids)
        VALUES (?, ?, ?, ?, 'present', '[]')
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .bind(date)
    .bind(shift_id)
    .execute(&mut **tx)
    .await?;

    let (id,): (u64,) = sqlx::query_as(
        "SELECT id FROM daily_attendance
         WHERE org_id = ? AND user_id = ? AND date = ? FOR UPDATE",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(date)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

/// All punches attributed to the day, oldest first. Rejected and orphan
/// events never contribute; flagged ones do (a sequence violation still
/// has to be visible for correction).
pub async fn load_day_punches(
    tx: &mut Transaction<'_, MySql>,
    org_id: u64,
    user_id: u64,
    date: NaiveDate,
) -> Result<Vec<PunchLite>, sqlx::Error> {
    sqlx::query_as::<_, PunchLite>(
        r#"
        SELECT id, punch_type, punched_at AS at
        FROM punch_events
        WHERE org_id = ? AND user_id = ? AND attributed_date = ?
          AND state IN ('processed', 'flagged', 'corrected')
        ORDER BY punched_at, id
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .bind(date)
    .fetch_all(&mut **tx)
    .await
}

/// Reference facts for one (user, date). `ignore_request` lets the
/// leave-reversal path re-derive a day as if the reversed leave had
/// never been approved.
pub async fn load_facts(
    pool: &MySqlPool,
    org_id: u64,
    branch_id: Option<u64>,
    user_id: u64,
    shift: &Shift,
    date: NaiveDate,
    day_closed: bool,
    ignore_request: Option<&str>,
) -> Result<DayFacts, sqlx::Error> {
    let holiday: Option<HolidayFact> = holidays::holiday_on(pool, org_id, branch_id, date).await?;

    let leave_row: Option<(String, RequestType, Option<String>)> = sqlx::query_as(
        r#"
        SELECT id, request_type, leave_type
        FROM attendance_requests
        WHERE org_id = ? AND user_id = ? AND status = 'approved'
          AND request_type IN ('leave', 'work_from_home', 'on_duty')
          AND target_date <= ? AND COALESCE(end_date, target_date) >= ?
          AND id <> COALESCE(?, '')
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .bind(date)
    .bind(date)
    .bind(ignore_request)
    .fetch_optional(pool)
    .await?;

    Ok(DayFacts {
        holiday,
        weekly_off: shift.is_weekly_off(chrono::Datelike::weekday(&date)),
        approved_leave: leave_row.map(|(request_id, request_type, leave_type)| LeaveFact {
            request_id,
            request_type,
            leave_type,
        }),
        day_closed,
    })
}

/// Persisted derivation fields, for change detection. The nightly batch
/// skips the write when nothing differs, which is what makes a re-run a
/// no-op on unchanged days.
#[derive(Debug, sqlx::FromRow)]
pub struct StoredDerivation {
    pub first_in: Option<chrono::NaiveDateTime>,
    pub last_out: Option<chrono::NaiveDateTime>,
    pub total_work_hours: f64,
    pub net_work_hours: f64,
    pub break_hours: f64,
    pub overtime_hours: f64,
    pub status: crate::model::daily::AttendanceStatus,
    pub is_late: bool,
    pub is_half_day: bool,
    pub is_overtime: bool,
    pub overtime_multiplier: f64,
    pub payout_multiplier: f64,
    pub punch_ids: String,
    pub source_request_id: Option<String>,
}

impl StoredDerivation {
    pub fn matches(&self, d: &DerivedDay, source_request_id: Option<&str>) -> bool {
        self.first_in == d.first_in
            && self.last_out == d.last_out
            && self.total_work_hours == d.total_work_hours
            && self.net_work_hours == d.net_work_hours
            && self.break_hours == d.break_hours
            && self.overtime_hours == d.overtime_hours
            && self.status == d.status
            && self.is_late == d.is_late
            && self.is_half_day == d.is_half_day
            && self.is_overtime == d.is_overtime
            && self.overtime_multiplier == d.overtime_multiplier
            && self.payout_multiplier == d.payout_multiplier
            && self.punch_ids == encode_punch_ids(&d.punch_ids)
            && self.source_request_id.as_deref() == source_request_id
    }
}

pub async fn load_stored(
    tx: &mut Transaction<'_, MySql>,
    record_id: u64,
) -> Result<StoredDerivation, sqlx::Error> {
    sqlx::query_as::<_, StoredDerivation>(
        r#"
        SELECT first_in, last_out, total_work_hours, net_work_hours, break_hours,
               overtime_hours, status, is_late, is_half_day, is_overtime,
               overtime_multiplier, payout_multiplier, punch_ids, source_request_id
        FROM daily_attendance
        WHERE id = ?
        "#,
    )
    .bind(record_id)
    .fetch_one(&mut **tx)
    .await
}

pub fn encode_punch_ids(ids: &[u64]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

/// Write the derived fields back onto the locked daily row.
pub async fn write_derivation(
    tx: &mut Transaction<'_, MySql>,
    record_id: u64,
    shift_id: Option<u64>,
    derived: &DerivedDay,
    source_request_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE daily_attendance
        SET shift_id = ?, first_in = ?, last_out = ?, total_work_hours = ?,
            net_work_hours = ?, break_hours = ?, overtime_hours = ?, status = ?,
            is_late = ?, is_half_day = ?, is_overtime = ?, overtime_multiplier = ?,
            payout_multiplier = ?,
            punch_ids = ?, source_request_id = ?, updated_at = NOW()
        WHERE id = ?
        "#,
    )
    .bind(shift_id)
    .bind(derived.first_in)
    .bind(derived.last_out)
    .bind(derived.total_work_hours)
    .bind(derived.net_work_hours)
    .bind(derived.break_hours)
    .bind(derived.overtime_hours)
    .bind(derived.status)
    .bind(derived.is_late)
    .bind(derived.is_half_day)
    .bind(derived.is_overtime)
    .bind(derived.overtime_multiplier)
    .bind(derived.payout_multiplier)
    .bind(encode_punch_ids(&derived.punch_ids))
    .bind(source_request_id)
    .bind(record_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
