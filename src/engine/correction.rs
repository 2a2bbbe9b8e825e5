//! Applies an approved request back onto daily records, atomically and
//! idempotently. A request can never end up approved without its
//! correction applied, or applied twice: the whole unit commits or rolls
//! back together, and `applied_record_id` doubles as the idempotency
//! marker.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::{MySql, MySqlPool, Transaction};

use crate::config::Config;
use crate::engine::aggregator::{self, DayFacts, LeaveFact};
use crate::engine::day;
use crate::error::ApiError;
use crate::external::{directory, leave_balance};
use crate::model::punch::{ProcessingState, PunchSource, PunchType, VerificationState};
use crate::model::request::{AttendanceRequest, RequestType};
use crate::model::shift::Shift;

pub async fn apply_approved_request(
    pool: &MySqlPool,
    cfg: &Config,
    req: &AttendanceRequest,
) -> Result<(), ApiError> {
    let mut tx = pool.begin().await.map_err(ApiError::from)?;
    apply_in_tx(pool, &mut tx, cfg, req).await?;
    tx.commit().await.map_err(ApiError::from)?;
    Ok(())
}

/// Application body for callers that already hold a transaction, so the
/// final approval and its side effects commit or roll back as one unit.
pub async fn apply_in_tx(
    pool: &MySqlPool,
    tx: &mut Transaction<'_, MySql>,
    cfg: &Config,
    req: &AttendanceRequest,
) -> Result<(), ApiError> {
    let subject = directory::subject_by_id(pool, req.org_id, req.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("request subject no longer exists".into()))?;
    let shift_id = subject
        .shift_id
        .ok_or_else(|| ApiError::Conflict("subject has no shift assigned".into()))?;
    let shift = directory::shift_by_id(pool, req.org_id, shift_id)
        .await?
        .ok_or_else(|| ApiError::Internal("shift row missing".into()))?;

    // Serialize appliers on the request row; a concurrent second final
    // approval sees the back-reference and no-ops.
    let (already_applied,): (Option<u64>,) = sqlx::query_as(
        "SELECT applied_record_id FROM attendance_requests WHERE id = ? FOR UPDATE",
    )
    .bind(&req.id)
    .fetch_one(&mut **tx)
    .await?;
    if already_applied.is_some() {
        tracing::debug!(request_id = %req.id, "correction already applied, no-op");
        return Ok(());
    }

    let (record_id, punch_ids) = match req.request_type {
        RequestType::Correction | RequestType::MissedPunch => {
            apply_correction(pool, tx, req, &shift, subject.branch_id).await?
        }
        RequestType::Leave | RequestType::WorkFromHome | RequestType::OnDuty => {
            apply_leave_family(pool, tx, cfg, req, &shift, subject.branch_id).await?
        }
        RequestType::LeaveReversal => {
            apply_leave_reversal(pool, tx, req, &shift, subject.branch_id).await?
        }
    };

    sqlx::query(
        "UPDATE attendance_requests
         SET applied_record_id = ?, applied_punch_ids = ?, updated_at = NOW()
         WHERE id = ?",
    )
    .bind(record_id)
    .bind(day::encode_punch_ids(&punch_ids))
    .bind(&req.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Correction/missed-punch: create the proposed punches as "corrected"
/// events referencing the request, then re-derive the day.
async fn apply_correction(
    pool: &MySqlPool,
    tx: &mut Transaction<'_, MySql>,
    req: &AttendanceRequest,
    shift: &Shift,
    branch_id: Option<u64>,
) -> Result<(u64, Vec<u64>), ApiError> {
    let record_id =
        day::ensure_locked_record(tx, req.org_id, req.user_id, req.target_date, Some(shift.id))
            .await?;

    let mut punch_ids = Vec::new();
    if let Some(first_in) = req.proposed_first_in {
        punch_ids
            .push(insert_corrected_punch(tx, req, branch_id, PunchType::In, first_in).await?);
    }
    if let Some(last_out) = req.proposed_last_out {
        punch_ids
            .push(insert_corrected_punch(tx, req, branch_id, PunchType::Out, last_out).await?);
    }

    let facts = day::load_facts(
        pool,
        req.org_id,
        branch_id,
        req.user_id,
        shift,
        req.target_date,
        true,
        None,
    )
    .await?;
    let punches = day::load_day_punches(tx, req.org_id, req.user_id, req.target_date).await?;
    let derived = aggregator::derive_day(shift, &punches, &facts)
        .ok_or_else(|| ApiError::Internal("derivation returned nothing for a corrected day".into()))?;
    day::write_derivation(tx, record_id, Some(shift.id), &derived, Some(&req.id)).await?;

    Ok((record_id, punch_ids))
}

/// Leave/WFH/on-duty: stamp every day of the range, debiting the balance
/// for true leave inside the same transaction.
async fn apply_leave_family(
    pool: &MySqlPool,
    tx: &mut Transaction<'_, MySql>,
    _cfg: &Config,
    req: &AttendanceRequest,
    shift: &Shift,
    branch_id: Option<u64>,
) -> Result<(u64, Vec<u64>), ApiError> {
    let days = leave_days(req);

    if req.request_type == RequestType::Leave {
        let leave_type = req
            .leave_type
            .as_deref()
            .ok_or_else(|| ApiError::Validation("leave request without leave type".into()))?;
        let debited = leave_balance::debit(
            &mut **tx,
            req.org_id,
            req.user_id,
            leave_type,
            days.len() as f64,
        )
        .await?;
        if !debited {
            return Err(ApiError::Conflict("insufficient leave balance".into()));
        }
    }

    let fact = LeaveFact {
        request_id: req.id.clone(),
        request_type: req.request_type,
        leave_type: req.leave_type.clone(),
    };

    let mut first_record = None;
    for date in days {
        let record_id =
            day::ensure_locked_record(tx, req.org_id, req.user_id, date, Some(shift.id)).await?;
        let mut facts = day::load_facts(
            pool,
            req.org_id,
            branch_id,
            req.user_id,
            shift,
            date,
            day_is_closed(date),
            None,
        )
        .await?;
        facts.approved_leave = Some(fact.clone());

        let punches = day::load_day_punches(tx, req.org_id, req.user_id, date).await?;
        if let Some(derived) = aggregator::derive_day(shift, &punches, &facts) {
            day::write_derivation(tx, record_id, Some(shift.id), &derived, Some(&req.id)).await?;
        }
        first_record.get_or_insert(record_id);
    }

    let record_id =
        first_record.ok_or_else(|| ApiError::Validation("leave covers no days".into()))?;
    Ok((record_id, Vec::new()))
}

/// Reversal of an approved leave: re-derive every covered day as if the
/// leave never existed and credit the balance back. The reversed request
/// row itself stays untouched apart from audit; its day overrides are
/// what get rolled back.
async fn apply_leave_reversal(
    pool: &MySqlPool,
    tx: &mut Transaction<'_, MySql>,
    req: &AttendanceRequest,
    shift: &Shift,
    branch_id: Option<u64>,
) -> Result<(u64, Vec<u64>), ApiError> {
    let original: Option<(String, Option<String>, NaiveDate, Option<NaiveDate>)> = sqlx::query_as(
        r#"
        SELECT id, leave_type, target_date, end_date
        FROM attendance_requests
        WHERE org_id = ? AND user_id = ? AND status = 'approved'
          AND request_type = 'leave'
          AND target_date <= ? AND COALESCE(end_date, target_date) >= ?
        ORDER BY updated_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(req.org_id)
    .bind(req.user_id)
    .bind(req.target_date)
    .bind(req.target_date)
    .fetch_optional(&mut **tx)
    .await?;

    let (orig_id, leave_type, start, end) = original
        .ok_or_else(|| ApiError::NotFound("no approved leave covers the target date".into()))?;

    let mut first_record = None;
    let mut date = start;
    let end = end.unwrap_or(start);
    while date <= end {
        let record_id =
            day::ensure_locked_record(tx, req.org_id, req.user_id, date, Some(shift.id)).await?;
        let facts = day::load_facts(
            pool,
            req.org_id,
            branch_id,
            req.user_id,
            shift,
            date,
            day_is_closed(date),
            Some(&orig_id),
        )
        .await?;
        let punches = day::load_day_punches(tx, req.org_id, req.user_id, date).await?;
        match aggregator::derive_day(shift, &punches, &facts) {
            Some(derived) => {
                let src = derived.source_request_id.clone();
                day::write_derivation(tx, record_id, Some(shift.id), &derived, src.as_deref())
                    .await?;
            }
            // Open future day with nothing left on it: clear back to a
            // punchless present placeholder is wrong, so derive closed.
            None => {
                let closed = DayFacts {
                    day_closed: true,
                    ..facts
                };
                if let Some(derived) = aggregator::derive_day(shift, &punches, &closed) {
                    day::write_derivation(tx, record_id, Some(shift.id), &derived, None).await?;
                }
            }
        }
        first_record.get_or_insert(record_id);
        date += Duration::days(1);
    }

    if let Some(lt) = leave_type {
        let day_count = (end - start).num_days() + 1;
        leave_balance::credit_back(&mut **tx, req.org_id, req.user_id, &lt, day_count as f64)
            .await?;
    }

    sqlx::query(
        "INSERT INTO request_audit (request_id, actor_id, action, detail)
         VALUES (?, ?, 'reversed', ?)",
    )
    .bind(&orig_id)
    .bind(req.user_id)
    .bind(format!("reversed by request {}", req.id))
    .execute(&mut **tx)
    .await?;

    let record_id = first_record.ok_or_else(|| ApiError::Internal("empty reversal range".into()))?;
    Ok((record_id, Vec::new()))
}

async fn insert_corrected_punch(
    tx: &mut Transaction<'_, MySql>,
    req: &AttendanceRequest,
    branch_id: Option<u64>,
    punch_type: PunchType,
    at: chrono::NaiveDateTime,
) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"
        INSERT INTO punch_events
            (org_id, branch_id, user_id, source, punch_type, punched_at,
             received_at, attributed_date, verification, state, request_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(req.org_id)
    .bind(branch_id)
    .bind(req.user_id)
    .bind(PunchSource::Manual)
    .bind(punch_type)
    .bind(at)
    .bind(Utc::now())
    .bind(req.target_date)
    .bind(VerificationState::ManualOverride)
    .bind(ProcessingState::Corrected)
    .bind(&req.id)
    .execute(&mut **tx)
    .await?;
    Ok(res.last_insert_id())
}

fn leave_days(req: &AttendanceRequest) -> Vec<NaiveDate> {
    let end = req.end_date.unwrap_or(req.target_date);
    let mut days = Vec::new();
    let mut d = req.target_date;
    while d <= end {
        days.push(d);
        d += Duration::days(1);
    }
    days
}

fn day_is_closed(date: NaiveDate) -> bool {
    // A day is closed once it is strictly in the past (server date).
    date < Utc::now().date_naive()
}
