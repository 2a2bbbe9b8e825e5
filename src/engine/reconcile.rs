//! Nightly reconciliation sweep: re-derives the previous day for every
//! active, attendance-enabled user of an organization. Idempotent (a
//! re-run on unchanged inputs writes nothing) and per-user fault
//! isolated (one failing user never aborts the sweep).

use chrono::{Duration, NaiveDate, Timelike, Utc};
use futures::StreamExt;
use sqlx::MySqlPool;

use crate::config::Config;
use crate::engine::{aggregator, correction, day};
use crate::error::ApiError;
use crate::external::directory::{self, Subject};
use crate::model::request::AttendanceRequest;
use crate::utils::punch_limiter;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub users_total: usize,
    pub users_failed: usize,
    pub users_skipped: usize,
    pub records_written: usize,
    pub records_unchanged: usize,
    pub orphans_adopted: u64,
    pub requests_replayed: u64,
}

pub async fn run_for_org(
    pool: &MySqlPool,
    cfg: &Config,
    org_id: u64,
    date: NaiveDate,
) -> Result<SweepSummary, ApiError> {
    let mut summary = SweepSummary {
        orphans_adopted: adopt_orphans(pool, org_id, cfg.rollover_buffer_hours).await?,
        requests_replayed: replay_unapplied_requests(pool, cfg, org_id).await?,
        ..SweepSummary::default()
    };

    let users = directory::active_attendance_users(pool, org_id).await?;
    summary.users_total = users.len();

    let results: Vec<_> = futures::stream::iter(users)
        .map(|user| async move {
            let user_id = user.user_id;
            (user_id, reconcile_user_day(pool, cfg, org_id, &user, date).await)
        })
        .buffer_unordered(cfg.reconcile_parallelism.max(1))
        .collect()
        .await;

    for (user_id, result) in results {
        match result {
            Ok(Some(true)) => summary.records_written += 1,
            Ok(Some(false)) => summary.records_unchanged += 1,
            Ok(None) => summary.users_skipped += 1,
            Err(e) => {
                // Isolated: log and move on, the rest of the org still
                // reconciles.
                summary.users_failed += 1;
                tracing::error!(org_id, user_id, %date, error = %e, "user reconciliation failed");
            }
        }
    }

    tracing::info!(
        org_id,
        %date,
        total = summary.users_total,
        written = summary.records_written,
        unchanged = summary.records_unchanged,
        failed = summary.users_failed,
        skipped = summary.users_skipped,
        orphans = summary.orphans_adopted,
        replayed = summary.requests_replayed,
        "reconciliation sweep finished"
    );
    Ok(summary)
}

/// Re-derive one (user, date) under the same row lock online ingestion
/// uses. Returns Some(changed), or None when the user has no shift to
/// derive against.
pub async fn reconcile_user_day(
    pool: &MySqlPool,
    cfg: &Config,
    org_id: u64,
    user: &Subject,
    date: NaiveDate,
) -> Result<Option<bool>, ApiError> {
    let Some(shift_id) = user.shift_id else {
        tracing::warn!(org_id, user_id = user.user_id, "no shift assigned, skipping");
        return Ok(None);
    };
    let shift = directory::shift_by_id(pool, org_id, shift_id)
        .await?
        .ok_or_else(|| ApiError::Internal("shift row missing".into()))?;

    let facts = day::load_facts(
        pool,
        org_id,
        user.branch_id,
        user.user_id,
        &shift,
        date,
        true,
        None,
    )
    .await?;

    let mut tx = pool.begin().await.map_err(ApiError::from)?;
    let record_id =
        day::ensure_locked_record(&mut tx, org_id, user.user_id, date, Some(shift.id)).await?;
    let punches = day::load_day_punches(&mut tx, org_id, user.user_id, date).await?;

    let derived = aggregator::derive_day(&shift, &punches, &facts)
        .ok_or_else(|| ApiError::Internal("closed-day derivation returned nothing".into()))?;

    let stored = day::load_stored(&mut tx, record_id).await?;
    let source = derived.source_request_id.clone();
    let changed = !stored.matches(&derived, source.as_deref());
    if changed {
        day::write_derivation(&mut tx, record_id, Some(shift.id), &derived, source.as_deref())
            .await?;
    }
    tx.commit().await.map_err(ApiError::from)?;
    Ok(Some(changed))
}

/// Orphan events whose external ref has since been mapped get adopted
/// before the sweep, so the day derivation sees them.
pub async fn adopt_orphans(
    pool: &MySqlPool,
    org_id: u64,
    rollover_buffer_hours: u32,
) -> Result<u64, ApiError> {
    let orphans: Vec<(u64, String)> = sqlx::query_as(
        "SELECT id, external_ref FROM punch_events
         WHERE org_id = ? AND state = 'orphan' AND external_ref IS NOT NULL",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    let mut adopted = 0u64;
    for (punch_id, external_ref) in orphans {
        let Some(subject) = directory::subject_by_external_ref(pool, org_id, &external_ref).await?
        else {
            continue;
        };
        let Some(shift_id) = subject.shift_id else { continue };
        let Some(shift) = directory::shift_by_id(pool, org_id, shift_id).await? else {
            continue;
        };

        let (punched_at,): (chrono::NaiveDateTime,) =
            sqlx::query_as("SELECT punched_at FROM punch_events WHERE id = ?")
                .bind(punch_id)
                .fetch_one(pool)
                .await?;
        let attributed =
            crate::engine::shift_resolver::attribute_date(&shift, punched_at, rollover_buffer_hours);

        let res = sqlx::query(
            "UPDATE punch_events
             SET user_id = ?, attributed_date = ?, state = 'processed'
             WHERE id = ? AND state = 'orphan'",
        )
        .bind(subject.user_id)
        .bind(attributed)
        .bind(punch_id)
        .execute(pool)
        .await?;
        adopted += res.rows_affected();
    }

    if adopted > 0 {
        tracing::info!(org_id, adopted, "orphan punches re-attributed");
    }
    Ok(adopted)
}

/// Approved requests with no applied record (an interrupted application
/// from a historical deployment, or a manual status flip) get replayed.
/// The application itself is idempotent, so repeats are harmless.
pub async fn replay_unapplied_requests(
    pool: &MySqlPool,
    cfg: &Config,
    org_id: u64,
) -> Result<u64, ApiError> {
    let stale: Vec<AttendanceRequest> = sqlx::query_as(
        r#"
        SELECT id, org_id, user_id, kind, request_type, target_date, end_date,
               leave_type, proposed_first_in, proposed_last_out, reason, status,
               approval_required, sla_due_at, applied_record_id, applied_punch_ids,
               created_at, updated_at
        FROM attendance_requests
        WHERE org_id = ? AND status = 'approved' AND applied_record_id IS NULL
        "#,
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    let mut replayed = 0u64;
    for req in stale {
        match correction::apply_approved_request(pool, cfg, &req).await {
            Ok(()) => replayed += 1,
            Err(e) => {
                tracing::error!(org_id, request_id = %req.id, error = %e, "request replay failed");
            }
        }
    }
    Ok(replayed)
}

/// Long-lived background task: sleeps until the configured hour, then
/// sweeps every active org for the previous calendar date. Interrupted
/// or repeated runs are safe because the sweep itself is idempotent.
pub async fn run_nightly(pool: MySqlPool, cfg: Config) {
    loop {
        let sleep_secs = secs_until_hour(cfg.reconcile_hour);
        actix_web::rt::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;

        let date = Utc::now().date_naive() - Duration::days(1);
        let orgs = match directory::active_org_ids(&pool).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, "could not list orgs for nightly sweep");
                continue;
            }
        };

        for org_id in orgs {
            if let Err(e) = run_for_org(&pool, &cfg, org_id, date).await {
                tracing::error!(org_id, error = %e, "org sweep failed");
            }
        }

        if let Err(e) = punch_limiter::prune_stale_windows(&pool, Utc::now()).await {
            tracing::warn!(error = %e, "rate window prune failed");
        }
    }
}

fn secs_until_hour(hour: u32) -> u64 {
    let now = Utc::now();
    let seconds_today = (now.hour() * 3600 + now.minute() * 60 + now.second()) as i64;
    let target = (hour * 3600) as i64;
    let mut delta = target - seconds_today;
    if delta <= 0 {
        delta += 86_400;
    }
    delta as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_target_is_within_a_day() {
        for h in 0..24 {
            let s = secs_until_hour(h);
            assert!(s > 0 && s <= 86_400, "hour {h} gave {s}");
        }
    }
}
