use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::error::ApiError;

/// Fixed-window per-subject punch counter, kept in the database so the
/// bound holds across restarts and across multiple service instances
/// (an in-process counter would reset and over-admit).
///
/// The upsert-then-read is atomic enough for a rate check: concurrent
/// punches each bump the row and the over-limit ones all see a count
/// past the threshold.
pub async fn check_punch_window(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
    now: DateTime<Utc>,
    window_secs: i64,
    max_punches: u32,
) -> Result<(), ApiError> {
    let window_start = now.timestamp() - now.timestamp().rem_euclid(window_secs);

    sqlx::query(
        r#"
        INSERT INTO punch_rate_windows (org_id, user_id, window_start, punches)
        VALUES (?, ?, ?, 1)
        ON DUPLICATE KEY UPDATE punches = punches + 1
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .bind(window_start)
    .execute(pool)
    .await?;

    let (count,): (u32,) = sqlx::query_as(
        "SELECT punches FROM punch_rate_windows
         WHERE org_id = ? AND user_id = ? AND window_start = ?",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    if count > max_punches {
        return Err(ApiError::RateLimited);
    }
    Ok(())
}

/// Drop windows older than a day; called opportunistically by the
/// nightly batch.
pub async fn prune_stale_windows(pool: &MySqlPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let cutoff = now.timestamp() - 86_400;
    let res = sqlx::query("DELETE FROM punch_rate_windows WHERE window_start < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
