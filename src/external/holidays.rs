//! Holiday calendar lookups. Owned by the calendar service; consulted,
//! never mutated.

use chrono::NaiveDate;
use sqlx::MySqlPool;

use crate::engine::aggregator::HolidayFact;

/// Branch-specific holidays win over org-wide ones for the same date.
pub async fn holiday_on(
    pool: &MySqlPool,
    org_id: u64,
    branch_id: Option<u64>,
    date: NaiveDate,
) -> Result<Option<HolidayFact>, sqlx::Error> {
    let row: Option<(String, f64)> = sqlx::query_as(
        r#"
        SELECT name, worked_multiplier
        FROM holidays
        WHERE org_id = ? AND date = ? AND (branch_id IS NULL OR branch_id = ?)
        ORDER BY branch_id IS NULL
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .bind(date)
    .bind(branch_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, worked_multiplier)| HolidayFact {
        name,
        worked_multiplier,
    }))
}
