//! User directory, consumed read-only. Ownership of users, branches and
//! shifts lives in the provisioning service; this core only looks them
//! up, always under an explicit org scope.

use sqlx::MySqlPool;

use crate::model::shift::Shift;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subject {
    pub user_id: u64,
    pub org_id: u64,
    pub branch_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub manager_id: Option<u64>,
    pub is_active: bool,
    pub attendance_enabled: bool,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct BranchLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

const SUBJECT_COLS: &str =
    "id AS user_id, org_id, branch_id, shift_id, manager_id, is_active, attendance_enabled";

pub async fn subject_by_id(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
) -> Result<Option<Subject>, sqlx::Error> {
    sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLS} FROM users WHERE org_id = ? AND id = ?"
    ))
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Resolve the device-scoped external identifier a terminal reports.
pub async fn subject_by_external_ref(
    pool: &MySqlPool,
    org_id: u64,
    external_ref: &str,
) -> Result<Option<Subject>, sqlx::Error> {
    sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLS} FROM users WHERE org_id = ? AND external_ref = ?"
    ))
    .bind(org_id)
    .bind(external_ref)
    .fetch_optional(pool)
    .await
}

/// Offset of the org's wall clock from UTC, in minutes. Punch
/// timestamps are stored on this clock.
pub async fn org_utc_offset_minutes(pool: &MySqlPool, org_id: u64) -> Result<i32, sqlx::Error> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT utc_offset_minutes FROM orgs WHERE id = ?")
            .bind(org_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(m,)| m).unwrap_or(0))
}

pub async fn active_attendance_users(
    pool: &MySqlPool,
    org_id: u64,
) -> Result<Vec<Subject>, sqlx::Error> {
    sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLS} FROM users
         WHERE org_id = ? AND is_active = 1 AND attendance_enabled = 1
         ORDER BY id"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await
}

pub async fn shift_by_id(
    pool: &MySqlPool,
    org_id: u64,
    shift_id: u64,
) -> Result<Option<Shift>, sqlx::Error> {
    sqlx::query_as::<_, Shift>(
        r#"
        SELECT id, org_id, name, start_time, end_time, break_minutes, grace_minutes,
               half_day_hours, full_day_hours, is_night_shift, weekly_off_days,
               overtime_multiplier, night_overtime_multiplier,
               holiday_worked_multiplier, weekoff_worked_multiplier
        FROM shifts
        WHERE org_id = ? AND id = ?
        "#,
    )
    .bind(org_id)
    .bind(shift_id)
    .fetch_optional(pool)
    .await
}

pub async fn branch_location(
    pool: &MySqlPool,
    org_id: u64,
    branch_id: u64,
) -> Result<Option<BranchLocation>, sqlx::Error> {
    sqlx::query_as::<_, BranchLocation>(
        "SELECT latitude, longitude, radius_m FROM branches
         WHERE org_id = ? AND id = ? AND latitude IS NOT NULL AND longitude IS NOT NULL",
    )
    .bind(org_id)
    .bind(branch_id)
    .fetch_optional(pool)
    .await
}

/// Ordered approver chain for a subject: direct manager first, then the
/// org's HR approver when configured. Both are mandatory.
pub async fn reporting_chain(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
) -> Result<Vec<(u64, String)>, sqlx::Error> {
    let mut chain = Vec::new();

    let manager: Option<(u64,)> =
        sqlx::query_as("SELECT manager_id FROM users WHERE org_id = ? AND id = ? AND manager_id IS NOT NULL")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    if let Some((m,)) = manager {
        chain.push((m, "manager".to_string()));
    }

    let hr: Option<(u64,)> =
        sqlx::query_as("SELECT hr_approver_id FROM orgs WHERE id = ? AND hr_approver_id IS NOT NULL")
            .bind(org_id)
            .fetch_optional(pool)
            .await?;
    if let Some((h,)) = hr {
        if !chain.iter().any(|(id, _)| *id == h) {
            chain.push((h, "hr".to_string()));
        }
    }

    Ok(chain)
}

pub async fn active_org_ids(pool: &MySqlPool) -> Result<Vec<u64>, sqlx::Error> {
    let rows: Vec<(u64,)> = sqlx::query_as("SELECT id FROM orgs WHERE is_active = 1 ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
