//! Leave-balance ledger interface. The ledger itself is external; this
//! core only checks and debits through it.

use sqlx::MySqlPool;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceDecision {
    pub allowed: bool,
    pub remaining_days: f64,
}

pub async fn check(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
    leave_type: &str,
    days: f64,
) -> Result<BalanceDecision, sqlx::Error> {
    let row: Option<(f64,)> = sqlx::query_as(
        "SELECT balance_days FROM leave_balances
         WHERE org_id = ? AND user_id = ? AND leave_type = ?",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(leave_type)
    .fetch_optional(pool)
    .await?;

    let balance = row.map(|(b,)| b).unwrap_or(0.0);
    Ok(BalanceDecision {
        allowed: balance >= days,
        remaining_days: balance - days,
    })
}

/// Guarded debit: fails the check-and-debit atomically when the balance
/// is short, so two concurrent approvals cannot both spend it. Generic
/// over the executor so the correction applier can run it inside its
/// transaction.
pub async fn debit<'e, E>(
    executor: E,
    org_id: u64,
    user_id: u64,
    leave_type: &str,
    days: f64,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    let res = sqlx::query(
        "UPDATE leave_balances
         SET balance_days = balance_days - ?
         WHERE org_id = ? AND user_id = ? AND leave_type = ? AND balance_days >= ?",
    )
    .bind(days)
    .bind(org_id)
    .bind(user_id)
    .bind(leave_type)
    .bind(days)
    .execute(executor)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Reversal of an earlier debit (leave cancelled or reversed).
pub async fn credit_back<'e, E>(
    executor: E,
    org_id: u64,
    user_id: u64,
    leave_type: &str,
    days: f64,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query(
        "UPDATE leave_balances
         SET balance_days = balance_days + ?
         WHERE org_id = ? AND user_id = ? AND leave_type = ?",
    )
    .bind(days)
    .bind(org_id)
    .bind(user_id)
    .bind(leave_type)
    .execute(executor)
    .await?;
    Ok(())
}
