//! Fire-and-forget notification dispatch. Delivery transport is an
//! external worker; this core only drops rows into the outbox and never
//! lets a notification failure fail the triggering workflow.

use sqlx::MySqlPool;

pub async fn dispatch(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
    topic: &str,
    payload: serde_json::Value,
) {
    let res = sqlx::query(
        "INSERT INTO notification_outbox (org_id, user_id, topic, payload) VALUES (?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(user_id)
    .bind(topic)
    .bind(payload.to_string())
    .execute(pool)
    .await;

    if let Err(e) = res {
        tracing::warn!(error = %e, topic, user_id, "notification enqueue failed");
    }
}

/// Detached variant for call sites that must not await delivery.
pub fn dispatch_detached(
    pool: MySqlPool,
    org_id: u64,
    user_id: u64,
    topic: &'static str,
    payload: serde_json::Value,
) {
    actix_web::rt::spawn(async move {
        dispatch(&pool, org_id, user_id, topic, payload).await;
    });
}
