use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use crate::external::directory::Subject;

/// org-scoped external ref ("{org_id}:{external_ref}") -> resolved
/// subject. Keeps terminal bursts off the users table.
pub static SUBJECT_CACHE: Lazy<Cache<String, Subject>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(500_000)
        .time_to_live(Duration::from_secs(3600)) // re-resolve hourly; shift moves must show up
        .build()
});

fn key(org_id: u64, external_ref: &str) -> String {
    format!("{org_id}:{}", external_ref.trim())
}

pub async fn remember(org_id: u64, external_ref: &str, subject: Subject) {
    SUBJECT_CACHE.insert(key(org_id, external_ref), subject).await;
}

pub async fn lookup(org_id: u64, external_ref: &str) -> Option<Subject> {
    SUBJECT_CACHE.get(&key(org_id, external_ref)).await
}

pub async fn forget(org_id: u64, external_ref: &str) {
    SUBJECT_CACHE.invalidate(&key(org_id, external_ref)).await;
}

/// Preload every mapped external ref so the first terminal sync after a
/// restart does not stampede the directory.
pub async fn warmup_subject_cache(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, SubjectRefRow>(
        r#"
        SELECT id AS user_id, org_id, branch_id, shift_id, manager_id,
               is_active, attendance_enabled, external_ref
        FROM users
        WHERE external_ref IS NOT NULL AND is_active = 1
        "#,
    )
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let row = row?;
        batch.push(row);
        total += 1;

        if batch.len() >= batch_size {
            insert_batch(&mut batch).await;
        }
    }
    if !batch.is_empty() {
        insert_batch(&mut batch).await;
    }

    log::info!("Subject cache warmup complete: {} mapped users", total);
    Ok(())
}

async fn insert_batch(batch: &mut Vec<SubjectRefRow>) {
    let futures: Vec<_> = batch
        .drain(..)
        .map(|row| {
            let k = key(row.org_id, &row.external_ref);
            let subject = Subject {
                user_id: row.user_id,
                org_id: row.org_id,
                branch_id: row.branch_id,
                shift_id: row.shift_id,
                manager_id: row.manager_id,
                is_active: row.is_active,
                attendance_enabled: row.attendance_enabled,
            };
            SUBJECT_CACHE.insert(k, subject)
        })
        .collect();
    futures::future::join_all(futures).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(user_id: u64, org_id: u64) -> Subject {
        Subject {
            user_id,
            org_id,
            branch_id: None,
            shift_id: Some(1),
            manager_id: None,
            is_active: true,
            attendance_enabled: true,
        }
    }

    // The cache is process-global, so each test uses its own org id.

    #[actix_web::test]
    async fn remember_lookup_forget() {
        remember(910_001, "EMP-9", subject(42, 910_001)).await;
        let hit = lookup(910_001, "EMP-9").await.unwrap();
        assert_eq!(hit.user_id, 42);

        forget(910_001, "EMP-9").await;
        assert!(lookup(910_001, "EMP-9").await.is_none());
    }

    #[actix_web::test]
    async fn keys_trim_and_org_scope() {
        remember(910_002, " EMP-1 ", subject(7, 910_002)).await;
        assert!(lookup(910_002, "EMP-1").await.is_some());
        assert!(lookup(910_003, "EMP-1").await.is_none());
    }
}

#[derive(sqlx::FromRow)]
struct SubjectRefRow {
    user_id: u64,
    org_id: u64,
    branch_id: Option<u64>,
    shift_id: Option<u64>,
    manager_id: Option<u64>,
    is_active: bool,
    attendance_enabled: bool,
    external_ref: String,
}
