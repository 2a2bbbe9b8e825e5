use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

/// Expected mapped-user count and false-positive rate.
const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

/// Membership pre-filter over "{org_id}:{external_ref}" keys. A miss
/// here is definitive: the punch can go straight to the orphan path
/// without touching the directory. A hit still gets confirmed by the
/// cache/DB (false positives possible).
static EXTERNAL_REF_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

#[inline]
fn key(org_id: u64, external_ref: &str) -> String {
    format!("{org_id}:{}", external_ref.trim())
}

pub fn might_resolve(org_id: u64, external_ref: &str) -> bool {
    EXTERNAL_REF_FILTER
        .read()
        .expect("external ref filter poisoned")
        .contains(&key(org_id, external_ref))
}

pub fn insert(org_id: u64, external_ref: &str) {
    EXTERNAL_REF_FILTER
        .write()
        .expect("external ref filter poisoned")
        .add(&key(org_id, external_ref));
}

pub fn remove(org_id: u64, external_ref: &str) {
    EXTERNAL_REF_FILTER
        .write()
        .expect("external ref filter poisoned")
        .remove(&key(org_id, external_ref));
}

/// Stream every mapped external ref into the filter at startup.
pub async fn warmup_device_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (u64, String)>(
        "SELECT org_id, external_ref FROM users
         WHERE external_ref IS NOT NULL AND is_active = 1 AND attendance_enabled = 1",
    )
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (org_id, external_ref) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;
        batch.push(key(org_id, &external_ref));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    log::info!("Device filter warmup complete: {} external refs", total);
    Ok(())
}

fn insert_batch(keys: &[String]) {
    let mut filter = EXTERNAL_REF_FILTER
        .write()
        .expect("external ref filter poisoned");
    for k in keys {
        filter.add(k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The filter is process-global, so each test uses its own org id.

    #[test]
    fn unknown_ref_misses() {
        assert!(!might_resolve(900_001, "EMP-404"));
    }

    #[test]
    fn insert_then_remove_round_trip() {
        insert(900_002, "EMP-77");
        assert!(might_resolve(900_002, "EMP-77"));
        remove(900_002, "EMP-77");
        assert!(!might_resolve(900_002, "EMP-77"));
    }

    #[test]
    fn keys_are_org_scoped() {
        insert(900_003, "EMP-1");
        assert!(!might_resolve(900_004, "EMP-1"));
    }
}
