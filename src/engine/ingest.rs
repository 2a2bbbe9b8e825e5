//! Transactional punch ingestion: subject resolution, normalization,
//! dedup, sequence validation, then the fold into the daily record under
//! the per-(user, date) row lock.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{MySql, MySqlPool, Transaction};

use crate::config::Config;
use crate::engine::{aggregator, day, normalizer, shift_resolver};
use crate::error::ApiError;
use crate::external::directory::{self, Subject};
use crate::model::punch::{ProcessingState, PunchSource, PunchType, VerificationState};
use crate::utils::{device_filter, subject_cache};

/// One raw event as it arrives from a terminal batch or a user punch.
#[derive(Debug, Clone)]
pub struct RawPunch {
    /// Device-scoped external identifier (terminal payloads).
    pub external_ref: Option<String>,
    /// Already-resolved subject (user-initiated punches).
    pub user_id: Option<u64>,
    pub source: PunchSource,
    /// Provider status code, to be mapped through the provider table.
    pub code: Option<String>,
    /// Canonical type, when the caller already knows it.
    pub punch_type: Option<PunchType>,
    pub punched_at: NaiveDateTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub verification: VerificationState,
    pub provider: Option<normalizer::Provider>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Processed {
        punch_id: u64,
        user_id: u64,
        punch_type: PunchType,
        attributed_date: NaiveDate,
        flagged: bool,
    },
    /// Subject could not be resolved; the event is retained for later
    /// re-attribution, never silently dropped.
    Orphaned { punch_id: u64 },
}

pub async fn ingest_punch(
    pool: &MySqlPool,
    cfg: &Config,
    org_id: u64,
    branch_id: Option<u64>,
    raw: RawPunch,
) -> Result<IngestOutcome, ApiError> {
    let punch_type = canonical_type(&raw)?;

    let subject = match resolve_subject(pool, org_id, &raw).await? {
        Some(s) => s,
        None => {
            let punch_id = persist_orphan(pool, org_id, branch_id, &raw, punch_type).await?;
            tracing::info!(org_id, external_ref = ?raw.external_ref, punch_id, "orphan punch retained");
            return Ok(IngestOutcome::Orphaned { punch_id });
        }
    };

    let shift_id = subject
        .shift_id
        .ok_or_else(|| ApiError::Conflict("subject has no shift assigned".into()))?;
    let shift = directory::shift_by_id(pool, org_id, shift_id)
        .await?
        .ok_or_else(|| ApiError::Internal("shift row missing".into()))?;

    let attributed_date =
        shift_resolver::attribute_date(&shift, raw.punched_at, cfg.rollover_buffer_hours);

    let mut tx = pool.begin().await.map_err(ApiError::from)?;

    let record_id = day::ensure_locked_record(
        &mut tx,
        org_id,
        subject.user_id,
        attributed_date,
        Some(shift.id),
    )
    .await?;

    // Dedup and sequence checks run inside the transaction, after the
    // daily-row lock: a concurrent punch for the same user and date has
    // either committed before our reads or is blocked behind the lock.
    let prev_same = last_punch_of(&mut tx, org_id, subject.user_id, Some(punch_type)).await?;
    if normalizer::is_duplicate(prev_same, punch_type, raw.punched_at, cfg.dedup_window_secs) {
        return Err(ApiError::Duplicate(format!(
            "{punch_type} punch repeated within {}s",
            cfg.dedup_window_secs
        )));
    }

    // Sequence violations are flagged, not rejected: the day must stay
    // visible for correction.
    let prev_any = last_punch_of(&mut tx, org_id, subject.user_id, None).await?;
    let flagged = !normalizer::sequence_ok(prev_any.map(|(t, _)| t), punch_type);
    let state = if flagged {
        ProcessingState::Flagged
    } else {
        ProcessingState::Processed
    };

    let res = sqlx::query(
        r#"
        INSERT INTO punch_events
            (org_id, branch_id, user_id, external_ref, source, punch_type,
             punched_at, received_at, attributed_date, latitude, longitude,
             accuracy_m, verification, state)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org_id)
    .bind(branch_id.or(subject.branch_id))
    .bind(subject.user_id)
    .bind(&raw.external_ref)
    .bind(raw.source)
    .bind(punch_type)
    .bind(raw.punched_at)
    .bind(Utc::now())
    .bind(attributed_date)
    .bind(raw.latitude)
    .bind(raw.longitude)
    .bind(raw.accuracy_m)
    .bind(raw.verification)
    .bind(state)
    .execute(&mut *tx)
    .await?;
    let punch_id = res.last_insert_id();

    let facts = day::load_facts(
        pool,
        org_id,
        subject.branch_id,
        subject.user_id,
        &shift,
        attributed_date,
        false,
        None,
    )
    .await?;

    let punches = day::load_day_punches(&mut tx, org_id, subject.user_id, attributed_date).await?;
    let derived = aggregator::derive_day(&shift, &punches, &facts)
        .ok_or_else(|| ApiError::Internal("derivation returned nothing for a punched day".into()))?;
    let source_request_id = derived.source_request_id.clone();
    day::write_derivation(
        &mut tx,
        record_id,
        Some(shift.id),
        &derived,
        source_request_id.as_deref(),
    )
    .await?;

    tx.commit().await.map_err(ApiError::from)?;

    if flagged {
        tracing::warn!(
            org_id,
            user_id = subject.user_id,
            punch_id,
            %punch_type,
            "out-of-sequence punch flagged"
        );
    }

    Ok(IngestOutcome::Processed {
        punch_id,
        user_id: subject.user_id,
        punch_type,
        attributed_date,
        flagged,
    })
}

fn canonical_type(raw: &RawPunch) -> Result<PunchType, ApiError> {
    if let Some(t) = raw.punch_type {
        return Ok(t);
    }
    let code = raw
        .code
        .as_deref()
        .ok_or_else(|| ApiError::Validation("punch needs a type or a provider code".into()))?;
    let provider = raw.provider.unwrap_or(normalizer::Provider::Generic);
    normalizer::map_provider_code(provider, code)
        .ok_or_else(|| ApiError::Validation(format!("unknown {provider} status code '{code}'")))
}

/// Filter -> cache -> directory, in that order. A filter miss is a
/// definitive unknown and short-circuits straight to the orphan path.
async fn resolve_subject(
    pool: &MySqlPool,
    org_id: u64,
    raw: &RawPunch,
) -> Result<Option<Subject>, ApiError> {
    if let Some(user_id) = raw.user_id {
        let subject = directory::subject_by_id(pool, org_id, user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found in this organization".into()))?;
        if !subject.is_active || !subject.attendance_enabled {
            return Err(ApiError::Forbidden("attendance disabled for user".into()));
        }
        return Ok(Some(subject));
    }

    let Some(external_ref) = raw.external_ref.as_deref() else {
        return Err(ApiError::Validation(
            "punch needs a user id or an external ref".into(),
        ));
    };

    if !device_filter::might_resolve(org_id, external_ref) {
        return Ok(None);
    }
    if let Some(cached) = subject_cache::lookup(org_id, external_ref).await {
        if cached.is_active && cached.attendance_enabled {
            return Ok(Some(cached));
        }
        // Stale cache entry for a since-disabled subject.
        subject_cache::forget(org_id, external_ref).await;
    }
    match directory::subject_by_external_ref(pool, org_id, external_ref).await? {
        Some(subject) if subject.is_active && subject.attendance_enabled => {
            subject_cache::remember(org_id, external_ref, subject.clone()).await;
            device_filter::insert(org_id, external_ref);
            Ok(Some(subject))
        }
        Some(_) => {
            // Disabled subjects are evicted so later punches take the
            // short-circuit orphan path.
            subject_cache::forget(org_id, external_ref).await;
            device_filter::remove(org_id, external_ref);
            Err(ApiError::Forbidden("attendance disabled for user".into()))
        }
        // False positive from the filter; the directory is the truth.
        None => Ok(None),
    }
}

async fn persist_orphan(
    pool: &MySqlPool,
    org_id: u64,
    branch_id: Option<u64>,
    raw: &RawPunch,
    punch_type: PunchType,
) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"
        INSERT INTO punch_events
            (org_id, branch_id, user_id, external_ref, source, punch_type,
             punched_at, received_at, verification, state)
        VALUES (?, ?, NULL, ?, ?, ?, ?, ?, ?, 'orphan')
        "#,
    )
    .bind(org_id)
    .bind(branch_id)
    .bind(&raw.external_ref)
    .bind(raw.source)
    .bind(punch_type)
    .bind(raw.punched_at)
    .bind(Utc::now())
    .bind(raw.verification)
    .execute(pool)
    .await?;
    Ok(res.last_insert_id())
}

/// Last recorded punch, optionally restricted to one canonical type
/// (remote variants match their plain counterpart).
async fn last_punch_of(
    tx: &mut Transaction<'_, MySql>,
    org_id: u64,
    user_id: u64,
    of_type: Option<PunchType>,
) -> Result<Option<(PunchType, NaiveDateTime)>, ApiError> {
    let type_filter = match of_type.map(PunchType::canonical) {
        Some(PunchType::In) => "AND punch_type IN ('in', 'remote_in')",
        Some(PunchType::Out) => "AND punch_type IN ('out', 'remote_out')",
        Some(PunchType::BreakStart) => "AND punch_type = 'break_start'",
        Some(PunchType::BreakEnd) => "AND punch_type = 'break_end'",
        Some(_) => unreachable!("canonical() never returns remote variants"),
        None => "",
    };
    let sql = format!(
        r#"
        SELECT punch_type, punched_at
        FROM punch_events
        WHERE org_id = ? AND user_id = ? AND state IN ('processed', 'flagged') {type_filter}
        ORDER BY punched_at DESC, id DESC
        LIMIT 1
        "#
    );
    let row: Option<(PunchType, NaiveDateTime)> = sqlx::query_as(&sql)
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

/// Last punch that carried usable coordinates, for the movement
/// plausibility check.
pub async fn last_located_punch(
    pool: &MySqlPool,
    org_id: u64,
    user_id: u64,
) -> Result<Option<(f64, f64, NaiveDateTime)>, ApiError> {
    let row: Option<(f64, f64, NaiveDateTime)> = sqlx::query_as(
        r#"
        SELECT latitude, longitude, punched_at
        FROM punch_events
        WHERE org_id = ? AND user_id = ?
          AND latitude IS NOT NULL AND longitude IS NOT NULL
          AND state IN ('processed', 'flagged')
        ORDER BY punched_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
