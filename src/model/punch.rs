use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Where a punch physically came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PunchSource {
    Terminal,
    Web,
    Mobile,
    Manual,
    Api,
}

/// Canonical punch types every provider payload is normalized into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PunchType {
    In,
    Out,
    BreakStart,
    BreakEnd,
    RemoteIn,
    RemoteOut,
}

impl PunchType {
    /// Remote punches behave like their plain counterparts everywhere
    /// except source reporting.
    pub fn canonical(self) -> PunchType {
        match self {
            PunchType::RemoteIn => PunchType::In,
            PunchType::RemoteOut => PunchType::Out,
            other => other,
        }
    }

    pub fn is_inbound(self) -> bool {
        matches!(self.canonical(), PunchType::In)
    }

    pub fn is_outbound(self) -> bool {
        matches!(self.canonical(), PunchType::Out)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Processed,
    Flagged,
    Rejected,
    Corrected,
    Orphan,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Fingerprint,
    Face,
    Card,
    Password,
    Location,
    ManualOverride,
}

/// Immutable punch fact. Only `state` ever changes after insert; rows are
/// never deleted so the audit trail stays complete. Orphan rows keep the
/// raw `external_ref` so reconciliation can adopt them later.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PunchEvent {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 10)]
    pub org_id: u64,
    pub branch_id: Option<u64>,
    /// None while the subject is unresolved (orphan).
    pub user_id: Option<u64>,
    /// Device-scoped external identifier the subject was (or will be)
    /// resolved from.
    pub external_ref: Option<String>,
    pub source: PunchSource,
    pub punch_type: PunchType,
    /// Event time in org-local wall clock.
    #[schema(value_type = String, format = "date-time")]
    pub punched_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub received_at: DateTime<Utc>,
    /// Calendar day the punch was attributed to by the shift resolver.
    #[schema(value_type = Option<String>, format = "date")]
    pub attributed_date: Option<NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub verification: VerificationState,
    pub state: ProcessingState,
    /// Set when the punch was produced by an approved correction.
    pub request_id: Option<String>,
}

/// The slice of a punch the aggregator folds. Kept tiny so the pure
/// derivation code never sees persistence concerns.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct PunchLite {
    pub id: u64,
    pub punch_type: PunchType,
    pub at: NaiveDateTime,
}

impl From<&PunchEvent> for PunchLite {
    fn from(e: &PunchEvent) -> Self {
        PunchLite {
            id: e.id,
            punch_type: e.punch_type,
            at: e.punched_at,
        }
    }
}
