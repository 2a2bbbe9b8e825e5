use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    HalfDay,
    Late,
    OnLeave,
    WeekOff,
    Holiday,
    WorkFromHome,
    OnDuty,
    MissedPunch,
    HolidayWorked,
    WeekOffWorked,
}

/// Canonical per-(user, date) attendance record. Created lazily on the
/// first punch or by the nightly backfill; mutated only by the aggregator
/// and by approved-correction application; never deleted.
///
/// Invariants: `net_work_hours = max(0, total_work_hours - break_hours)`
/// and `first_in <= last_out` whenever both are present.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct DailyAttendanceRecord {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 10)]
    pub org_id: u64,
    #[schema(example = 1000)]
    pub user_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-08-01")]
    pub date: NaiveDate,
    pub shift_id: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub first_in: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_out: Option<NaiveDateTime>,
    pub total_work_hours: f64,
    pub net_work_hours: f64,
    pub break_hours: f64,
    pub overtime_hours: f64,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub is_half_day: bool,
    pub is_overtime: bool,
    /// Rate the overtime hours pay at; 1.0 when there is no overtime.
    #[schema(example = 1.5)]
    pub overtime_multiplier: f64,
    #[schema(example = 1.0)]
    pub payout_multiplier: f64,
    /// JSON array of contributing punch-event ids, in fold order.
    #[schema(value_type = String, example = "[11,12,13]")]
    pub punch_ids: String,
    /// Request that last set this record's status, if any.
    pub source_request_id: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl DailyAttendanceRecord {
    pub fn punch_id_list(&self) -> Vec<u64> {
        serde_json::from_str(&self.punch_ids).unwrap_or_default()
    }
}
