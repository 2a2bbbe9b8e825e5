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
pub enum RequestKind {
    Regularization,
    Leave,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestType {
    MissedPunch,
    Correction,
    WorkFromHome,
    OnDuty,
    Leave,
    LeaveReversal,
}

impl RequestType {
    pub fn kind(self) -> RequestKind {
        match self {
            RequestType::Leave | RequestType::LeaveReversal => RequestKind::Leave,
            _ => RequestKind::Regularization,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    UnderReview,
    Forwarded,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Approved | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }

    /// Statuses that count against the one-open-request-per-(user, date)
    /// invariant.
    pub const OPEN: [RequestStatus; 4] = [
        RequestStatus::Draft,
        RequestStatus::Pending,
        RequestStatus::UnderReview,
        RequestStatus::Forwarded,
    ];
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Display,
    EnumString, AsRefStr,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApproverStatus {
    Pending,
    Approved,
    Rejected,
    Forwarded,
}

/// Regularization or leave workflow instance. Terminal rows are read-only;
/// approver and audit rows are the only parts that grow while open.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceRequest {
    /// UUID primary key.
    #[schema(example = "5f3a0d3e-1b7a-4c52-9a91-1f6a2f0a9c11")]
    pub id: String,
    pub org_id: u64,
    pub user_id: u64,
    pub kind: RequestKind,
    pub request_type: RequestType,
    #[schema(value_type = String, format = "date")]
    pub target_date: NaiveDate,
    /// Inclusive range end for leave; None for single-day requests.
    #[schema(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
    pub leave_type: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub proposed_first_in: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub proposed_last_out: Option<NaiveDateTime>,
    pub reason: String,
    pub status: RequestStatus,
    /// Number of approvals required; grows when the chain is forwarded.
    pub approval_required: u32,
    #[schema(value_type = String, format = "date-time")]
    pub sla_due_at: DateTime<Utc>,
    /// Daily record the approved correction wrote; doubles as the
    /// idempotency marker for re-application.
    pub applied_record_id: Option<u64>,
    /// JSON array of punch-event ids the correction created.
    pub applied_punch_ids: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRequest {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.sla_due_at
    }
}

/// One entry of the ordered approver chain.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct RequestApprover {
    pub id: u64,
    pub request_id: String,
    /// Position in the chain, 1-based.
    pub seq: u32,
    pub approver_id: u64,
    #[schema(example = "manager")]
    pub role: String,
    pub status: ApproverStatus,
    pub comments: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub acted_at: Option<DateTime<Utc>>,
    pub mandatory: bool,
}

/// Append-only audit trail row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct RequestAudit {
    pub id: u64,
    pub request_id: String,
    pub actor_id: u64,
    #[schema(example = "approved")]
    pub action: String,
    pub detail: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub at: DateTime<Utc>,
}
