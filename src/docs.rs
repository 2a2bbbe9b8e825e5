use crate::api::ingest::{BatchSync, DeviceEvent, SyncCounts};
use crate::api::punch::{SelfPunch, SelfPunchResponse};
use crate::api::records::RecordList;
use crate::api::requests::{
    DecidePayload, RequestDetail, RequestPage, RequestView, SubmitRequest,
};
use crate::engine::approval::ApprovalAction;
use crate::model::daily::{AttendanceStatus, DailyAttendanceRecord};
use crate::model::punch::{
    ProcessingState, PunchEvent, PunchSource, PunchType, VerificationState,
};
use crate::model::request::{
    ApproverStatus, AttendanceRequest, RequestApprover, RequestAudit, RequestKind, RequestStatus,
    RequestType,
};
use utoipa::Modify;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Workforce Attendance Engine API",
        version = "1.0.0",
        description = r#"
## Multi-tenant Workforce Attendance Engine

This API powers a **workforce attendance** backend: punch ingestion from
biometric terminals and self-service clients, shift-aware daily derivation,
and a multi-level approval workflow for corrections and leave.

### 🔹 Key Features
- **Punch Ingestion**
  - Terminal batch sync with per-provider code normalization, dedup and
    sequence flagging; unknown subjects are retained as orphans
- **Self-service Punch**
  - Web/mobile punch with geofence validation and per-subject rate windows
- **Daily Records**
  - Per-(user, date) derivation: work hours, breaks, late/half-day/overtime,
    holiday and weekly-off precedence, night-shift rollover
- **Requests & Approvals**
  - Missed punch, correction, WFH, on-duty, leave and leave reversal with an
    ordered approver chain, forwarding, SLA deadlines and a full audit trail

### 🔐 Security
Ingestion endpoints authenticate the **device** (`X-Device-Id` plus an API
key or HMAC signature). Everything else is **JWT Bearer** with role checks.

### 📦 Response Format
- JSON-based RESTful responses
- Pagination supported for list endpoints

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::ingest::sync_single,
        crate::api::ingest::sync_batch,

        crate::api::punch::self_punch,

        crate::api::requests::submit_request,
        crate::api::requests::list_requests,
        crate::api::requests::get_request,
        crate::api::requests::decide_request,
        crate::api::requests::cancel_request,

        crate::api::records::my_records,
        crate::api::records::user_records,
        crate::api::records::day_punches
    ),
    components(
        schemas(
            DeviceEvent,
            BatchSync,
            SyncCounts,
            SelfPunch,
            SelfPunchResponse,
            SubmitRequest,
            DecidePayload,
            ApprovalAction,
            RequestView,
            RequestPage,
            RequestDetail,
            RecordList,
            PunchEvent,
            PunchSource,
            PunchType,
            ProcessingState,
            VerificationState,
            DailyAttendanceRecord,
            AttendanceStatus,
            AttendanceRequest,
            RequestApprover,
            RequestAudit,
            RequestKind,
            RequestType,
            RequestStatus,
            ApproverStatus
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Ingestion", description = "Terminal sync APIs (device auth)"),
        (name = "Attendance", description = "Punch and daily record APIs"),
        (name = "Requests", description = "Regularization and leave workflow APIs"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "device_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Api-Key"))),
        );
    }
}
