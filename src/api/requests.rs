use actix_web::{HttpResponse, Responder, web};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::engine::approval::{self, ApprovalAction, Disposition};
use crate::engine::correction;
use crate::error::ApiError;
use crate::external::{directory, leave_balance, notify};
use crate::model::request::{
    ApproverStatus, AttendanceRequest, RequestApprover, RequestAudit, RequestStatus, RequestType,
};
use crate::model::role::Role;

const REQUEST_COLS: &str = "id, org_id, user_id, kind, request_type, target_date, end_date, \
     leave_type, proposed_first_in, proposed_last_out, reason, status, approval_required, \
     sla_due_at, applied_record_id, applied_punch_ids, created_at, updated_at";

#[derive(Deserialize, ToSchema)]
pub struct SubmitRequest {
    #[schema(example = "correction")]
    pub request_type: RequestType,
    #[schema(value_type = String, format = "date", example = "2026-08-01")]
    pub target_date: NaiveDate,
    /// Inclusive range end; leave only.
    #[schema(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
    #[schema(example = "sick")]
    pub leave_type: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub proposed_first_in: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub proposed_last_out: Option<NaiveDateTime>,
    #[schema(example = "forgot to punch out after the evening deploy")]
    pub reason: String,
}

#[derive(Deserialize, IntoParams)]
pub struct RequestFilter {
    /// `mine` (default) lists own requests; `inbox` lists requests
    /// pending on the caller as an approver.
    pub scope: Option<String>,
    pub status: Option<RequestStatus>,
    pub request_type: Option<RequestType>,
    /// 1-based.
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

// Helper enum for typed SQLx binding
enum FilterValue<'a> {
    U64(u64),
    Str(&'a str),
}

#[derive(Serialize, ToSchema)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: AttendanceRequest,
    /// True when the request is still open past its SLA deadline.
    pub is_overdue: bool,
}

#[derive(Serialize, ToSchema)]
pub struct RequestPage {
    pub data: Vec<RequestView>,
    pub page: u64,
    pub per_page: u64,
    pub total: i64,
}

#[derive(Serialize, ToSchema)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: AttendanceRequest,
    pub is_overdue: bool,
    pub approvers: Vec<RequestApprover>,
    pub audit: Vec<RequestAudit>,
}

#[derive(Deserialize, ToSchema)]
pub struct DecidePayload {
    #[serde(flatten)]
    pub action: ApprovalAction,
    pub comments: Option<String>,
}

/* =========================
Submit request
========================= */
#[utoipa::path(
    post,
    path = "/api/v1/requests",
    request_body(content = SubmitRequest, content_type = "application/json"),
    responses(
        (status = 200, description = "Request submitted", body = Object,
         example = json!({
            "id": "5f3a0d3e-1b7a-4c52-9a91-1f6a2f0a9c11",
            "status": "pending",
            "sla_due_at": "2026-08-03T09:00:00Z"
         })),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "An open request already covers this date")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn submit_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<SubmitRequest>,
) -> actix_web::Result<impl Responder> {
    let now = Utc::now();
    let request_type = payload.request_type;
    let kind = request_type.kind();
    let range_end = payload.end_date.unwrap_or(payload.target_date);

    approval::validate_submission(
        request_type,
        &payload.reason,
        payload.proposed_first_in,
        payload.proposed_last_out,
        payload.end_date,
        payload.target_date,
    )
    .map_err(ApiError::from)?;

    if request_type == RequestType::Leave {
        let leave_type = payload
            .leave_type
            .as_deref()
            .ok_or_else(|| ApiError::Validation("leave request needs a leave_type".into()))?;
        let days = (range_end - payload.target_date).num_days() as f64 + 1.0;
        let decision =
            leave_balance::check(&pool, auth.org_id, auth.user_id, leave_type, days)
                .await
                .map_err(ApiError::from)?;
        if !decision.allowed {
            return Err(ApiError::Conflict("insufficient leave balance".into()).into());
        }
    }

    let chain = directory::reporting_chain(&pool, auth.org_id, auth.user_id)
        .await
        .map_err(ApiError::from)?;
    if chain.is_empty() {
        return Err(ApiError::Conflict("no approver configured for user".into()).into());
    }

    let mut tx = pool.begin().await.map_err(ApiError::from)?;

    // One open request per (user, date): the overlap check and the insert
    // must be one atomic unit, so the check locks any conflicting rows.
    let open_sql = format!(
        "SELECT id FROM attendance_requests
         WHERE org_id = ? AND user_id = ?
           AND status IN ('{}')
           AND target_date <= ? AND COALESCE(end_date, target_date) >= ?
         LIMIT 1 FOR UPDATE",
        RequestStatus::OPEN.map(|s| s.to_string()).join("', '")
    );
    let conflicting: Option<(String,)> = sqlx::query_as(&open_sql)
        .bind(auth.org_id)
        .bind(auth.user_id)
        .bind(range_end)
        .bind(payload.target_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::from)?;
    if let Some((existing,)) = conflicting {
        return Err(ApiError::Duplicate(format!(
            "open request {existing} already covers this date"
        ))
        .into());
    }

    let id = Uuid::new_v4().to_string();
    let sla_due_at = now + Duration::hours(config.sla_hours);

    sqlx::query(
        r#"
        INSERT INTO attendance_requests
            (id, org_id, user_id, kind, request_type, target_date, end_date,
             leave_type, proposed_first_in, proposed_last_out, reason,
             status, approval_required, sla_due_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(auth.org_id)
    .bind(auth.user_id)
    .bind(kind)
    .bind(request_type)
    .bind(payload.target_date)
    .bind(payload.end_date)
    .bind(&payload.leave_type)
    .bind(payload.proposed_first_in)
    .bind(payload.proposed_last_out)
    .bind(&payload.reason)
    .bind(chain.len() as u32)
    .bind(sla_due_at)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::from)?;

    for (seq, (approver_id, role)) in chain.iter().enumerate() {
        sqlx::query(
            "INSERT INTO request_approvers
                (request_id, seq, approver_id, role, status, mandatory)
             VALUES (?, ?, ?, ?, 'pending', 1)",
        )
        .bind(&id)
        .bind(seq as u32 + 1)
        .bind(approver_id)
        .bind(role)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::from)?;
    }

    audit(&mut tx, &id, auth.user_id, "submitted", Some(&payload.reason)).await?;

    tx.commit().await.map_err(ApiError::from)?;

    // First approver gets pinged; delivery is the outbox worker's problem.
    if let Some((first, _)) = chain.first() {
        notify::dispatch_detached(
            pool.get_ref().clone(),
            auth.org_id,
            *first,
            "request_submitted",
            serde_json::json!({ "request_id": id, "request_type": request_type }),
        );
    }

    tracing::info!(org_id = auth.org_id, user_id = auth.user_id, request_id = %id,
        %request_type, "request submitted");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": id,
        "status": "pending",
        "sla_due_at": sla_due_at,
    })))
}

/* =========================
List requests
========================= */
#[utoipa::path(
    get,
    path = "/api/v1/requests",
    params(RequestFilter),
    responses(
        (status = 200, description = "Paged request list", body = RequestPage),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn list_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<RequestFilter>,
) -> actix_web::Result<impl Responder> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let mut where_sql = String::from("WHERE org_id = ?");
    let mut args: Vec<FilterValue> = vec![FilterValue::U64(auth.org_id)];

    match query.scope.as_deref() {
        Some("inbox") => {
            where_sql.push_str(
                " AND EXISTS (SELECT 1 FROM request_approvers a
                    WHERE a.request_id = attendance_requests.id
                      AND a.approver_id = ? AND a.status = 'pending')",
            );
            args.push(FilterValue::U64(auth.user_id));
        }
        _ => {
            where_sql.push_str(" AND user_id = ?");
            args.push(FilterValue::U64(auth.user_id));
        }
    }

    if let Some(status) = &query.status {
        where_sql.push_str(" AND status = ?");
        args.push(FilterValue::Str(status.as_ref()));
    }
    if let Some(rt) = &query.request_type {
        where_sql.push_str(" AND request_type = ?");
        args.push(FilterValue::Str(rt.as_ref()));
    }

    let count_sql = format!("SELECT COUNT(*) FROM attendance_requests {where_sql}");
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_q = match arg {
            FilterValue::U64(v) => count_q.bind(*v),
            FilterValue::Str(s) => count_q.bind(*s),
        };
    }
    let total = count_q
        .fetch_one(pool.get_ref())
        .await
        .map_err(ApiError::from)?;

    let data_sql = format!(
        "SELECT {REQUEST_COLS} FROM attendance_requests {where_sql}
         ORDER BY sla_due_at ASC, created_at DESC
         LIMIT ? OFFSET ?"
    );
    let mut data_q = sqlx::query_as::<_, AttendanceRequest>(&data_sql);
    for arg in args {
        data_q = match arg {
            FilterValue::U64(v) => data_q.bind(v),
            FilterValue::Str(s) => data_q.bind(s),
        };
    }
    let rows = data_q
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await
        .map_err(ApiError::from)?;

    let now = Utc::now();
    let data = rows
        .into_iter()
        .map(|request| RequestView {
            is_overdue: request.is_overdue(now),
            request,
        })
        .collect();

    Ok(HttpResponse::Ok().json(RequestPage {
        data,
        page,
        per_page,
        total,
    }))
}

/* =========================
Request detail
========================= */
#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}",
    params(("id" = String, Path, description = "Request UUID")),
    responses(
        (status = 200, description = "Request with chain and audit trail", body = RequestDetail),
        (status = 403, description = "Not involved in this request"),
        (status = 404, description = "Unknown request")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn get_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();

    let request = load_request(pool.get_ref(), &auth, &id).await?;

    let approvers = sqlx::query_as::<_, RequestApprover>(
        "SELECT id, request_id, seq, approver_id, role, status, comments, acted_at, mandatory
         FROM request_approvers WHERE request_id = ? ORDER BY seq",
    )
    .bind(&id)
    .fetch_all(pool.get_ref())
    .await
    .map_err(ApiError::from)?;

    let involved = request.user_id == auth.user_id
        || approvers.iter().any(|a| a.approver_id == auth.user_id)
        || matches!(auth.role, Role::Admin | Role::Hr);
    if !involved {
        return Err(ApiError::Forbidden("not involved in this request".into()).into());
    }

    let audit = sqlx::query_as::<_, RequestAudit>(
        "SELECT id, request_id, actor_id, action, detail, at
         FROM request_audit WHERE request_id = ? ORDER BY at, id LIMIT 200",
    )
    .bind(&id)
    .fetch_all(pool.get_ref())
    .await
    .map_err(ApiError::from)?;

    Ok(HttpResponse::Ok().json(RequestDetail {
        is_overdue: request.is_overdue(Utc::now()),
        request,
        approvers,
        audit,
    }))
}

/* =========================
Decide (approve / reject / forward)
========================= */
#[utoipa::path(
    put,
    path = "/api/v1/requests/{id}/decide",
    params(("id" = String, Path, description = "Request UUID")),
    request_body(content = DecidePayload, content_type = "application/json",
        example = json!({"action": "forward", "to": 300, "role": "hr", "comments": "needs HR sign-off"})),
    responses(
        (status = 200, description = "Action applied", body = Object,
         example = json!({"status": "under_review"})),
        (status = 403, description = "Caller is not a pending approver"),
        (status = 409, description = "Request already terminal")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn decide_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    payload: web::Json<DecidePayload>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    let now = Utc::now();
    let DecidePayload { action, comments } = payload.into_inner();

    let mut tx = pool.begin().await.map_err(ApiError::from)?;

    let sql = format!(
        "SELECT {REQUEST_COLS} FROM attendance_requests
         WHERE org_id = ? AND id = ? FOR UPDATE"
    );
    let mut request: AttendanceRequest = sqlx::query_as(&sql)
        .bind(auth.org_id)
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("unknown request".into()))?;

    let mut approvers = sqlx::query_as::<_, RequestApprover>(
        "SELECT id, request_id, seq, approver_id, role, status, comments, acted_at, mandatory
         FROM request_approvers WHERE request_id = ? ORDER BY seq FOR UPDATE",
    )
    .bind(&id)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::from)?;

    let disposition = approval::act(
        request.status,
        &mut approvers,
        auth.user_id,
        &action,
        comments.clone(),
        now,
    )
    .map_err(ApiError::from)?;

    let acted_status = match &action {
        ApprovalAction::Approve => ApproverStatus::Approved,
        ApprovalAction::Reject => ApproverStatus::Rejected,
        ApprovalAction::Forward { .. } => ApproverStatus::Forwarded,
    };
    sqlx::query(
        "UPDATE request_approvers
         SET status = ?, comments = ?, acted_at = ?
         WHERE request_id = ? AND approver_id = ? AND status = 'pending'",
    )
    .bind(acted_status)
    .bind(&comments)
    .bind(now)
    .bind(&id)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::from)?;

    if let ApprovalAction::Forward { .. } = &action {
        // act() appended the forwarded-to approver; persist it.
        let added = approvers.last().ok_or_else(|| {
            ApiError::Internal("forward produced no approver".into())
        })?;
        sqlx::query(
            "INSERT INTO request_approvers
                (request_id, seq, approver_id, role, status, mandatory)
             VALUES (?, ?, ?, ?, 'pending', 1)",
        )
        .bind(&id)
        .bind(added.seq)
        .bind(added.approver_id)
        .bind(&added.role)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::from)?;
    }

    let forwarded = matches!(action, ApprovalAction::Forward { .. });
    let new_status = disposition.request_status(forwarded);
    let required = approvers.iter().filter(|a| a.mandatory).count() as u32;
    sqlx::query(
        "UPDATE attendance_requests
         SET status = ?, approval_required = ?, updated_at = NOW()
         WHERE id = ?",
    )
    .bind(new_status)
    .bind(required)
    .bind(&id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::from)?;

    let audit_action = match &action {
        ApprovalAction::Approve => "approved",
        ApprovalAction::Reject => "rejected",
        ApprovalAction::Forward { .. } => "forwarded",
    };
    audit(&mut tx, &id, auth.user_id, audit_action, comments.as_deref()).await?;

    // The correction runs inside the decision transaction: a final
    // approval whose application fails (say, insufficient leave balance)
    // rolls the whole decision back instead of leaving an approved
    // request with no applied record.
    if disposition == Disposition::Approved {
        request.status = RequestStatus::Approved;
        correction::apply_in_tx(&pool, &mut tx, &config, &request).await?;
    }

    tx.commit().await.map_err(ApiError::from)?;

    if disposition != Disposition::InReview {
        notify::dispatch_detached(
            pool.get_ref().clone(),
            auth.org_id,
            request.user_id,
            "request_decided",
            serde_json::json!({ "request_id": id, "status": new_status }),
        );
    }

    tracing::info!(org_id = auth.org_id, actor_id = auth.user_id, request_id = %id,
        action = audit_action, status = %new_status, "approver acted");

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": new_status })))
}

/* =========================
Cancel
========================= */
#[utoipa::path(
    put,
    path = "/api/v1/requests/{id}/cancel",
    params(("id" = String, Path, description = "Request UUID")),
    responses(
        (status = 200, description = "Request cancelled", body = Object,
         example = json!({"status": "cancelled"})),
        (status = 409, description = "Cancellation rules violated")
    ),
    security(("bearer_auth" = [])),
    tag = "Requests"
)]
pub async fn cancel_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();

    let mut tx = pool.begin().await.map_err(ApiError::from)?;

    let sql = format!(
        "SELECT {REQUEST_COLS} FROM attendance_requests
         WHERE org_id = ? AND id = ? FOR UPDATE"
    );
    let request: AttendanceRequest = sqlx::query_as(&sql)
        .bind(auth.org_id)
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("unknown request".into()))?;

    approval::can_cancel(&request, auth.user_id, Utc::now().date_naive())
        .map_err(ApiError::from)?;

    sqlx::query(
        "UPDATE attendance_requests SET status = 'cancelled', updated_at = NOW() WHERE id = ?",
    )
    .bind(&id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::from)?;

    audit(&mut tx, &id, auth.user_id, "cancelled", None).await?;

    tx.commit().await.map_err(ApiError::from)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "cancelled" })))
}

async fn load_request(
    pool: &MySqlPool,
    auth: &AuthUser,
    id: &str,
) -> Result<AttendanceRequest, ApiError> {
    let sql = format!("SELECT {REQUEST_COLS} FROM attendance_requests WHERE org_id = ? AND id = ?");
    sqlx::query_as(&sql)
        .bind(auth.org_id)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("unknown request".into()))
}

async fn audit(
    tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
    request_id: &str,
    actor_id: u64,
    action: &str,
    detail: Option<&str>,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO request_audit (request_id, actor_id, action, detail, at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(request_id)
    .bind(actor_id)
    .bind(action)
    .bind(detail)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
