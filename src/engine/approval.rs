use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::model::request::{
    ApproverStatus, AttendanceRequest, RequestApprover, RequestKind, RequestStatus, RequestType,
};

/// What an approver may do with a request routed to them.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    /// Appends a new pending approver to the chain. Forwarded-to
    /// approvers are always mandatory.
    Forward { to: u64, role: String },
}

/// Request-level result of a single approver action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Approved,
    Rejected,
    InReview,
}

impl Disposition {
    pub fn request_status(self, forwarded: bool) -> RequestStatus {
        match self {
            Disposition::Approved => RequestStatus::Approved,
            Disposition::Rejected => RequestStatus::Rejected,
            Disposition::InReview if forwarded => RequestStatus::Forwarded,
            Disposition::InReview => RequestStatus::UnderReview,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// Actor is not in the approver chain, or already acted.
    NotAnApprover,
    /// Request is already in a terminal state.
    Terminal(RequestStatus),
    /// Cancellation rules violated.
    CannotCancel(&'static str),
    /// Submission payload rejected.
    Invalid(&'static str),
}

impl std::fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalError::NotAnApprover => write!(f, "actor is not a pending approver"),
            ApprovalError::Terminal(s) => write!(f, "request already {s}"),
            ApprovalError::CannotCancel(why) => write!(f, "cannot cancel: {why}"),
            ApprovalError::Invalid(why) => write!(f, "{why}"),
        }
    }
}

pub const MIN_REASON_LEN: usize = 10;

/// Submission-time validation shared by the regularization and leave
/// create paths.
pub fn validate_submission(
    request_type: RequestType,
    reason: &str,
    proposed_first_in: Option<chrono::NaiveDateTime>,
    proposed_last_out: Option<chrono::NaiveDateTime>,
    end_date: Option<NaiveDate>,
    target_date: NaiveDate,
) -> Result<(), ApprovalError> {
    if reason.trim().chars().count() < MIN_REASON_LEN {
        return Err(ApprovalError::Invalid("reason must be at least 10 characters"));
    }
    if let (Some(i), Some(o)) = (proposed_first_in, proposed_last_out) {
        if o < i {
            return Err(ApprovalError::Invalid(
                "proposed last-out is before proposed first-in",
            ));
        }
    }
    match request_type {
        RequestType::Correction | RequestType::MissedPunch => {
            if proposed_first_in.is_none() && proposed_last_out.is_none() {
                return Err(ApprovalError::Invalid(
                    "correction needs a proposed first-in or last-out",
                ));
            }
        }
        RequestType::Leave => {
            if let Some(end) = end_date {
                if end < target_date {
                    return Err(ApprovalError::Invalid("leave end date before start date"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Apply one approver's action to the chain, in place, and report the
/// resulting request-level disposition.
///
/// A reject by a mandatory approver short-circuits the whole request;
/// remaining approvers are not consulted. Approval is reached only when
/// nobody is pending and every mandatory approver has approved.
pub fn act(
    status: RequestStatus,
    approvers: &mut Vec<RequestApprover>,
    actor_id: u64,
    action: &ApprovalAction,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> Result<Disposition, ApprovalError> {
    if status.is_terminal() {
        return Err(ApprovalError::Terminal(status));
    }

    let idx = approvers
        .iter()
        .position(|a| a.approver_id == actor_id && a.status == ApproverStatus::Pending)
        .ok_or(ApprovalError::NotAnApprover)?;

    match action {
        ApprovalAction::Approve => {
            approvers[idx].status = ApproverStatus::Approved;
            approvers[idx].comments = comments;
            approvers[idx].acted_at = Some(now);
        }
        ApprovalAction::Reject => {
            approvers[idx].status = ApproverStatus::Rejected;
            approvers[idx].comments = comments;
            approvers[idx].acted_at = Some(now);
            if approvers[idx].mandatory {
                return Ok(Disposition::Rejected);
            }
        }
        ApprovalAction::Forward { to, role } => {
            approvers[idx].status = ApproverStatus::Forwarded;
            approvers[idx].comments = comments;
            approvers[idx].acted_at = Some(now);
            let request_id = approvers[idx].request_id.clone();
            let seq = approvers.iter().map(|a| a.seq).max().unwrap_or(0) + 1;
            approvers.push(RequestApprover {
                id: 0,
                request_id,
                seq,
                approver_id: *to,
                role: role.clone(),
                status: ApproverStatus::Pending,
                comments: None,
                acted_at: None,
                mandatory: true,
            });
        }
    }

    Ok(resolve(approvers))
}

/// Chain-level disposition from the approver rows alone.
pub fn resolve(approvers: &[RequestApprover]) -> Disposition {
    if approvers
        .iter()
        .any(|a| a.mandatory && a.status == ApproverStatus::Rejected)
    {
        return Disposition::Rejected;
    }
    let none_pending = approvers.iter().all(|a| a.status != ApproverStatus::Pending);
    // A forwarder's mandate transfers to the approver they appended, so
    // Forwarded counts as settled here; the appended row is itself
    // mandatory and still has to approve.
    let mandatory_approved = approvers.iter().filter(|a| a.mandatory).all(|a| {
        matches!(
            a.status,
            ApproverStatus::Approved | ApproverStatus::Forwarded
        )
    });
    if none_pending && mandatory_approved {
        Disposition::Approved
    } else {
        Disposition::InReview
    }
}

/// Cancellation rules: submitter only, only while draft/pending, and a
/// leave cannot be cancelled once its start date has passed. Approved
/// corrections need an explicit reversal request instead.
pub fn can_cancel(
    req: &AttendanceRequest,
    actor_id: u64,
    today: NaiveDate,
) -> Result<(), ApprovalError> {
    if req.user_id != actor_id {
        return Err(ApprovalError::CannotCancel("only the submitter may cancel"));
    }
    if !matches!(req.status, RequestStatus::Draft | RequestStatus::Pending) {
        if req.status.is_terminal() {
            return Err(ApprovalError::Terminal(req.status));
        }
        return Err(ApprovalError::CannotCancel(
            "request is already under review",
        ));
    }
    if req.kind == RequestKind::Leave && req.target_date < today {
        return Err(ApprovalError::CannotCancel("leave has already started"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn approver(id: u64, approver_id: u64, mandatory: bool) -> RequestApprover {
        RequestApprover {
            id,
            request_id: "req-1".into(),
            seq: id as u32,
            approver_id,
            role: "manager".into(),
            status: ApproverStatus::Pending,
            comments: None,
            acted_at: None,
            mandatory,
        }
    }

    fn chain() -> Vec<RequestApprover> {
        vec![approver(1, 100, true), approver(2, 200, true)]
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn approval_needs_every_mandatory_approver() {
        let mut c = chain();
        let d = act(
            RequestStatus::Pending,
            &mut c,
            100,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::InReview);

        let d = act(
            RequestStatus::UnderReview,
            &mut c,
            200,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::Approved);
    }

    #[test]
    fn mandatory_reject_short_circuits() {
        let mut c = chain();
        let d = act(
            RequestStatus::Pending,
            &mut c,
            100,
            &ApprovalAction::Reject,
            Some("no".into()),
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::Rejected);
        // Second approver never acted and the chain still resolves
        // rejected.
        assert_eq!(resolve(&c), Disposition::Rejected);
    }

    #[test]
    fn optional_reject_does_not_block_approval() {
        let mut c = vec![approver(1, 100, true), approver(2, 200, false)];
        act(
            RequestStatus::Pending,
            &mut c,
            200,
            &ApprovalAction::Reject,
            None,
            now(),
        )
        .unwrap();
        let d = act(
            RequestStatus::UnderReview,
            &mut c,
            100,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::Approved);
    }

    #[test]
    fn forward_appends_mandatory_approver() {
        let mut c = chain();
        let d = act(
            RequestStatus::Pending,
            &mut c,
            100,
            &ApprovalAction::Forward {
                to: 300,
                role: "hr".into(),
            },
            None,
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::InReview);
        assert_eq!(c.len(), 3);
        let added = c.last().unwrap();
        assert_eq!(added.approver_id, 300);
        assert!(added.mandatory);
        assert_eq!(added.seq, 3);

        // The original second approver approving is not enough: the
        // forwarded-to approver must agree too.
        act(
            RequestStatus::Forwarded,
            &mut c,
            200,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(resolve(&c), Disposition::InReview);
        let d = act(
            RequestStatus::UnderReview,
            &mut c,
            300,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        assert_eq!(d, Disposition::Approved);
    }

    #[test]
    fn cannot_act_twice_or_from_outside_the_chain() {
        let mut c = chain();
        act(
            RequestStatus::Pending,
            &mut c,
            100,
            &ApprovalAction::Approve,
            None,
            now(),
        )
        .unwrap();
        let again = act(
            RequestStatus::UnderReview,
            &mut c,
            100,
            &ApprovalAction::Approve,
            None,
            now(),
        );
        assert_eq!(again.unwrap_err(), ApprovalError::NotAnApprover);

        let outsider = act(
            RequestStatus::UnderReview,
            &mut c,
            999,
            &ApprovalAction::Approve,
            None,
            now(),
        );
        assert_eq!(outsider.unwrap_err(), ApprovalError::NotAnApprover);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut c = chain();
        let r = act(
            RequestStatus::Approved,
            &mut c,
            100,
            &ApprovalAction::Approve,
            None,
            now(),
        );
        assert_eq!(
            r.unwrap_err(),
            ApprovalError::Terminal(RequestStatus::Approved)
        );
    }

    fn request(status: RequestStatus, kind: RequestKind, target: NaiveDate) -> AttendanceRequest {
        AttendanceRequest {
            id: "req-1".into(),
            org_id: 1,
            user_id: 42,
            kind,
            request_type: if kind == RequestKind::Leave {
                RequestType::Leave
            } else {
                RequestType::Correction
            },
            target_date: target,
            end_date: None,
            leave_type: None,
            proposed_first_in: None,
            proposed_last_out: None,
            reason: "family emergency".into(),
            status,
            approval_required: 2,
            sla_due_at: Utc::now(),
            applied_record_id: None,
            applied_punch_ids: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cancel_rules() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        let future = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
        let past = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();

        let pending = request(RequestStatus::Pending, RequestKind::Leave, future);
        assert!(can_cancel(&pending, 42, today).is_ok());
        assert!(can_cancel(&pending, 7, today).is_err());

        let started = request(RequestStatus::Pending, RequestKind::Leave, past);
        assert!(can_cancel(&started, 42, today).is_err());

        let reviewing = request(RequestStatus::UnderReview, RequestKind::Regularization, future);
        assert!(can_cancel(&reviewing, 42, today).is_err());

        let done = request(RequestStatus::Approved, RequestKind::Leave, future);
        assert!(matches!(
            can_cancel(&done, 42, today),
            Err(ApprovalError::Terminal(RequestStatus::Approved))
        ));
    }

    #[test]
    fn submission_validation() {
        let d = NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        assert!(validate_submission(RequestType::Correction, "short", None, None, None, d).is_err());
        assert!(
            validate_submission(RequestType::Correction, "forgot to punch out", None, None, None, d)
                .is_err(),
            "correction without proposed times"
        );
        let fi = d.and_hms_opt(9, 0, 0);
        let lo = d.and_hms_opt(18, 0, 0);
        assert!(
            validate_submission(RequestType::Correction, "forgot to punch out", fi, lo, None, d)
                .is_ok()
        );
        assert!(
            validate_submission(RequestType::Correction, "forgot to punch out", lo, fi, None, d)
                .is_err(),
            "out before in"
        );
        let before = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        assert!(
            validate_submission(RequestType::Leave, "family function trip", None, None, Some(before), d)
                .is_err(),
            "end before start"
        );
    }
}
