use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use derive_more::Display;
use serde_json::json;

use crate::engine::approval::ApprovalError;
use crate::engine::geofence::GeofenceViolation;

/// Every rejection this core emits carries a machine-distinguishable
/// kind plus a human message; nothing surfaces as an opaque 500 string.
#[derive(Debug, Display)]
pub enum ApiError {
    #[display(fmt = "{}", _0)]
    Validation(String),
    /// Repeat punch inside the dedup window.
    #[display(fmt = "{}", _0)]
    Duplicate(String),
    /// e.g. an open request already exists for the target date.
    #[display(fmt = "{}", _0)]
    Conflict(String),
    #[display(fmt = "{}", _0)]
    Unauthorized(String),
    #[display(fmt = "{}", _0)]
    Forbidden(String),
    #[display(fmt = "{}", _0)]
    NotFound(String),
    #[display(fmt = "{}", _0)]
    Geofence(GeofenceViolation),
    #[display(fmt = "punch limit reached, retry after the window resets")]
    RateLimited,
    /// Transient failure (pool timeout etc); the caller should retry.
    #[display(fmt = "{}", _0)]
    Retryable(String),
    #[display(fmt = "internal error")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Duplicate(_) => "duplicate",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Geofence(v) => v.kind(),
            ApiError::RateLimited => "rate_limited",
            ApiError::Retryable(_) => "retryable",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn internal<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> ApiError + '_ {
        move |e| {
            tracing::error!(error = %e, "{context}");
            ApiError::Internal(context.to_string())
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Duplicate(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::Geofence(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("record not found".into()),
            sqlx::Error::PoolTimedOut => {
                ApiError::Retryable("database busy, retry shortly".into())
            }
            other => {
                tracing::error!(error = %other, "database failure");
                ApiError::Internal("database failure".into())
            }
        }
    }
}

impl From<GeofenceViolation> for ApiError {
    fn from(v: GeofenceViolation) -> Self {
        ApiError::Geofence(v)
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotAnApprover => {
                ApiError::Forbidden("actor is not a pending approver".into())
            }
            ApprovalError::Terminal(s) => ApiError::Conflict(format!("request already {s}")),
            ApprovalError::CannotCancel(why) => ApiError::Conflict(format!("cannot cancel: {why}")),
            ApprovalError::Invalid(why) => ApiError::Validation(why.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_for_duplicate_and_validation() {
        assert_eq!(ApiError::Duplicate("x".into()).kind(), "duplicate");
        assert_eq!(ApiError::Validation("x".into()).kind(), "validation");
        assert_ne!(
            ApiError::Duplicate("x".into()).status_code(),
            ApiError::Validation("x".into()).status_code()
        );
    }

    #[test]
    fn geofence_kinds_pass_through() {
        let v = GeofenceViolation::LowAccuracy {
            accuracy_m: 500.0,
            ceiling_m: 100.0,
        };
        assert_eq!(ApiError::Geofence(v).kind(), "low_accuracy");
    }
}
