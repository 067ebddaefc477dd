//! Typed request errors, mapped to RFC 9457 Problem Details at the edge.
//! Handlers never build a JSON error body by hand; they return `ApiError`
//! and this module owns the wire shape.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use dpp_planguard::PlanViolation;
use serde::Serialize;

pub enum ApiError {
    Validation(String),
    /// Bad/missing/revoked credentials. Always the same generic body —
    /// never distinguishes "wrong key" from "unknown key".
    Unauthorized,
    /// Cross-tenant access or truly-missing run. Same body as a real 404
    /// so existence can't be probed.
    NotFound,
    /// Run exists, owned by caller, but retention has lapsed.
    Gone,
    IdempotencyConflict,
    Plan(PlanViolation),
    InsufficientBudget,
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct Problem {
    #[serde(rename = "type")]
    type_: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
    instance: String,
}

type PartsHeaders = Vec<(&'static str, String)>;

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String, PartsHeaders) {
        match self {
            ApiError::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                "urn:dpp:problem:validation",
                "invalid request",
                detail.clone(),
                vec![],
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "urn:dpp:problem:unauthorized",
                "unauthorized",
                "invalid credentials".to_string(),
                vec![],
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "urn:dpp:problem:not-found",
                "not found",
                "no such run".to_string(),
                vec![],
            ),
            ApiError::Gone => (
                StatusCode::GONE,
                "urn:dpp:problem:gone",
                "gone",
                "run artifact retention has expired".to_string(),
                vec![],
            ),
            ApiError::IdempotencyConflict => (
                StatusCode::CONFLICT,
                "urn:dpp:problem:idempotency-conflict",
                "idempotency key reused with a different payload",
                "the Idempotency-Key header was already used with a different request body".to_string(),
                vec![],
            ),
            ApiError::InsufficientBudget => (
                StatusCode::PAYMENT_REQUIRED,
                "urn:dpp:problem:insufficient-budget",
                "insufficient budget",
                "tenant balance is insufficient for the requested reservation".to_string(),
                vec![],
            ),
            ApiError::Plan(violation) => plan_violation_parts(violation),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "urn:dpp:problem:internal",
                    "internal error",
                    "an internal error occurred".to_string(),
                    vec![],
                )
            }
        }
    }
}

fn plan_violation_parts(
    violation: &PlanViolation,
) -> (StatusCode, &'static str, &'static str, String, PartsHeaders) {
    match violation {
        PlanViolation::NoActivePlan => (
            StatusCode::BAD_REQUEST,
            "urn:dpp:problem:no-active-plan",
            "no active plan",
            violation.to_string(),
            vec![],
        ),
        PlanViolation::PackNotAllowed(_) => (
            StatusCode::BAD_REQUEST,
            "urn:dpp:problem:pack-not-allowed",
            "pack type not allowed",
            violation.to_string(),
            vec![],
        ),
        PlanViolation::ReservationExceedsCeiling { .. } => (
            StatusCode::PAYMENT_REQUIRED,
            "urn:dpp:problem:reservation-exceeds-ceiling",
            "reservation exceeds plan ceiling",
            violation.to_string(),
            vec![],
        ),
        PlanViolation::ReservationBelowFloor { .. } => (
            StatusCode::BAD_REQUEST,
            "urn:dpp:problem:reservation-below-floor",
            "reservation below platform floor",
            violation.to_string(),
            vec![],
        ),
        PlanViolation::RateLimitExceeded { limit, retry_after } => (
            StatusCode::TOO_MANY_REQUESTS,
            "urn:dpp:problem:rate-limit-exceeded",
            "rate limit exceeded",
            violation.to_string(),
            vec![
                ("Retry-After", retry_after.as_secs().to_string()),
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
            ],
        ),
        PlanViolation::GlobalPause { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "urn:dpp:problem:platform-paused",
            "platform paused",
            violation.to_string(),
            vec![],
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, type_, title, detail, extra_headers) = self.parts();
        let problem = Problem {
            type_,
            title,
            status: status.as_u16(),
            detail,
            instance: "/v1/runs".to_string(),
        };

        let mut response = (status, axum::Json(problem)).into_response();
        response
            .headers_mut()
            .insert("content-type", HeaderValue::from_static("application/problem+json"));
        for (name, value) in extra_headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<dpp_store::StoreError> for ApiError {
    fn from(e: dpp_store::StoreError) -> Self {
        match e {
            dpp_store::StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<dpp_ledger::LedgerError> for ApiError {
    fn from(e: dpp_ledger::LedgerError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<dpp_queue::QueueError> for ApiError {
    fn from(e: dpp_queue::QueueError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<dpp_objectstore::ObjectStoreError> for ApiError {
    fn from(e: dpp_objectstore::ObjectStoreError) -> Self {
        ApiError::Internal(anyhow::anyhow!(e))
    }
}
