//! `POST /v1/runs` — the only place money ever moves from "nothing" to
//! "reserved". Every step that can fail after the reservation is taken must
//! compensate with a full refund before returning an error; a caller must
//! never be left holding a reservation for a run that didn't make it onto
//! the queue.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use dpp_ledger::RefundOutcome;
use dpp_planguard::RateLimitScope;
use dpp_store::{NewRun, RunPatch, RunRequire};
use dpp_types::{compute_minimum_fee, payload_hash, JobMessage, Money, ReasonCode, Run, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::TenantId;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pack_type: String,
    #[serde(default)]
    inputs: serde_json::Value,
    reservation: ReservationReq,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct ReservationReq {
    max_cost_usd: String,
    timebox_sec: i32,
    min_reliability_score: f64,
}

#[derive(Debug, Deserialize)]
struct Meta {
    trace_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    profile_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunReceipt {
    run_id: Uuid,
    status: &'static str,
    money_state: &'static str,
    reserved_usd: String,
    minimum_fee_usd: String,
}

pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    tenant_id: TenantId,
    headers: HeaderMap,
    body: Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let telemetry = state.telemetry.clone();
    let result = submit_run_inner(State(state), tenant_id, headers, body).await;
    telemetry.admission(if result.is_ok() { "accepted" } else { "rejected" });
    result
}

async fn submit_run_inner(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let idempotency_key = extract_idempotency_key(&headers)?;
    validate(&body)?;

    let requested_max_cost = Money::parse_decimal(&body.reservation.max_cost_usd)
        .map_err(|e| ApiError::Validation(format!("reservation.max_cost_usd: {e}")))?;

    let canonical = json!({
        "pack_type": body.pack_type,
        "inputs": body.inputs,
        "reservation": {
            "max_cost_usd": body.reservation.max_cost_usd,
            "timebox_sec": body.reservation.timebox_sec,
            "min_reliability_score": body.reservation.min_reliability_score,
        },
    });
    let hash = payload_hash(&canonical);

    if let Some(existing) = state
        .store
        .get_by_idempotency(&tenant_id, &idempotency_key)
        .await?
    {
        return replay_or_conflict(existing, &hash);
    }

    state.plan_guard.check_not_paused().await.map_err(ApiError::Plan)?;
    state
        .plan_guard
        .check_admission(&tenant_id, &body.pack_type, requested_max_cost)
        .await
        .map_err(ApiError::Plan)?;
    let rate_status = state
        .plan_guard
        .check_rate_limit(RateLimitScope::Submit, &tenant_id)
        .await
        .map_err(ApiError::Plan)?;

    let minimum_fee = compute_minimum_fee(requested_max_cost, state.fee_floor, state.fee_ceiling);

    let trace_id = body.meta.as_ref().and_then(|m| m.trace_id.clone());

    let new_run = NewRun {
        tenant_id: tenant_id.clone(),
        pack_type: body.pack_type.clone(),
        idempotency_key: Some(idempotency_key.clone()),
        payload_hash: hash.clone(),
        reservation_max_cost_micros: requested_max_cost.micros(),
        minimum_fee_micros: minimum_fee.micros(),
        timebox_sec: body.reservation.timebox_sec,
        min_reliability_score: body.reservation.min_reliability_score,
        inputs: body.inputs.clone(),
        trace_id: trace_id.clone(),
    };

    let run = match state.store.create(new_run).await {
        Ok(run) => run,
        Err(dpp_store::StoreError::DuplicateIdempotencyKey) => {
            // Lost a race against a concurrent identical submission; the row
            // now exists, so fall back to the same replay/conflict check.
            let existing = state
                .store
                .get_by_idempotency(&tenant_id, &idempotency_key)
                .await?
                .ok_or(ApiError::Internal(anyhow::anyhow!(
                    "duplicate idempotency key reported but row vanished"
                )))?;
            return replay_or_conflict(existing, &hash);
        }
        Err(e) => return Err(e.into()),
    };

    let reserve = state
        .ledger
        .reserve(&tenant_id, &run.run_id.to_string(), requested_max_cost, state.reservation_ttl)
        .await?;

    let new_balance = match reserve {
        dpp_types::ReserveOutcome::Ok { new_balance } => new_balance,
        dpp_types::ReserveOutcome::Insufficient { .. } => {
            mark_failed_no_money(&state, &run, ReasonCode::InsufficientBudget, "insufficient tenant balance").await;
            return Err(ApiError::InsufficientBudget);
        }
        dpp_types::ReserveOutcome::AlreadyReserved => {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "reserve reported AlreadyReserved for a freshly created run {}",
                run.run_id
            )));
        }
    };
    let _ = new_balance;

    let reserved_patch = RunPatch::new().money_state(dpp_types::MoneyState::Reserved);
    let reserved_require = RunRequire::new().status(RunStatus::Queued).money_state(dpp_types::MoneyState::None);
    let cas_ok = state
        .store
        .update_if(run.run_id, &tenant_id, run.version, reserved_patch, reserved_require)
        .await?;

    if !cas_ok {
        // Someone else mutated this brand-new row before we could mark it
        // RESERVED; undo the reservation rather than leave it dangling.
        let _ = state.ledger.refund_full(&tenant_id, &run.run_id.to_string()).await;
        return Err(ApiError::Internal(anyhow::anyhow!(
            "reserved-state CAS lost on a freshly created run {}",
            run.run_id
        )));
    }

    let job = JobMessage::new(run.run_id, tenant_id.clone(), run.pack_type.clone(), trace_id);
    if let Err(e) = state.queue.enqueue(&job).await {
        compensate_enqueue_failure(&state, &run, &tenant_id).await;
        return Err(e.into());
    }

    let receipt = RunReceipt {
        run_id: run.run_id,
        status: RunStatus::Queued.as_db_str(),
        money_state: dpp_types::MoneyState::Reserved.as_db_str(),
        reserved_usd: requested_max_cost.format_4dp(),
        minimum_fee_usd: minimum_fee.format_4dp(),
    };

    let mut response = (StatusCode::ACCEPTED, Json(receipt)).into_response();
    let headers = response.headers_mut();
    insert_header(headers, "X-DPP-Cost-Reserved", requested_max_cost.format_4dp());
    insert_header(headers, "X-DPP-Cost-Minimum-Fee", minimum_fee.format_4dp());
    insert_header(headers, "X-RateLimit-Limit", rate_status.limit.to_string());
    insert_header(headers, "X-RateLimit-Remaining", rate_status.remaining().to_string());
    insert_header(headers, "X-RateLimit-Reset", "60".to_string());
    Ok(response)
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

/// An admission-time reserve failure never leaves money "in flight": the run
/// goes straight to FAILED/NONE since no reservation was ever taken.
async fn mark_failed_no_money(state: &AppState, run: &Run, reason: ReasonCode, detail: &str) {
    let patch = RunPatch::new()
        .status(RunStatus::Failed)
        .money_state(dpp_types::MoneyState::None)
        .error(reason.as_str(), detail)
        .completed_now();
    let require = RunRequire::new().status(RunStatus::Queued);
    if let Err(e) = state.store.update_if(run.run_id, &run.tenant_id, run.version, patch, require).await {
        tracing::error!(run_id = %run.run_id, error = %e, "failed to mark run FAILED after insufficient budget");
    }
}

async fn compensate_enqueue_failure(state: &AppState, run: &Run, tenant_id: &str) {
    let refund = state.ledger.refund_full(tenant_id, &run.run_id.to_string()).await;
    match refund {
        Ok(RefundOutcome::Ok { .. }) | Ok(RefundOutcome::NoReserve) => {}
        Err(e) => tracing::error!(run_id = %run.run_id, error = %e, "refund_full failed after enqueue failure"),
    }

    let patch = RunPatch::new()
        .status(RunStatus::Failed)
        .money_state(dpp_types::MoneyState::Refunded)
        .error(ReasonCode::QueueEnqueueFailed.as_str(), "enqueue failed after reservation")
        .completed_now();
    let require = RunRequire::new().status(RunStatus::Queued);
    if let Err(e) = state.store.update_if(run.run_id, tenant_id, run.version + 1, patch, require).await {
        tracing::error!(run_id = %run.run_id, error = %e, "failed to mark run FAILED after enqueue failure");
    }
}

fn replay_or_conflict(existing: Run, hash: &str) -> Result<Response, ApiError> {
    if existing.payload_hash != hash {
        return Err(ApiError::IdempotencyConflict);
    }

    let receipt = RunReceipt {
        run_id: existing.run_id,
        status: existing.status.as_db_str(),
        money_state: existing.money_state.as_db_str(),
        reserved_usd: existing.reservation().format_4dp(),
        minimum_fee_usd: existing.minimum_fee().format_4dp(),
    };
    Ok((StatusCode::ACCEPTED, Json(receipt)).into_response())
}

fn extract_idempotency_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get("Idempotency-Key")
        .ok_or_else(|| ApiError::Validation("Idempotency-Key header is required".to_string()))?
        .to_str()
        .map_err(|_| ApiError::Validation("Idempotency-Key header is not valid UTF-8".to_string()))?;

    if value.len() < 8 || value.len() > 64 || !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ApiError::Validation(
            "Idempotency-Key must be 8-64 printable ASCII characters".to_string(),
        ));
    }
    Ok(value.to_string())
}

fn validate(body: &SubmitRequest) -> Result<(), ApiError> {
    if body.pack_type.trim().is_empty() {
        return Err(ApiError::Validation("pack_type must not be empty".to_string()));
    }
    if !(1..=90).contains(&body.reservation.timebox_sec) {
        return Err(ApiError::Validation(
            "reservation.timebox_sec must be in [1, 90]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&body.reservation.min_reliability_score) {
        return Err(ApiError::Validation(
            "reservation.min_reliability_score must be in [0, 1]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_length_bounds() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("short"));
        assert!(extract_idempotency_key(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("12345678"));
        assert!(extract_idempotency_key(&headers).is_ok());
    }

    #[test]
    fn timebox_out_of_range_is_rejected() {
        let body = SubmitRequest {
            pack_type: "demo".to_string(),
            inputs: serde_json::json!({}),
            reservation: ReservationReq {
                max_cost_usd: "1.0000".to_string(),
                timebox_sec: 0,
                min_reliability_score: 0.5,
            },
            meta: None,
        };
        assert!(validate(&body).is_err());
    }
}
