//! `GET /v1/runs/{run_id}` — tenant-scoped read. A run that belongs to
//! another tenant and a run that never existed return the identical 404;
//! only a genuinely expired retention window on an owned run returns 410.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::TenantId;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunView {
    run_id: Uuid,
    pack_type: String,
    status: &'static str,
    money_state: &'static str,
    reserved_usd: String,
    minimum_fee_usd: String,
    actual_cost_usd: Option<String>,
    last_error_reason_code: Option<String>,
    last_error_detail: Option<String>,
    artifact_url: Option<String>,
    created_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(run_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let run = state.store.get(run_id, &tenant_id).await?;

    if let Some(retention_until) = run.retention_until {
        if retention_until < Utc::now() {
            return Err(ApiError::Gone);
        }
    }

    let artifact_url = match (run.status, &run.result_bucket, &run.result_key) {
        (dpp_types::RunStatus::Completed, Some(bucket), Some(key)) => {
            Some(state.objects.presign_get(bucket, key, state.artifact_presign_ttl).await?)
        }
        _ => None,
    };

    let view = RunView {
        run_id: run.run_id,
        pack_type: run.pack_type,
        status: run.status.as_db_str(),
        money_state: run.money_state.as_db_str(),
        reserved_usd: run.reservation().format_4dp(),
        minimum_fee_usd: run.minimum_fee().format_4dp(),
        actual_cost_usd: run.actual_cost_micros.map(|m| dpp_types::Money::from_micros(m).format_4dp()),
        last_error_reason_code: run.last_error_reason_code,
        last_error_detail: run.last_error_detail,
        artifact_url,
        created_at: run.created_at,
        completed_at: run.completed_at,
    };

    Ok(Json(view).into_response())
}
