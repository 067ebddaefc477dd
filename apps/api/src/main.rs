mod auth;
mod error;
mod request_id;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use dpp_ledger::LedgerOps;
use dpp_objectstore::ArtifactStore;
use dpp_planguard::PlanGuard;
use dpp_queue::JobQueue;
use dpp_store::{ApiKeyStore, PlanStore, RunStore, UsageStore};

use crate::request_id::stamp_request_id;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = dpp_config::load_config()?;
    dpp_observability::init_tracing("api");

    tracing::info!(instance_id = %cfg.instance_id, "api starting");

    let pool = dpp_store::connect(&cfg.db_url, 10).await?;
    dpp_store::migrate(&pool).await?;

    let store = RunStore::new(pool.clone());
    let usage = UsageStore::new(pool.clone());
    let api_keys = ApiKeyStore::new(pool.clone());
    let ledger = LedgerOps::new(&cfg.redis_url)?;
    let plans = PlanStore::new(pool.clone());
    let plan_guard = PlanGuard::new(plans, ledger.clone(), cfg.min_reservation);
    let queue = JobQueue::new(pool);
    let objects = ArtifactStore::new(cfg.s3_bucket.clone(), Some(cfg.s3_region.clone()), cfg.s3_endpoint_url.clone()).await;

    let telemetry = dpp_observability::DppTelemetry::new("api");

    let state = Arc::new(AppState {
        store,
        usage,
        api_keys,
        ledger,
        plan_guard,
        queue,
        objects,
        telemetry,
        fee_floor: cfg.fee_floor,
        fee_ceiling: cfg.fee_ceiling,
        reservation_ttl: cfg.reservation_ttl,
        artifact_presign_ttl: cfg.artifact_presign_ttl,
    });

    let app = routes::router()
        .layer(axum::middleware::from_fn(stamp_request_id))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.api_bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.api_bind_addr))?;

    tracing::info!(addr = %cfg.api_bind_addr, "api started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum serve")?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested");
}
