//! Lease/visibility heartbeat: a bounded interval races against the
//! in-flight future, and every tick opens a **fresh** store/queue call
//! rather than holding a shared connection across ticks.

use std::future::Future;
use std::time::Duration;

use dpp_store::{RunPatch, RunRequire, RunStore};
use dpp_queue::JobQueue;
use dpp_types::RunStatus;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

pub async fn with_lease_heartbeat<T, F>(
    store: &RunStore,
    queue: &JobQueue,
    run_id: Uuid,
    tenant_id: &str,
    message_id: i64,
    lease_token: &str,
    lease_ttl: Duration,
    heartbeat_interval: Duration,
    fut: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let mut fut = Box::pin(fut);
    let mut tick = tokio::time::interval(heartbeat_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tokio::select! {
            res = &mut fut => return res,
            _ = tick.tick() => {
                renew_lease(store, queue, run_id, tenant_id, message_id, lease_token, lease_ttl).await;
            }
        }
    }
}

async fn renew_lease(
    store: &RunStore,
    queue: &JobQueue,
    run_id: Uuid,
    tenant_id: &str,
    message_id: i64,
    lease_token: &str,
    lease_ttl: Duration,
) {
    let new_expiry = chrono::Utc::now() + chrono::Duration::from_std(lease_ttl).unwrap_or_default();

    // Re-read the current version fresh: heartbeats bump `version`, so the
    // worker's cached view must never be trusted after the first tick.
    let current = match store.get(run_id, tenant_id).await {
        Ok(run) => run,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "heartbeat: failed to read run for renewal");
            return;
        }
    };

    match store
        .update_if(
            run_id,
            tenant_id,
            current.version,
            RunPatch::new().lease(lease_token.to_string(), new_expiry),
            RunRequire::new()
                .status(RunStatus::Processing)
                .lease_token(lease_token.to_string()),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(run_id = %run_id, "heartbeat: lease renewal CAS lost, another actor took this run");
        }
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "heartbeat: lease renewal failed");
        }
    }

    if let Err(e) = queue.extend_visibility(message_id, lease_ttl).await {
        tracing::warn!(message_id, error = %e, "heartbeat: visibility extension failed");
    }
}
