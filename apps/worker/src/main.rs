mod executors;
mod heartbeat;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use dpp_finalize::FinalizeProtocol;
use dpp_ledger::LedgerOps;
use dpp_objectstore::ArtifactStore;
use dpp_queue::JobQueue;
use dpp_store::{RunStore, UsageStore};
use tokio_util::sync::CancellationToken;

use crate::executors::ExecutorRegistry;
use crate::worker::Worker;

const CONCURRENCY: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = dpp_config::load_config()?;
    dpp_observability::init_tracing("worker");

    tracing::info!(instance_id = %cfg.instance_id, "worker starting");

    let pool = dpp_store::connect(&cfg.db_url, 10).await?;
    dpp_store::migrate(&pool).await?;

    let store = RunStore::new(pool.clone());
    let usage = UsageStore::new(pool.clone());
    let queue = JobQueue::new(pool);
    let ledger = LedgerOps::new(&cfg.redis_url)?;
    let objects = Arc::new(ArtifactStore::new(cfg.s3_bucket.clone(), Some(cfg.s3_region.clone()), cfg.s3_endpoint_url.clone()).await);
    let finalize = FinalizeProtocol::new(store.clone(), ledger, usage, cfg.artifact_retention);
    let executors = ExecutorRegistry::with_defaults();
    let telemetry = dpp_observability::DppTelemetry::new("worker");

    let shutdown = CancellationToken::new();
    let mut join_set = tokio::task::JoinSet::new();

    for slot in 0..CONCURRENCY {
        let worker = Worker {
            store: store.clone(),
            queue: queue.clone(),
            finalize: finalize.clone(),
            objects: objects.clone(),
            executors: executors.clone(),
            telemetry: telemetry.clone(),
            lease_ttl: cfg.lease_ttl,
            heartbeat_interval: cfg.heartbeat_interval,
        };
        let shutdown = shutdown.clone();
        join_set.spawn(async move {
            tracing::debug!(slot, "worker task started");
            worker.run(shutdown).await
        });
    }

    tracing::info!(concurrency = CONCURRENCY, "worker started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("worker task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("worker task exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("worker task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("worker task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("worker task failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
