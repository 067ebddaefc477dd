mod reconciler;

use anyhow::{Context, Result};
use dpp_ledger::LedgerOps;
use dpp_objectstore::ArtifactStore;
use dpp_store::{RunStore, UsageStore};
use tokio_util::sync::CancellationToken;

use crate::reconciler::Reconciler;

const BATCH_SIZE: i64 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = dpp_config::load_config()?;
    dpp_observability::init_tracing("reconciler");

    tracing::info!(instance_id = %cfg.instance_id, "reconciler starting");

    let pool = dpp_store::connect(&cfg.db_url, 5).await?;
    dpp_store::migrate(&pool).await?;

    let store = RunStore::new(pool.clone());
    let usage = UsageStore::new(pool);
    let ledger = LedgerOps::new(&cfg.redis_url)?;
    let objects = ArtifactStore::new(cfg.s3_bucket.clone(), Some(cfg.s3_region.clone()), cfg.s3_endpoint_url.clone()).await;
    let telemetry = dpp_observability::DppTelemetry::new("reconciler");

    let reconciler = Reconciler {
        store,
        ledger,
        objects,
        usage,
        telemetry,
        stuck_threshold: cfg.reconciler_stuck_threshold,
        batch_size: BATCH_SIZE,
        artifact_retention: cfg.artifact_retention,
    };

    let shutdown = CancellationToken::new();
    let interval = cfg.reconciler_interval;

    let mut join_set = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move { reconciler.run(interval, shutdown).await });
    }

    tracing::info!("reconciler started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("reconciler task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("reconciler task exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("reconciler task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("reconciler task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("reconciler task failed"));
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
