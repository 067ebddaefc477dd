mod reaper;

use anyhow::{Context, Result};
use dpp_finalize::FinalizeProtocol;
use dpp_ledger::LedgerOps;
use dpp_store::{RunStore, UsageStore};
use tokio_util::sync::CancellationToken;

use crate::reaper::Reaper;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = dpp_config::load_config()?;
    dpp_observability::init_tracing("reaper");

    tracing::info!(instance_id = %cfg.instance_id, "reaper starting");

    let pool = dpp_store::connect(&cfg.db_url, 5).await?;
    dpp_store::migrate(&pool).await?;

    let store = RunStore::new(pool.clone());
    let usage = UsageStore::new(pool);
    let ledger = LedgerOps::new(&cfg.redis_url)?;
    let finalize = FinalizeProtocol::new(store.clone(), ledger, usage, cfg.artifact_retention);
    let telemetry = dpp_observability::DppTelemetry::new("reaper");

    let reaper = Reaper {
        store,
        finalize,
        telemetry,
        batch_size: cfg.reaper_batch_size as i64,
    };

    let shutdown = CancellationToken::new();
    let interval = cfg.reaper_interval;

    let mut join_set = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move { reaper.run(interval, shutdown).await });
    }

    tracing::info!("reaper started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("reaper task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("reaper task exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("reaper task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("reaper task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("reaper task failed"));
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
