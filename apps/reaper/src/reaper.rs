//! Periodic sweep for runs whose Worker lease expired before a finalize
//! claim was ever taken. Reaper is the only actor allowed to claim with the
//! "lease expired" identity predicate instead of a matching lease token.

use std::time::Duration;

use dpp_finalize::FinalizeProtocol;
use dpp_finalize::FinalizeOutcome;
use dpp_observability::DppTelemetry;
use dpp_store::RunStore;
use tokio_util::sync::CancellationToken;

pub struct Reaper {
    pub store: RunStore,
    pub finalize: FinalizeProtocol,
    pub telemetry: DppTelemetry,
    pub batch_size: i64,
}

impl Reaper {
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("reaper: shutdown");
                    return Ok(());
                }
                _ = tick.tick() => {}
            }

            let started = std::time::Instant::now();
            let result = self.sweep().await;
            self.telemetry.tick_ms("reaper", started.elapsed().as_millis() as u64);
            if let Err(e) = result {
                tracing::warn!(error = %e, "reaper: sweep failed, will retry next tick");
            }
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let expired = self.store.list_expired_leases(self.batch_size).await?;
        if expired.is_empty() {
            return Ok(());
        }

        tracing::info!(count = expired.len(), "reaper: sweeping expired leases");

        for run in expired {
            match self.finalize.finalize_timeout(&run).await {
                Ok(FinalizeOutcome::Committed { charge_micros }) => {
                    self.telemetry.reaper_reconciled();
                    tracing::info!(run_id = %run.run_id, charge_micros, "reaper: finalized timed-out run");
                }
                Ok(FinalizeOutcome::ClaimLost) => {
                    // Expected under contention: a worker's late heartbeat or
                    // another reaper instance won the claim first.
                    self.telemetry.claim_lost("reaper");
                    tracing::debug!(run_id = %run.run_id, "reaper: claim lost");
                }
                Ok(FinalizeOutcome::LeftForReconciler) => {
                    tracing::warn!(run_id = %run.run_id, "reaper: left for reconciler");
                }
                Err(e) => {
                    // One run's failure must never halt the rest of the batch.
                    tracing::error!(run_id = %run.run_id, error = %e, "reaper: finalize_timeout failed");
                }
            }
        }

        Ok(())
    }
}
