//! Receipt-based recovery for runs stuck `PROCESSING`/`CLAIMED` past the
//! stuck threshold: a Worker or Reaper took the finalize claim and crashed
//! before the commit CAS landed. The receipt is the only proof of
//! settlement this loop trusts; it never invents a charge.

use std::time::Duration;

use chrono::Utc;
use dpp_ledger::LedgerOps;
use dpp_objectstore::ArtifactStore;
use dpp_observability::DppTelemetry;
use dpp_store::{RunPatch, RunRequire, RunStore, UsageStore};
use dpp_types::{Money, ReasonCode, Run, RunStatus};
use tokio_util::sync::CancellationToken;

pub struct Reconciler {
    pub store: RunStore,
    pub ledger: LedgerOps,
    pub objects: ArtifactStore,
    pub usage: UsageStore,
    pub telemetry: DppTelemetry,
    pub stuck_threshold: Duration,
    pub batch_size: i64,
    pub artifact_retention: chrono::Duration,
}

impl Reconciler {
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("reconciler: shutdown");
                    return Ok(());
                }
                _ = tick.tick() => {}
            }

            let started = std::time::Instant::now();
            let result = self.sweep().await;
            self.telemetry.tick_ms("reconciler", started.elapsed().as_millis() as u64);
            if let Err(e) = result {
                tracing::warn!(error = %e, "reconciler: sweep failed, will retry next tick");
            }
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        self.log_reservation_audit().await;

        let older_than = Utc::now()
            - chrono::Duration::from_std(self.stuck_threshold).unwrap_or(chrono::Duration::minutes(5));
        let stuck = self.store.list_stuck_claimed(older_than, self.batch_size).await?;
        if stuck.is_empty() {
            return Ok(());
        }

        tracing::info!(count = stuck.len(), "reconciler: sweeping stuck claims");

        for run in stuck {
            if let Err(e) = self.reconcile_one(&run).await {
                tracing::error!(run_id = %run.run_id, error = %e, "reconciler: reconcile_one failed");
            }
        }

        Ok(())
    }

    /// Partial reconciliation audit: the live Redis reservation total next
    /// to the DB's settled total. Neither term alone proves correctness —
    /// a full MS-6-style equation also needs each tenant's initial balance
    /// grant, which this platform has no CRUD for — so this only logs the
    /// two provable halves for an operator to watch, rather than asserting
    /// pass/fail.
    async fn log_reservation_audit(&self) {
        let reserved = self.ledger.scan_active_reservations().await;
        let settled = self.store.sum_settled().await;

        match (reserved, settled) {
            (Ok((reserved_total, reserved_count)), Ok((settled_total, settled_count))) => {
                tracing::info!(
                    reserved_usd_micros = reserved_total.micros(),
                    reserved_count,
                    settled_usd_micros = settled_total,
                    settled_count,
                    "reconciler: reservation/settlement audit snapshot"
                );
            }
            (Err(e), _) => tracing::warn!(error = %e, "reconciler: reservation scan failed for audit"),
            (_, Err(e)) => tracing::warn!(error = %e, "reconciler: settled sum query failed for audit"),
        }
    }

    async fn reconcile_one(&self, run: &Run) -> anyhow::Result<()> {
        let reservation = self.ledger.get_reservation(&run.run_id.to_string()).await?;
        let receipt = self.ledger.get_receipt(&run.run_id.to_string()).await?;

        let Some(finalize_token) = run.finalize_token.clone() else {
            tracing::warn!(run_id = %run.run_id, "reconciler: stuck claim has no finalize_token, skipping");
            return Ok(());
        };

        match (reservation.is_some(), receipt) {
            (true, _) => self.case_a_settle_and_commit(run, &finalize_token).await,
            (false, Some(receipt)) => {
                self.case_b_commit_from_receipt(run, &finalize_token, receipt.charged).await
            }
            (false, None) => self.case_c_mark_audit_required(run, &finalize_token).await,
        }
    }

    /// Case A: the reservation is still live, so settle has not happened.
    /// The artifact's presence tells us whether the pack actually finished.
    async fn case_a_settle_and_commit(&self, run: &Run, finalize_token: &str) -> anyhow::Result<()> {
        let artifact_present = match (&run.result_bucket, &run.result_key) {
            (Some(bucket), Some(key)) => self.objects.exists(bucket, key).await?,
            _ => false,
        };

        let (requested_charge, terminal, reason) = if artifact_present {
            let charge = run
                .actual_cost_micros
                .unwrap_or(run.reservation_max_cost_micros);
            (Money::from_micros(charge), RunStatus::Completed, None)
        } else {
            let charge = run.minimum_fee().clamp(Money::ZERO, run.reservation());
            (charge, RunStatus::Failed, Some(ReasonCode::WorkerCrashDuringFinalize))
        };

        let settle = self
            .ledger
            .settle(&run.tenant_id, &run.run_id.to_string(), requested_charge)
            .await?;

        let charge = match settle {
            dpp_types::SettleOutcome::Ok { charge, .. } => charge,
            dpp_types::SettleOutcome::NoReserve => {
                // Another recovery pass (or the original worker, slow to
                // crash) settled between our read and this call; the next
                // sweep will see the receipt and take Case B.
                tracing::debug!(run_id = %run.run_id, "reconciler: settle raced, deferring to next sweep");
                return Ok(());
            }
        };

        self.commit_claimed(run, finalize_token, terminal, charge, reason, "a").await
    }

    /// Case B: settle already happened; the receipt is authoritative. The
    /// DB-side commit is guarded, not forced — a run another recovery path
    /// already committed is silently skipped.
    async fn case_b_commit_from_receipt(&self, run: &Run, finalize_token: &str, charged: Money) -> anyhow::Result<()> {
        let artifact_present = match (&run.result_bucket, &run.result_key) {
            (Some(bucket), Some(key)) => self.objects.exists(bucket, key).await?,
            _ => false,
        };
        let (terminal, reason) = if artifact_present {
            (RunStatus::Completed, None)
        } else {
            (RunStatus::Failed, Some(ReasonCode::WorkerCrashDuringFinalize))
        };

        self.commit_claimed(run, finalize_token, terminal, charged, reason, "b").await
    }

    /// Case C: no reservation, no receipt — nothing proves a charge
    /// happened. Mark for manual audit rather than guessing.
    async fn case_c_mark_audit_required(&self, run: &Run, finalize_token: &str) -> anyhow::Result<()> {
        let patch = RunPatch::new()
            .status(RunStatus::Failed)
            .money_state(dpp_types::MoneyState::AuditRequired)
            .actual_cost_micros(0)
            .error(ReasonCode::NoSettlementReceipt.as_str(), "no reservation and no settlement receipt found")
            .completed_now()
            .finalize_committed()
            .retention_until(Utc::now() + self.artifact_retention);

        let require = RunRequire::new()
            .finalize_token(finalize_token.to_string())
            .finalize_stage(dpp_types::FinalizeStage::Claimed);

        let committed = self
            .store
            .update_if(run.run_id, &run.tenant_id, run.version, patch, require)
            .await?;

        if committed {
            self.telemetry.reconciler_case("c");
            tracing::error!(run_id = %run.run_id, "reconciler: marked AUDIT_REQUIRED, no settlement receipt");
            self.record_usage(run, false, 0).await;
        } else {
            tracing::debug!(run_id = %run.run_id, "reconciler: case C commit raced, already resolved");
        }
        Ok(())
    }

    async fn record_usage(&self, run: &Run, succeeded: bool, charge_micros: i64) {
        if let Err(e) = self
            .usage
            .record_finalized_run(&run.tenant_id, Utc::now().date_naive(), succeeded, run.reservation_max_cost_micros, charge_micros)
            .await
        {
            tracing::error!(run_id = %run.run_id, error = %e, "reconciler: usage rollup update failed");
        }
    }

    async fn commit_claimed(
        &self,
        run: &Run,
        finalize_token: &str,
        terminal: RunStatus,
        charge: Money,
        reason: Option<ReasonCode>,
        case: &'static str,
    ) -> anyhow::Result<()> {
        let mut patch = RunPatch::new()
            .status(terminal)
            .money_state(dpp_types::MoneyState::Settled)
            .actual_cost_micros(charge.micros())
            .completed_now()
            .finalize_committed()
            .retention_until(Utc::now() + self.artifact_retention);

        if let Some(reason) = reason {
            patch = patch.error(reason.as_str(), "recovered by reconciler after a mid-finalize crash");
        }

        let require = RunRequire::new()
            .finalize_token(finalize_token.to_string())
            .finalize_stage(dpp_types::FinalizeStage::Claimed);

        let committed = self
            .store
            .update_if(run.run_id, &run.tenant_id, run.version, patch, require)
            .await?;

        if committed {
            self.telemetry.reconciler_case(case);
            tracing::info!(run_id = %run.run_id, status = terminal.as_db_str(), charge_micros = charge.micros(), "reconciler: rolled forward/back");
            self.record_usage(run, terminal == RunStatus::Completed, charge.micros()).await;
        } else {
            tracing::debug!(run_id = %run.run_id, "reconciler: commit raced, already resolved by another path");
        }
        Ok(())
    }
}
