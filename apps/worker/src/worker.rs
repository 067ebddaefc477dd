//! Worker loop. One message in flight per task; many
//! worker processes run concurrently for throughput.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dpp_executor::{run_with_enforcement, ExecutionRequest};
use dpp_finalize::{ClaimIdentity, FinalizeOutcome, FinalizeProtocol, ResultPointers};
use dpp_objectstore::{ArtifactStore, Envelope};
use dpp_observability::DppTelemetry;
use dpp_queue::{JobQueue, ReceivedMessage};
use dpp_store::{RunStore, StoreError};
use dpp_types::{ClaimOutcome, ReasonCode, Run, RunStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executors::ExecutorRegistry;
use crate::heartbeat::with_lease_heartbeat;

const POLL_IDLE: Duration = Duration::from_millis(500);
const MAX_RECEIVE_COUNT: i32 = 10;
const IN_FLIGHT_EXTENSION: Duration = Duration::from_secs(30);

pub struct Worker {
    pub store: RunStore,
    pub queue: JobQueue,
    pub finalize: FinalizeProtocol,
    pub objects: Arc<ArtifactStore>,
    pub executors: ExecutorRegistry,
    pub telemetry: DppTelemetry,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl Worker {
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                received = self.queue.receive(self.lease_ttl, MAX_RECEIVE_COUNT) => {
                    match received {
                        Ok(Some(msg)) => {
                            if let Err(e) = self.handle_message(msg).await {
                                tracing::error!(error = %e, "worker: message handling failed");
                            }
                        }
                        Ok(None) => tokio::time::sleep(POLL_IDLE).await,
                        Err(e) => {
                            tracing::error!(error = %e, "worker: queue receive failed");
                            tokio::time::sleep(POLL_IDLE).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, msg: ReceivedMessage) -> anyhow::Result<()> {
        let run = match self.store.get(msg.job.run_id, &msg.job.tenant_id).await {
            Ok(run) => run,
            Err(StoreError::NotFound) => {
                self.queue.delete(msg.message_id).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if run.status.is_terminal() {
            self.queue.delete(msg.message_id).await?;
            return Ok(());
        }

        if run.status == RunStatus::Processing {
            // Another actor (worker or Reaper) may have a finalize in
            // flight for this run; give it room without claiming ownership.
            self.queue.extend_visibility(msg.message_id, IN_FLIGHT_EXTENSION).await?;
            return Ok(());
        }

        if run.status != RunStatus::Queued {
            self.queue.delete(msg.message_id).await?;
            return Ok(());
        }

        let lease_token = Uuid::new_v4().to_string();
        let lease_expires_at = Utc::now()
            + chrono::Duration::from_std(self.lease_ttl).unwrap_or(chrono::Duration::seconds(120));

        let claimed = self
            .store
            .claim_for_processing(run.run_id, &run.tenant_id, run.version, lease_token.clone(), lease_expires_at)
            .await?;
        if !claimed {
            // Another worker won the QUEUED -> PROCESSING race.
            self.queue.delete(msg.message_id).await?;
            return Ok(());
        }

        let should_delete = with_lease_heartbeat(
            &self.store,
            &self.queue,
            run.run_id,
            &run.tenant_id,
            msg.message_id,
            &lease_token,
            self.lease_ttl,
            self.heartbeat_interval,
            self.execute_and_finalize(run.run_id, &run.tenant_id, lease_token.clone()),
        )
        .await?;

        if should_delete {
            self.queue.delete(msg.message_id).await?;
        }
        Ok(())
    }

    /// Execute the pack, then claim and commit the terminal transition.
    /// Returns whether the message should be acknowledged/deleted.
    async fn execute_and_finalize(&self, run_id: Uuid, tenant_id: &str, lease_token: String) -> anyhow::Result<bool> {
        let started = std::time::Instant::now();
        let result = self.execute_and_finalize_inner(run_id, tenant_id, lease_token).await;
        self.telemetry.finalize_ms(started.elapsed().as_millis() as u64);
        result
    }

    async fn execute_and_finalize_inner(&self, run_id: Uuid, tenant_id: &str, lease_token: String) -> anyhow::Result<bool> {
        let run = self.store.get(run_id, tenant_id).await?;

        let executor = self
            .executors
            .get(&run.pack_type)
            .ok_or_else(|| anyhow::anyhow!("no executor registered for pack_type {:?}", run.pack_type))?;

        let request = ExecutionRequest {
            pack_type: run.pack_type.clone(),
            inputs: run.inputs.clone(),
            timebox: Duration::from_secs(run.timebox_sec.max(1) as u64),
            max_cost: run.reservation(),
        };

        let exec_result = run_with_enforcement(executor.as_ref(), &request).await;

        // Heartbeats bump `version`; never trust the pre-execution copy
        // across this boundary.
        let fresh = self.store.get(run_id, tenant_id).await?;

        // Claim precedes any side effect: win the right to finalize before
        // touching the object store or the ledger.
        let claimed = match self
            .finalize
            .claim(&fresh, ClaimIdentity::Worker { lease_token: &lease_token })
            .await?
        {
            ClaimOutcome::Won { finalize_token, version } => (finalize_token, version),
            ClaimOutcome::Lost => {
                self.telemetry.claim_lost("worker");
                return self.resolve_delete_decision(run_id, tenant_id, FinalizeOutcome::ClaimLost).await;
            }
        };

        let outcome = match exec_result {
            Ok(output) => self.commit_success(&fresh, claimed, &run, output).await?,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "pack execution failed");
                self.finalize
                    .commit_failure(&fresh, claimed, fresh.minimum_fee(), ReasonCode::PackExecutionFailed, e.to_string())
                    .await?
            }
        };

        self.resolve_delete_decision(run_id, tenant_id, outcome).await
    }

    /// Upload the artifact (claim already won), then the Phase B commit.
    async fn commit_success(
        &self,
        fresh: &Run,
        claimed: (String, i64),
        original: &Run,
        output: dpp_executor::ExecutionOutput,
    ) -> anyhow::Result<FinalizeOutcome> {
        let envelope = Envelope {
            schema_version: dpp_types::JOB_MESSAGE_SCHEMA_VERSION,
            run_id: fresh.run_id,
            pack_type: fresh.pack_type.clone(),
            status: RunStatus::Completed.as_db_str().to_string(),
            timestamp: Utc::now(),
            reserved_usd: original.reservation().format_4dp(),
            minimum_fee_usd: original.minimum_fee().format_4dp(),
            actual_cost_usd: Some(output.actual_cost.format_4dp()),
            data: output.data,
            artifacts: vec![],
            logs: output.logs,
            meta: serde_json::json!({ "trace_id": fresh.trace_id }),
        };

        match self
            .objects
            .upload_envelope(&fresh.tenant_id, fresh.run_id, &envelope, output.actual_cost.micros())
            .await
        {
            Ok(pointer) => Ok(self
                .finalize
                .commit_success(
                    fresh,
                    claimed,
                    output.actual_cost,
                    ResultPointers {
                        bucket: pointer.bucket,
                        key: pointer.key,
                        sha256: pointer.sha256,
                    },
                )
                .await?),
            Err(e) => {
                tracing::error!(run_id = %fresh.run_id, error = %e, "artifact upload failed, finalizing as failure");
                Ok(self
                    .finalize
                    .commit_failure(
                        fresh,
                        claimed,
                        fresh.minimum_fee(),
                        ReasonCode::PackExecutionFailed,
                        format!("artifact upload failed: {e}"),
                    )
                    .await?)
            }
        }
    }

    /// delete on success/known-terminal, otherwise
    /// leave the message for retry.
    async fn resolve_delete_decision(&self, run_id: Uuid, tenant_id: &str, outcome: FinalizeOutcome) -> anyhow::Result<bool> {
        match outcome {
            FinalizeOutcome::Committed { .. } => {
                self.telemetry.worker_job("committed");
                Ok(true)
            }
            FinalizeOutcome::LeftForReconciler => {
                self.telemetry.worker_job("left_for_reconciler");
                Ok(false)
            }
            FinalizeOutcome::ClaimLost => {
                let latest = self.store.get(run_id, tenant_id).await?;
                let committed = matches!(latest.finalize_stage, Some(dpp_types::FinalizeStage::Committed));
                Ok(committed || latest.status.is_terminal())
            }
        }
    }
}
