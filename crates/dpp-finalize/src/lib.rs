//! FinalizeProtocol: exactly-once terminal transition.
//!
//! Two phases, strictly in order: `claim` (a DB-side CAS granting exclusive
//! right to finalize) then `commit` (settle the ledger, then a second
//! DB-side CAS under the token `claim` handed out). No side effect may
//! precede a successful claim, and the Worker must never retry a commit
//! after a crash — that recovery is the Reconciler's job alone.

mod errors;

pub use errors::FinalizeError;

use chrono::Utc;
use dpp_ledger::LedgerOps;
use dpp_store::{RunPatch, RunRequire, RunStore, UsageStore};
use dpp_types::{ClaimOutcome, Money, ReasonCode, Run, RunStatus};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, FinalizeError>;

/// The "identity predicate" from who is allowed to
/// claim this run right now.
pub enum ClaimIdentity<'a> {
    Worker { lease_token: &'a str },
    Reaper,
}

/// Pointers to an already-uploaded artifact. Finalize never
/// uploads; the Worker must have durably written the artifact before
/// calling `finalize_success`.
#[derive(Debug, Clone)]
pub struct ResultPointers {
    pub bucket: String,
    pub key: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Committed { charge_micros: i64 },
    ClaimLost,
    /// Claim succeeded but settle reported no reservation, or the final
    /// commit CAS did not match. The run is left in an intermediate state
    /// for the Reconciler to resolve; this is not a bug to retry.
    LeftForReconciler,
}

#[derive(Clone)]
pub struct FinalizeProtocol {
    store: RunStore,
    ledger: LedgerOps,
    usage: UsageStore,
    artifact_retention: chrono::Duration,
}

impl FinalizeProtocol {
    pub fn new(store: RunStore, ledger: LedgerOps, usage: UsageStore, artifact_retention: chrono::Duration) -> Self {
        Self { store, ledger, usage, artifact_retention }
    }

    /// Phase A. No side effects may precede this call
    /// returning `Won`.
    pub async fn claim(&self, run: &Run, identity: ClaimIdentity<'_>) -> Result<ClaimOutcome> {
        let finalize_token = Uuid::new_v4().to_string();
        let claimed_at = Utc::now();

        let mut require = RunRequire::new()
            .status(RunStatus::Processing)
            .finalize_stage_is_null();
        require = match identity {
            ClaimIdentity::Worker { lease_token } => require.lease_token(lease_token.to_string()),
            ClaimIdentity::Reaper => require.lease_expired(),
        };

        let patch = RunPatch::new().finalize_claim(finalize_token.clone(), claimed_at);

        let won = self
            .store
            .update_if(run.run_id, &run.tenant_id, run.version, patch, require)
            .await?;

        if won {
            tracing::debug!(run_id = %run.run_id, "finalize claim won");
            Ok(ClaimOutcome::Won {
                finalize_token,
                version: run.version + 1,
            })
        } else {
            tracing::debug!(run_id = %run.run_id, "finalize claim lost");
            Ok(ClaimOutcome::Lost)
        }
    }

    /// Phase B success path, called only after the Worker has already
    /// claimed (Phase A) *and* durably uploaded the artifact — claim must
    /// precede the upload, never the other way around. Terminal =
    /// COMPLETED, charge = `actual_cost`.
    pub async fn commit_success(
        &self,
        run: &Run,
        claimed: (String, i64),
        actual_cost: Money,
        result: ResultPointers,
    ) -> Result<FinalizeOutcome> {
        let extra = RunPatch::new()
            .actual_cost_micros(actual_cost.micros())
            .result_pointers(result.bucket, result.key, result.sha256);

        self.commit(run, claimed, RunStatus::Completed, actual_cost, extra)
            .await
    }

    /// Phase B failure path: the pack execution or the artifact upload
    /// failed after a successful claim. Terminal = FAILED, caller supplies
    /// the charge (`minimum_fee` for a Worker failure, `min(minimum_fee,
    /// reserved)` for a Reaper timeout).
    pub async fn commit_failure(
        &self,
        run: &Run,
        claimed: (String, i64),
        charge: Money,
        reason: ReasonCode,
        detail: impl Into<String>,
    ) -> Result<FinalizeOutcome> {
        let extra = RunPatch::new().error(reason.as_str(), detail.into());
        self.commit(run, claimed, RunStatus::Failed, charge, extra).await
    }

    /// Reaper path: claim and commit back to back (no upload step sits
    /// between them for a timeout), terminal = FAILED, reason =
    /// WORKER_TIMEOUT, identity = the temporal "lease expired" predicate,
    /// charge = `min(minimum_fee, reserved)`.
    pub async fn finalize_timeout(&self, run: &Run) -> Result<FinalizeOutcome> {
        let claimed = match self.claim(run, ClaimIdentity::Reaper).await? {
            ClaimOutcome::Won { finalize_token, version } => (finalize_token, version),
            ClaimOutcome::Lost => return Ok(FinalizeOutcome::ClaimLost),
        };

        let charge = run.minimum_fee().clamp(Money::ZERO, run.reservation());
        self.commit_failure(run, claimed, charge, ReasonCode::WorkerTimeout, "lease expired before finalize")
            .await
    }

    /// Phase B: settle the ledger, then the final commit CAS.
    /// `extra` carries the terminal-specific columns (result pointers or
    /// error fields) on top of the common status/money_state/actual_cost
    /// columns every commit sets.
    async fn commit(
        &self,
        run: &Run,
        (finalize_token, claimed_version): (String, i64),
        terminal: RunStatus,
        requested_charge: Money,
        extra: RunPatch,
    ) -> Result<FinalizeOutcome> {
        let settle = self
            .ledger
            .settle(&run.tenant_id, &run.run_id.to_string(), requested_charge)
            .await?;

        let charge = match settle {
            dpp_types::SettleOutcome::Ok { charge, .. } => charge,
            dpp_types::SettleOutcome::NoReserve => {
                tracing::error!(
                    run_id = %run.run_id,
                    "settle reported no reservation after a successful claim; leaving run CLAIMED for the reconciler"
                );
                return Ok(FinalizeOutcome::LeftForReconciler);
            }
        };

        let patch = RunPatch::new()
            .status(terminal)
            .money_state(dpp_types::MoneyState::Settled)
            .actual_cost_micros(charge.micros())
            .completed_now()
            .finalize_committed()
            .retention_until(Utc::now() + self.artifact_retention)
            .merge(extra);

        let require = RunRequire::new()
            .finalize_token(finalize_token)
            .finalize_stage(dpp_types::FinalizeStage::Claimed);

        let committed = self
            .store
            .update_if(run.run_id, &run.tenant_id, claimed_version, patch, require)
            .await?;

        if !committed {
            // The Worker must not retry blindly: the ledger has
            // already moved and a receipt exists, so only the Reconciler may
            // act from here.
            tracing::error!(
                run_id = %run.run_id,
                "final commit CAS did not match after settle; leaving run for the reconciler"
            );
            return Ok(FinalizeOutcome::LeftForReconciler);
        }

        if let Err(e) = self
            .usage
            .record_finalized_run(
                &run.tenant_id,
                Utc::now().date_naive(),
                terminal == RunStatus::Completed,
                run.reservation_max_cost_micros,
                charge.micros(),
            )
            .await
        {
            // Usage rollup is accounting, not money-safety; never block a
            // commit that already landed on a failure to update it.
            tracing::error!(run_id = %run.run_id, error = %e, "usage rollup update failed");
        }

        Ok(FinalizeOutcome::Committed {
            charge_micros: charge.micros(),
        })
    }
}
