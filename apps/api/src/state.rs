use std::time::Duration;

use dpp_ledger::LedgerOps;
use dpp_objectstore::ArtifactStore;
use dpp_observability::DppTelemetry;
use dpp_planguard::PlanGuard;
use dpp_queue::JobQueue;
use dpp_store::{ApiKeyStore, RunStore, UsageStore};
use dpp_types::Money;

#[derive(Clone)]
pub struct AppState {
    pub store: RunStore,
    pub usage: UsageStore,
    pub api_keys: ApiKeyStore,
    pub ledger: LedgerOps,
    pub plan_guard: PlanGuard,
    pub queue: JobQueue,
    pub objects: ArtifactStore,
    pub telemetry: DppTelemetry,
    pub fee_floor: Money,
    pub fee_ceiling: Money,
    pub reservation_ttl: Duration,
    pub artifact_presign_ttl: Duration,
}
