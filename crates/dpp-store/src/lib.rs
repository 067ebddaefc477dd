mod api_keys;
mod errors;
mod migrations;
mod patch;
mod plans;
mod pool;
mod run_store;
mod usage;

pub use api_keys::{ApiKeyRecord, ApiKeyStore};
pub use errors::StoreError;
pub use migrations::migrate;
pub use patch::{RunPatch, RunRequire};
pub use plans::{Plan, PlanStore};
pub use pool::connect;
pub use run_store::{parse_reason_code, NewRun, RunStore};
pub use usage::UsageStore;

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_types::{FinalizeStage, MoneyState, RunStatus};

    // These exercise `RunPatch`/`RunRequire` builders only; CAS semantics
    // themselves need a live Postgres connection and are covered by the
    // integration tests in `tests/run_store.rs`.

    #[test]
    fn patch_builder_accumulates_columns() {
        let patch = RunPatch::new()
            .status(RunStatus::Processing)
            .money_state(MoneyState::Reserved);
        assert_eq!(patch.cols.len(), 2);
    }

    #[test]
    fn require_builder_accumulates_predicates() {
        let require = RunRequire::new()
            .status(RunStatus::Queued)
            .finalize_stage_is_null();
        assert_eq!(require.predicates.len(), 2);
    }

    #[test]
    fn finalize_claim_sets_stage_and_token() {
        let patch = RunPatch::new().finalize_claim("tok-1".to_string(), chrono_now());
        assert_eq!(patch.cols.len(), 3);
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        // Deterministic stand-in; real callers pass `Utc::now()`.
        chrono::DateTime::from_timestamp(0, 0).unwrap()
    }

    #[allow(dead_code)]
    fn _finalize_stage_is_exhaustive(stage: FinalizeStage) -> &'static str {
        stage.as_db_str()
    }
}
