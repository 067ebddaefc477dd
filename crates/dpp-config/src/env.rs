use serde::Deserialize;

/// Raw environment shape, deserialized by `envy` before validation/parsing
/// in `load.rs`. Field names map to `SCREAMING_SNAKE_CASE` env vars.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub(super) struct Env {
    pub dpp_db_url: String,
    pub dpp_redis_url: String,

    pub dpp_s3_bucket: String,
    pub dpp_s3_region: String,
    pub dpp_s3_endpoint_url: String,

    pub dpp_instance_id: String,

    pub dpp_reservation_ttl_secs: u64,
    pub dpp_lease_ttl_secs: u64,
    pub dpp_heartbeat_interval_secs: u64,
    pub dpp_reaper_interval_secs: u64,
    pub dpp_reaper_batch_size: u32,
    pub dpp_reconciler_interval_secs: u64,
    pub dpp_reconciler_stuck_threshold_secs: u64,

    pub dpp_fee_floor_micros: i64,
    pub dpp_fee_ceiling_micros: i64,
    pub dpp_min_reservation_micros: i64,

    pub dpp_submit_rate_limit_per_min: u64,
    pub dpp_poll_rate_limit_per_min: u64,

    pub dpp_artifact_presign_ttl_secs: u64,
    pub dpp_artifact_retention_days: i64,

    pub dpp_api_bind_addr: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            dpp_db_url: String::new(),
            dpp_redis_url: String::new(),
            dpp_s3_bucket: String::new(),
            dpp_s3_region: "us-east-1".to_string(),
            dpp_s3_endpoint_url: String::new(),
            dpp_instance_id: String::new(),
            dpp_reservation_ttl_secs: 3_600,
            dpp_lease_ttl_secs: 120,
            dpp_heartbeat_interval_secs: 30,
            dpp_reaper_interval_secs: 30,
            dpp_reaper_batch_size: 100,
            dpp_reconciler_interval_secs: 60,
            dpp_reconciler_stuck_threshold_secs: 300,
            dpp_fee_floor_micros: 5_000,
            dpp_fee_ceiling_micros: 100_000,
            dpp_min_reservation_micros: 5_000,
            dpp_submit_rate_limit_per_min: 10,
            dpp_poll_rate_limit_per_min: 60,
            dpp_artifact_presign_ttl_secs: 600,
            dpp_artifact_retention_days: 30,
            dpp_api_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}
