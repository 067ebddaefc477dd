use std::time::Duration;

use dpp_types::Money;

/// Shared configuration consumed by every binary (`apps/api`, `apps/worker`,
/// `apps/reaper`, `apps/reconciler`). Keeping one struct, loaded the same way
/// in every `main.rs`, keeps fee floors/ceilings, TTLs, and rate limits from
/// drifting apart between components.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_url: String,
    pub redis_url: String,

    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint_url: Option<String>,

    pub instance_id: String,

    pub reservation_ttl: Duration,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub reaper_batch_size: u32,
    pub reconciler_interval: Duration,
    pub reconciler_stuck_threshold: Duration,

    pub fee_floor: Money,
    pub fee_ceiling: Money,
    pub min_reservation: Money,

    pub submit_rate_limit_per_min: u64,
    pub poll_rate_limit_per_min: u64,

    pub artifact_presign_ttl: Duration,
    pub artifact_retention: chrono::Duration,

    pub api_bind_addr: String,
}
