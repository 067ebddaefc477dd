use std::time::Duration;

use anyhow::{Context, Result};
use dpp_types::Money;

use super::env::Env;
use super::types::AppConfig;

pub fn load_config() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    let env: Env = envy::from_env().context("load DPP env config")?;

    if env.dpp_db_url.trim().is_empty() {
        anyhow::bail!("DPP_DB_URL must be set");
    }
    if env.dpp_redis_url.trim().is_empty() {
        anyhow::bail!("DPP_REDIS_URL must be set");
    }
    if env.dpp_s3_bucket.trim().is_empty() {
        anyhow::bail!("DPP_S3_BUCKET must be set");
    }

    if env.dpp_fee_floor_micros < 0 {
        anyhow::bail!("DPP_FEE_FLOOR_MICROS must be >= 0");
    }
    if env.dpp_fee_ceiling_micros < env.dpp_fee_floor_micros {
        anyhow::bail!("DPP_FEE_CEILING_MICROS must be >= DPP_FEE_FLOOR_MICROS");
    }
    if env.dpp_min_reservation_micros < dpp_types::run::PLATFORM_MIN_RESERVATION_MICROS {
        anyhow::bail!(
            "DPP_MIN_RESERVATION_MICROS must be >= platform minimum ({})",
            dpp_types::run::PLATFORM_MIN_RESERVATION_MICROS
        );
    }

    let instance_id = if env.dpp_instance_id.trim().is_empty() {
        format!("dpp-{}", uuid::Uuid::new_v4())
    } else {
        env.dpp_instance_id.clone()
    };

    Ok(AppConfig {
        db_url: env.dpp_db_url,
        redis_url: env.dpp_redis_url,
        s3_bucket: env.dpp_s3_bucket,
        s3_region: env.dpp_s3_region,
        s3_endpoint_url: if env.dpp_s3_endpoint_url.trim().is_empty() {
            None
        } else {
            Some(env.dpp_s3_endpoint_url)
        },
        instance_id,
        reservation_ttl: Duration::from_secs(env.dpp_reservation_ttl_secs),
        lease_ttl: Duration::from_secs(env.dpp_lease_ttl_secs),
        heartbeat_interval: Duration::from_secs(env.dpp_heartbeat_interval_secs),
        reaper_interval: Duration::from_secs(env.dpp_reaper_interval_secs),
        reaper_batch_size: env.dpp_reaper_batch_size,
        reconciler_interval: Duration::from_secs(env.dpp_reconciler_interval_secs),
        reconciler_stuck_threshold: Duration::from_secs(env.dpp_reconciler_stuck_threshold_secs),
        fee_floor: Money::from_micros(env.dpp_fee_floor_micros),
        fee_ceiling: Money::from_micros(env.dpp_fee_ceiling_micros),
        min_reservation: Money::from_micros(env.dpp_min_reservation_micros),
        submit_rate_limit_per_min: env.dpp_submit_rate_limit_per_min,
        poll_rate_limit_per_min: env.dpp_poll_rate_limit_per_min,
        artifact_presign_ttl: Duration::from_secs(env.dpp_artifact_presign_ttl_secs),
        artifact_retention: chrono::Duration::days(env.dpp_artifact_retention_days),
        api_bind_addr: env.dpp_api_bind_addr,
    })
}
