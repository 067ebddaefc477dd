//! Read-side access to `dpp.plans` / `dpp.tenant_plans` / `dpp.global_pause`
//! for PlanGuard. Plan CRUD is out of scope; this crate
//! only reads what admission needs to enforce.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::errors::StoreError;

#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: String,
    pub allowed_pack_types: Vec<String>,
    pub pack_cost_ceilings_micros: serde_json::Value,
    pub submit_rate_limit_per_min: i64,
    pub poll_rate_limit_per_min: i64,
}

impl Plan {
    /// Per-pack ceiling if one is configured for `pack_type`; absence of an
    /// entry means "no ceiling beyond the caller's own reservation request".
    pub fn pack_ceiling_micros(&self, pack_type: &str) -> Option<i64> {
        self.pack_cost_ceilings_micros.get(pack_type)?.as_i64()
    }
}

#[derive(Clone)]
pub struct PlanStore {
    pool: PgPool,
}

impl PlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn plan_for_tenant(&self, tenant_id: &str) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query(
            r#"
            select p.plan_id, p.allowed_pack_types, p.pack_cost_ceilings_micros,
                   p.submit_rate_limit_per_min, p.poll_rate_limit_per_min
            from dpp.tenant_plans tp
            join dpp.plans p on p.plan_id = tp.plan_id
            where tp.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Plan {
            plan_id: row.try_get("plan_id")?,
            allowed_pack_types: row.try_get("allowed_pack_types")?,
            pack_cost_ceilings_micros: row.try_get("pack_cost_ceilings_micros")?,
            submit_rate_limit_per_min: row.try_get("submit_rate_limit_per_min")?,
            poll_rate_limit_per_min: row.try_get("poll_rate_limit_per_min")?,
        }))
    }

    /// `None` if the platform is not paused, or the pause has already lapsed.
    pub async fn active_global_pause(&self) -> Result<Option<(DateTime<Utc>, Option<String>)>, StoreError> {
        let row = sqlx::query(
            "select pause_until, reason from dpp.global_pause where id = 1 and pause_until > now()",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some((row.try_get("pause_until")?, row.try_get("reason")?)))
    }

    pub async fn set_global_pause(
        &self,
        pause_until: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into dpp.global_pause (id, pause_until, reason, updated_at)
            values (1, $1, $2, now())
            on conflict (id) do update set
                pause_until = excluded.pause_until,
                reason = excluded.reason,
                updated_at = now()
            "#,
        )
        .bind(pause_until)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
