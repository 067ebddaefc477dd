//! Daily per-tenant usage rollup. One row per `(tenant_id, usage_date)`,
//! updated with a single atomic upsert per finalize so PlanGuard and billing
//! never need to scan `dpp.runs` directly.

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::errors::StoreError;

#[derive(Clone)]
pub struct UsageStore {
    pool: PgPool,
}

impl UsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Folds one finalized run into today's rollup row. `reserved_micros` is
    /// recorded at reservation time regardless of outcome; `actual_cost_micros`
    /// only on success.
    pub async fn record_finalized_run(
        &self,
        tenant_id: &str,
        usage_date: NaiveDate,
        succeeded: bool,
        reserved_micros: i64,
        actual_cost_micros: i64,
    ) -> Result<(), StoreError> {
        let success_inc: i64 = if succeeded { 1 } else { 0 };
        let fail_inc: i64 = if succeeded { 0 } else { 1 };

        sqlx::query(
            r#"
            insert into dpp.usage_daily (
                tenant_id, usage_date, runs_count, success_count, fail_count,
                actual_cost_micros, reserved_micros, updated_at
            ) values ($1, $2, 1, $3, $4, $5, $6, now())
            on conflict (tenant_id, usage_date) do update set
                runs_count = dpp.usage_daily.runs_count + 1,
                success_count = dpp.usage_daily.success_count + excluded.success_count,
                fail_count = dpp.usage_daily.fail_count + excluded.fail_count,
                actual_cost_micros = dpp.usage_daily.actual_cost_micros + excluded.actual_cost_micros,
                reserved_micros = dpp.usage_daily.reserved_micros + excluded.reserved_micros,
                updated_at = now()
            "#,
        )
        .bind(tenant_id)
        .bind(usage_date)
        .bind(success_inc)
        .bind(fail_inc)
        .bind(actual_cost_micros)
        .bind(reserved_micros)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
