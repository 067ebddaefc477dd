//! `RunStore`: the only component permitted to mutate `dpp.runs`.
//! `update_if` is the single mutation primitive; every other write goes
//! through it.

use chrono::{DateTime, Utc};
use dpp_types::{FinalizeStage, MoneyState, ReasonCode, Run, RunStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::patch::{Predicate, RunPatch, RunRequire, SqlValue};

#[derive(Clone)]
pub struct RunStore {
    pool: PgPool,
}

/// A fresh `NewRun` to admit. `idempotency_key` absent means
/// the caller opted out of idempotent replay for this submission.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub tenant_id: String,
    pub pack_type: String,
    pub idempotency_key: Option<String>,
    pub payload_hash: String,
    pub reservation_max_cost_micros: i64,
    pub minimum_fee_micros: i64,
    pub timebox_sec: i32,
    pub min_reliability_score: f64,
    pub inputs: serde_json::Value,
    pub trace_id: Option<String>,
}

impl RunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new run in `QUEUED`/`NONE` state. A unique-violation on
    /// `runs_tenant_idempotency_key_uidx` surfaces as
    /// `StoreError::DuplicateIdempotencyKey` so admission can fall back to
    /// the idempotent-replay lookup.
    pub async fn create(&self, new_run: NewRun) -> Result<Run, StoreError> {
        let row = sqlx::query(
            r#"
            insert into dpp.runs (
                tenant_id, pack_type, status, money_state,
                idempotency_key, payload_hash,
                reservation_max_cost_micros, minimum_fee_micros,
                timebox_sec, min_reliability_score, inputs, trace_id
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
            )
            returning *
            "#,
        )
        .bind(&new_run.tenant_id)
        .bind(&new_run.pack_type)
        .bind(RunStatus::Queued.as_db_str())
        .bind(MoneyState::None.as_db_str())
        .bind(&new_run.idempotency_key)
        .bind(&new_run.payload_hash)
        .bind(new_run.reservation_max_cost_micros)
        .bind(new_run.minimum_fee_micros)
        .bind(new_run.timebox_sec)
        .bind(new_run.min_reliability_score)
        .bind(&new_run.inputs)
        .bind(&new_run.trace_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db)
                if db.constraint() == Some("runs_tenant_idempotency_key_uidx") =>
            {
                StoreError::DuplicateIdempotencyKey
            }
            _ => StoreError::Db(e),
        })?;

        row_to_run(row)
    }

    /// Tenant-scoped lookup. Returning `NotFound` for both "doesn't exist"
    /// and "belongs to another tenant" is the stealth-404 behavior admission
    /// and the read API both rely on.
    pub async fn get(&self, run_id: Uuid, tenant_id: &str) -> Result<Run, StoreError> {
        let row = sqlx::query("select * from dpp.runs where run_id = $1 and tenant_id = $2")
            .bind(run_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_run(row)
    }

    pub async fn get_by_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(
            "select * from dpp.runs where tenant_id = $1 and idempotency_key = $2",
        )
        .bind(tenant_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_run).transpose()
    }

    /// The only mutation primitive. Binds `run_id`,
    /// `tenant_id`, and `expected_version` as the mandatory predicates, folds
    /// in whatever extra `require` predicates the caller supplied, and
    /// atomically bumps `version` and `updated_at` alongside the patch
    /// columns. Zero rows updated is a normal, expected outcome (lost race or
    /// stale caller view) — callers must not treat it as an error.
    pub async fn update_if(
        &self,
        run_id: Uuid,
        tenant_id: &str,
        expected_version: i64,
        set: RunPatch,
        require: RunRequire,
    ) -> Result<bool, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("update dpp.runs set ");

        let mut first = true;
        for (col, value) in &set.cols {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push(format!("{col} = "));
            push_value(&mut qb, value);
        }
        if set.completed_at_now {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push("completed_at = now()");
        }
        if !first {
            qb.push(", ");
        }
        qb.push("version = version + 1, updated_at = now() where run_id = ");
        qb.push_bind(run_id);
        qb.push(" and tenant_id = ");
        qb.push_bind(tenant_id.to_string());
        qb.push(" and version = ");
        qb.push_bind(expected_version);

        for predicate in &require.predicates {
            qb.push(" and ");
            match predicate {
                Predicate::Eq(col, value) => {
                    qb.push(format!("{col} = "));
                    push_value(&mut qb, value);
                }
                Predicate::IsNull(col) => {
                    qb.push(format!("{col} is null"));
                }
                Predicate::Raw(fragment) => {
                    qb.push(*fragment);
                }
            }
        }

        let result = qb.build().execute(&self.pool).await?;
        match result.rows_affected() {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(StoreError::RowDecode(format!(
                "CAS update on run {run_id} touched {n} rows, expected 0 or 1"
            ))),
        }
    }

    /// Convenience wrapper around `update_if` for the worker's dequeue step
    ///: `QUEUED` -> `PROCESSING` with a fresh lease.
    pub async fn claim_for_processing(
        &self,
        run_id: Uuid,
        tenant_id: &str,
        expected_version: i64,
        lease_token: String,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.update_if(
            run_id,
            tenant_id,
            expected_version,
            RunPatch::new()
                .status(RunStatus::Processing)
                .lease(lease_token, lease_expires_at),
            RunRequire::new().status(RunStatus::Queued),
        )
        .await
    }

    /// Runs whose lease has expired and finalize was never claimed — Reaper
    /// targets.
    pub async fn list_expired_leases(&self, limit: i64) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            select * from dpp.runs
            where status = 'PROCESSING'
              and finalize_stage is null
              and lease_expires_at < now()
            order by lease_expires_at
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_run).collect()
    }

    /// Runs stuck in `CLAIMED` past `threshold` — Reconciler targets.
    pub async fn list_stuck_claimed(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"
            select * from dpp.runs
            where status = 'PROCESSING'
              and finalize_stage = 'CLAIMED'
              and finalize_claimed_at < $1
            order by finalize_claimed_at
            limit $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_run).collect()
    }

    /// Sum of `actual_cost_micros` across every `SETTLED` run, for the
    /// Reconciler's standing partial audit against the ledger's live
    /// reservation total.
    pub async fn sum_settled(&self) -> Result<(i64, i64), StoreError> {
        let row = sqlx::query(
            "select coalesce(sum(actual_cost_micros), 0), count(*) from dpp.runs where money_state = $1",
        )
        .bind(MoneyState::Settled.as_db_str())
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get(0)?;
        let count: i64 = row.try_get(1)?;
        Ok((total, count))
    }
}

fn push_value(qb: &mut QueryBuilder<Postgres>, value: &SqlValue) {
    match value {
        SqlValue::Text(v) => {
            qb.push_bind(v.clone());
        }
        SqlValue::OptText(v) => {
            qb.push_bind(v.clone());
        }
        SqlValue::I64(v) => {
            qb.push_bind(*v);
        }
        SqlValue::OptI64(v) => {
            qb.push_bind(*v);
        }
        SqlValue::Timestamptz(v) => {
            qb.push_bind(*v);
        }
        SqlValue::OptTimestamptz(v) => {
            qb.push_bind(*v);
        }
    }
}

fn row_to_run(row: PgRow) -> Result<Run, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| StoreError::RowDecode(format!("unknown status {status_str:?}")))?;

    let money_state_str: String = row.try_get("money_state")?;
    let money_state = MoneyState::parse(&money_state_str)
        .ok_or_else(|| StoreError::RowDecode(format!("unknown money_state {money_state_str:?}")))?;

    let finalize_stage = match row.try_get::<Option<String>, _>("finalize_stage")? {
        Some(s) => Some(
            FinalizeStage::parse(&s)
                .ok_or_else(|| StoreError::RowDecode(format!("unknown finalize_stage {s:?}")))?,
        ),
        None => None,
    };

    Ok(Run {
        run_id: row.try_get("run_id")?,
        tenant_id: row.try_get("tenant_id")?,
        pack_type: row.try_get("pack_type")?,
        status,
        money_state,
        version: row.try_get("version")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payload_hash: row.try_get("payload_hash")?,
        reservation_max_cost_micros: row.try_get("reservation_max_cost_micros")?,
        actual_cost_micros: row.try_get("actual_cost_micros")?,
        minimum_fee_micros: row.try_get("minimum_fee_micros")?,
        timebox_sec: row.try_get("timebox_sec")?,
        min_reliability_score: row.try_get("min_reliability_score")?,
        inputs: row.try_get("inputs")?,
        lease_token: row.try_get("lease_token")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        finalize_token: row.try_get("finalize_token")?,
        finalize_stage,
        finalize_claimed_at: row.try_get("finalize_claimed_at")?,
        result_bucket: row.try_get("result_bucket")?,
        result_key: row.try_get("result_key")?,
        result_sha256: row.try_get("result_sha256")?,
        retention_until: row.try_get("retention_until")?,
        last_error_reason_code: row.try_get("last_error_reason_code")?,
        last_error_detail: row.try_get("last_error_detail")?,
        trace_id: row.try_get("trace_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Reference into a `ReasonCode` for callers that want the typed enum rather
/// than the raw string stored on the row.
pub fn parse_reason_code(run: &Run) -> Option<ReasonCode> {
    match run.last_error_reason_code.as_deref() {
        Some("WORKER_TIMEOUT") => Some(ReasonCode::WorkerTimeout),
        Some("PACK_EXECUTION_FAILED") => Some(ReasonCode::PackExecutionFailed),
        Some("QUEUE_ENQUEUE_FAILED") => Some(ReasonCode::QueueEnqueueFailed),
        Some("WORKER_CRASH_DURING_FINALIZE") => Some(ReasonCode::WorkerCrashDuringFinalize),
        Some("NO_SETTLEMENT_RECEIPT") => Some(ReasonCode::NoSettlementReceipt),
        _ => None,
    }
}
