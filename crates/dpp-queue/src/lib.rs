//! An at-least-once job queue backing admission→worker handoff, backed by
//! `dpp.job_queue` / `dpp.job_queue_dlq`.
//!
//! Uses a `SKIP LOCKED` lease idiom: a CTE selects and locks one visible,
//! non-deleted row, and an `UPDATE ... FROM cte` claims it in the same
//! statement, with visibility-timeout + delete/ack + DLQ semantics on top.

use std::time::Duration;

use chrono::Utc;
use dpp_types::JobMessage;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: i64,
    pub job: JobMessage,
    pub receive_count: i32,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, job: &JobMessage) -> Result<()> {
        sqlx::query(
            r#"
            insert into dpp.job_queue (
                run_id, tenant_id, pack_type, schema_version, trace_id, enqueued_at, visible_at
            ) values ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(job.run_id)
        .bind(&job.tenant_id)
        .bind(&job.pack_type)
        .bind(job.schema_version as i32)
        .bind(&job.trace_id)
        .bind(job.enqueued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Receives the oldest visible message and hides it for `visibility`. A
    /// message whose `receive_count` would exceed `max_receive_count` is
    /// moved to the DLQ instead of being handed out, and the next visible
    /// message is tried (bounded by one extra round-trip per DLQ move, which
    /// is rare by construction).
    pub async fn receive(
        &self,
        visibility: Duration,
        max_receive_count: i32,
    ) -> Result<Option<ReceivedMessage>> {
        loop {
            let row = sqlx::query(
                r#"
                with cte as (
                    select message_id from dpp.job_queue
                    where not deleted and visible_at <= now()
                    order by visible_at
                    limit 1
                    for update skip locked
                )
                update dpp.job_queue q set
                    visible_at = now() + make_interval(secs => $1),
                    receive_count = q.receive_count + 1
                from cte
                where q.message_id = cte.message_id
                returning q.message_id, q.run_id, q.tenant_id, q.pack_type,
                          q.schema_version, q.trace_id, q.enqueued_at, q.receive_count
                "#,
            )
            .bind(visibility.as_secs() as f64)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { return Ok(None) };

            let message_id: i64 = row.try_get("message_id")?;
            let receive_count: i32 = row.try_get("receive_count")?;

            if receive_count > max_receive_count {
                self.move_to_dlq(&row, message_id, receive_count).await?;
                continue;
            }

            let job = JobMessage {
                run_id: row.try_get("run_id")?,
                tenant_id: row.try_get("tenant_id")?,
                pack_type: row.try_get("pack_type")?,
                enqueued_at: row.try_get("enqueued_at")?,
                schema_version: row.try_get::<i32, _>("schema_version")? as u32,
                trace_id: row.try_get("trace_id")?,
            };

            return Ok(Some(ReceivedMessage {
                message_id,
                job,
                receive_count,
            }));
        }
    }

    async fn move_to_dlq(&self, row: &sqlx::postgres::PgRow, message_id: i64, receive_count: i32) -> Result<()> {
        tracing::warn!(message_id, receive_count, "moving job to DLQ: retries exhausted");
        let run_id: uuid::Uuid = row.try_get("run_id")?;
        let tenant_id: String = row.try_get("tenant_id")?;
        let pack_type: String = row.try_get("pack_type")?;
        let trace_id: Option<String> = row.try_get("trace_id")?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            insert into dpp.job_queue_dlq (message_id, run_id, tenant_id, pack_type, trace_id, receive_count, moved_at)
            values ($1, $2, $3, $4, $5, $6, now())
            on conflict (message_id) do nothing
            "#,
        )
        .bind(message_id)
        .bind(run_id)
        .bind(&tenant_id)
        .bind(&pack_type)
        .bind(&trace_id)
        .bind(receive_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query("update dpp.job_queue set deleted = true where message_id = $1")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Extends a message's visibility window without incrementing
    /// `receive_count`.
    pub async fn extend_visibility(&self, message_id: i64, visibility: Duration) -> Result<()> {
        sqlx::query(
            "update dpp.job_queue set visible_at = now() + make_interval(secs => $1) where message_id = $2 and not deleted",
        )
        .bind(visibility.as_secs() as f64)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Acknowledges/deletes a message.
    pub async fn delete(&self, message_id: i64) -> Result<()> {
        sqlx::query("update dpp.job_queue set deleted = true where message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Test/ops helper: timestamp of "now" in the DB, used to assert
    /// visibility windows moved as expected.
    pub async fn db_now(&self) -> Result<chrono::DateTime<Utc>> {
        let row = sqlx::query("select now() as now").fetch_one(&self.pool).await?;
        Ok(row.try_get("now")?)
    }
}
