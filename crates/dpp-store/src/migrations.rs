use anyhow::{Context, Result};
use sqlx::{Acquire, Executor, PgPool, Postgres};

const MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("../migrations/0001_schema.sql")),
    (2, include_str!("../migrations/0002_runs.sql")),
    (3, include_str!("../migrations/0003_usage_daily.sql")),
    (4, include_str!("../migrations/0004_plans.sql")),
    (5, include_str!("../migrations/0005_job_queue.sql")),
    (6, include_str!("../migrations/0006_api_keys.sql")),
];

/// Runs every pending migration, serialized across concurrently-starting
/// processes with a Postgres advisory lock held on a single connection for
/// the whole sequence: advisory locks are per-session, so acquire/run/release
/// must share one connection end to end.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    const MIGRATION_LOCK_KEY: i64 = 0x4450505F4C4F434B; // "DPP_LOCK"
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for dpp migrations")?;

    sqlx::query("select pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .context("acquire dpp migration lock")?;

    let res: Result<()> = async {
        exec_sql_batch(&mut *conn, MIGRATIONS[0].1)
            .await
            .context("apply dpp schema bootstrap (v1)")?;

        for (version, sql) in MIGRATIONS {
            if *version == 1 {
                continue;
            }
            let applied: Option<i32> =
                sqlx::query_scalar("select version from dpp.schema_migrations where version = $1")
                    .bind(*version)
                    .fetch_optional(&mut *conn)
                    .await
                    .context("read dpp.schema_migrations")?;

            if applied.is_some() {
                continue;
            }

            let mut tx = conn.begin().await.context("begin migration tx")?;
            exec_sql_batch(&mut *tx, sql)
                .await
                .with_context(|| format!("apply dpp migration v{version}"))?;
            sqlx::query("insert into dpp.schema_migrations(version) values ($1)")
                .bind(*version)
                .execute(&mut *tx)
                .await
                .context("insert dpp.schema_migrations")?;
            tx.commit().await.context("commit migration tx")?;
        }
        Ok(())
    }
    .await;

    let _ = sqlx::query("select pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await;

    res
}

async fn exec_sql_batch<E>(exec: &mut E, sql: &str) -> Result<()>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    for stmt in sql.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(&mut *exec).await.with_context(|| {
            format!(
                "execute migration statement: {}",
                s.lines().next().unwrap_or("")
            )
        })?;
    }
    Ok(())
}
