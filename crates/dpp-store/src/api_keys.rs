//! Bearer API key lookup for admission auth. Key issuance and
//! rotation are out of scope; this is the read path the HTTP edge needs.

use sqlx::{PgPool, Row};

use crate::errors::StoreError;

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub tenant_id: String,
    pub secret_hash: String,
    pub revoked: bool,
}

#[derive(Clone)]
pub struct ApiKeyStore {
    pool: PgPool,
}

impl ApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row = sqlx::query("select tenant_id, secret_hash, revoked from dpp.api_keys where key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(ApiKeyRecord {
            tenant_id: row.try_get("tenant_id")?,
            secret_hash: row.try_get("secret_hash")?,
            revoked: row.try_get("revoked")?,
        }))
    }
}
