//! Artifact upload/retrieval. Object key is deterministic and
//! content-addressed by `run_id`, so a retried upload after a Worker crash is
//! safe to repeat before a finalize claim is taken.

mod breaker;

pub use breaker::UploadBreaker;

use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("upload circuit breaker is open, backing off")]
    CircuitOpen,
    #[error(transparent)]
    Sdk(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// The canonical JSON envelope written to the artifact key.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub pack_type: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub reserved_usd: String,
    pub minimum_fee_usd: String,
    pub actual_cost_usd: Option<String>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ResultPointer {
    pub bucket: String,
    pub key: String,
    pub sha256: String,
}

pub struct ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    breaker: UploadBreaker,
}

impl ArtifactStore {
    pub async fn new(bucket: String, region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&config);
        if let Some(endpoint_url) = endpoint_url {
            s3_builder = s3_builder.endpoint_url(endpoint_url).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_builder.build()),
            bucket,
            breaker: UploadBreaker::default(),
        }
    }

    /// `dpp/{tenant_id}/{YYYY}/{MM}/{DD}/{run_id}/pack_envelope.json`.
    pub fn artifact_key(tenant_id: &str, run_id: Uuid, as_of: DateTime<Utc>) -> String {
        format!(
            "dpp/{tenant_id}/{:04}/{:02}/{:02}/{run_id}/pack_envelope.json",
            as_of.format("%Y").to_string().parse::<u32>().unwrap_or(0),
            as_of.format("%m").to_string().parse::<u32>().unwrap_or(0),
            as_of.format("%d").to_string().parse::<u32>().unwrap_or(0),
        )
    }

    /// Durably writes the pack envelope. Object metadata carries
    /// `actual-cost-micros` so the Reconciler can cross-check without
    /// parsing the body.
    pub async fn upload_envelope(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        envelope: &Envelope,
        actual_cost_micros: i64,
    ) -> Result<ResultPointer> {
        if self.breaker.is_open() {
            return Err(ObjectStoreError::CircuitOpen);
        }

        let key = Self::artifact_key(tenant_id, run_id, envelope.timestamp);
        let body = serde_json::to_vec(envelope)
            .map_err(|e| ObjectStoreError::Sdk(anyhow::anyhow!("serialize envelope: {e}")))?;
        let sha256 = hex::encode(Sha256::digest(&body));

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body.into())
            .content_type("application/json")
            .metadata("actual-cost-micros", actual_cost_micros.to_string())
            .send()
            .await;

        match result {
            Ok(_) => {
                self.breaker.record_success();
                Ok(ResultPointer {
                    bucket: self.bucket.clone(),
                    key,
                    sha256,
                })
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(ObjectStoreError::Sdk(anyhow::anyhow!("put_object: {e}")))
            }
        }
    }

    /// Returns `true` if the artifact exists, without downloading it — used
    /// by the Reconciler's Case A decision.
    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(ObjectStoreError::Sdk(anyhow::anyhow!("head_object: {e}"))),
        }
    }

    /// Time-limited presigned GET URL.
    pub async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ObjectStoreError::Sdk(anyhow::anyhow!("presign config: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| ObjectStoreError::Sdk(anyhow::anyhow!("presign: {e}")))?;
        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_key_matches_the_deterministic_layout() {
        let run_id = Uuid::nil();
        let ts = DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let key = ArtifactStore::artifact_key("tenant-a", run_id, ts);
        assert_eq!(
            key,
            format!("dpp/tenant-a/2026/07/26/{run_id}/pack_envelope.json")
        );
    }
}
