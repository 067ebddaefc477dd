//! Bearer API key authentication: `sk_{key_id}_{secret}`,
//! hash comparison, stealth 401 for any mismatch — revoked key, unknown
//! key, and bad secret are indistinguishable to the caller.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

pub struct TenantId(pub String);

impl FromRequestParts<Arc<AppState>> for TenantId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
        let (key_id, secret) = parse_api_key(token).ok_or(ApiError::Unauthorized)?;

        let record = state
            .api_keys
            .lookup(key_id)
            .await
            .map_err(|e| ApiError::Internal(e.into()))?
            .ok_or(ApiError::Unauthorized)?;

        if record.revoked {
            return Err(ApiError::Unauthorized);
        }

        let candidate_hash = hex::encode(Sha256::digest(secret.as_bytes()));
        if !constant_time_eq(candidate_hash.as_bytes(), record.secret_hash.as_bytes()) {
            return Err(ApiError::Unauthorized);
        }

        Ok(TenantId(record.tenant_id))
    }
}

/// `sk_{key_id}_{secret}` — `key_id` is assumed underscore-free so the
/// first split yields the right boundary.
fn parse_api_key(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_prefix("sk_")?;
    rest.split_once('_')
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
