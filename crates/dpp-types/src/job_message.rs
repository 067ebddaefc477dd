//! The message enqueued at admission and consumed by workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const JOB_MESSAGE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub pack_type: String,
    pub enqueued_at: DateTime<Utc>,
    pub schema_version: u32,
    pub trace_id: Option<String>,
}

impl JobMessage {
    pub fn new(run_id: Uuid, tenant_id: String, pack_type: String, trace_id: Option<String>) -> Self {
        Self {
            run_id,
            tenant_id,
            pack_type,
            enqueued_at: Utc::now(),
            schema_version: JOB_MESSAGE_SCHEMA_VERSION,
            trace_id,
        }
    }
}
