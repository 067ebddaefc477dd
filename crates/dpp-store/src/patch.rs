//! Typed building blocks for `RunStore::update_if`: a `set`
//! patch and a `require` predicate set, both assembled into one dynamic
//! `UPDATE ... WHERE ...` via `sqlx::QueryBuilder`.

use chrono::{DateTime, Utc};
use dpp_types::{FinalizeStage, MoneyState, RunStatus};

#[derive(Debug, Clone)]
pub(crate) enum SqlValue {
    Text(String),
    OptText(Option<String>),
    I64(i64),
    OptI64(Option<i64>),
    Timestamptz(DateTime<Utc>),
    OptTimestamptz(Option<DateTime<Utc>>),
}

/// Columns to set on a successful CAS, plus the implicit `version += 1` and
/// `updated_at = now()` that every mutation carries.
#[derive(Debug, Default, Clone)]
pub struct RunPatch {
    pub(crate) cols: Vec<(&'static str, SqlValue)>,
    pub(crate) completed_at_now: bool,
}

impl RunPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.cols
            .push(("status", SqlValue::Text(status.as_db_str().to_string())));
        self
    }

    pub fn money_state(mut self, state: MoneyState) -> Self {
        self.cols
            .push(("money_state", SqlValue::Text(state.as_db_str().to_string())));
        self
    }

    pub fn lease(mut self, token: String, expires_at: DateTime<Utc>) -> Self {
        self.cols.push(("lease_token", SqlValue::OptText(Some(token))));
        self.cols
            .push(("lease_expires_at", SqlValue::OptTimestamptz(Some(expires_at))));
        self
    }

    pub fn finalize_claim(mut self, token: String, claimed_at: DateTime<Utc>) -> Self {
        self.cols
            .push(("finalize_token", SqlValue::OptText(Some(token))));
        self.cols.push((
            "finalize_stage",
            SqlValue::OptText(Some(FinalizeStage::Claimed.as_db_str().to_string())),
        ));
        self.cols.push((
            "finalize_claimed_at",
            SqlValue::OptTimestamptz(Some(claimed_at)),
        ));
        self
    }

    pub fn finalize_committed(mut self) -> Self {
        self.cols.push((
            "finalize_stage",
            SqlValue::OptText(Some(FinalizeStage::Committed.as_db_str().to_string())),
        ));
        self
    }

    pub fn actual_cost_micros(mut self, micros: i64) -> Self {
        self.cols
            .push(("actual_cost_micros", SqlValue::OptI64(Some(micros))));
        self
    }

    pub fn result_pointers(mut self, bucket: String, key: String, sha256: String) -> Self {
        self.cols.push(("result_bucket", SqlValue::OptText(Some(bucket))));
        self.cols.push(("result_key", SqlValue::OptText(Some(key))));
        self.cols
            .push(("result_sha256", SqlValue::OptText(Some(sha256))));
        self
    }

    pub fn error(mut self, reason_code: &str, detail: impl Into<String>) -> Self {
        self.cols.push((
            "last_error_reason_code",
            SqlValue::OptText(Some(reason_code.to_string())),
        ));
        self.cols
            .push(("last_error_detail", SqlValue::OptText(Some(detail.into()))));
        self
    }

    pub fn completed_now(mut self) -> Self {
        self.completed_at_now = true;
        self
    }

    pub fn retention_until(mut self, at: DateTime<Utc>) -> Self {
        self.cols
            .push(("retention_until", SqlValue::OptTimestamptz(Some(at))));
        self
    }

    /// Folds another patch's columns into this one. Used to combine the
    /// common terminal columns (status/money_state/actual_cost) with the
    /// outcome-specific ones (result pointers or error fields).
    pub fn merge(mut self, other: RunPatch) -> Self {
        self.cols.extend(other.cols);
        self.completed_at_now = self.completed_at_now || other.completed_at_now;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Eq(&'static str, SqlValue),
    IsNull(&'static str),
    Raw(&'static str),
}

/// Extra equality/IS-NULL/raw predicates a CAS must satisfy in addition to
/// `version = expected_version`.
#[derive(Debug, Default, Clone)]
pub struct RunRequire {
    pub(crate) predicates: Vec<Predicate>,
}

impl RunRequire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.predicates
            .push(Predicate::Eq("status", SqlValue::Text(status.as_db_str().to_string())));
        self
    }

    pub fn money_state(mut self, state: MoneyState) -> Self {
        self.predicates.push(Predicate::Eq(
            "money_state",
            SqlValue::Text(state.as_db_str().to_string()),
        ));
        self
    }

    pub fn finalize_stage_is_null(mut self) -> Self {
        self.predicates.push(Predicate::IsNull("finalize_stage"));
        self
    }

    pub fn finalize_stage(mut self, stage: FinalizeStage) -> Self {
        self.predicates.push(Predicate::Eq(
            "finalize_stage",
            SqlValue::Text(stage.as_db_str().to_string()),
        ));
        self
    }

    pub fn lease_token(mut self, token: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::Eq("lease_token", SqlValue::Text(token.into())));
        self
    }

    pub fn finalize_token(mut self, token: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::Eq("finalize_token", SqlValue::Text(token.into())));
        self
    }

    /// Temporal identity predicate for the Reaper path:
    /// `lease_expires_at < now()`.
    pub fn lease_expired(mut self) -> Self {
        self.predicates.push(Predicate::Raw("lease_expires_at < now()"));
        self
    }
}
