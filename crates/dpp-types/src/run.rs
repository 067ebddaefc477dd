//! The authoritative `Run` record and its lifecycle enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "QUEUED" => Self::Queued,
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "TIMED_OUT" => Self::TimedOut,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyState {
    None,
    Reserved,
    Settled,
    Refunded,
    AuditRequired,
}

impl MoneyState {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Reserved => "RESERVED",
            Self::Settled => "SETTLED",
            Self::Refunded => "REFUNDED",
            Self::AuditRequired => "AUDIT_REQUIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "NONE" => Self::None,
            "RESERVED" => Self::Reserved,
            "SETTLED" => Self::Settled,
            "REFUNDED" => Self::Refunded,
            "AUDIT_REQUIRED" => Self::AuditRequired,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStage {
    Claimed,
    Committed,
}

impl FinalizeStage {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Claimed => "CLAIMED",
            Self::Committed => "COMMITTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CLAIMED" => Self::Claimed,
            "COMMITTED" => Self::Committed,
            _ => return None,
        })
    }
}

/// Reason codes surfaced on failed/timed-out/audit-required runs.
/// Never user-facing prose; always a stable, matchable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    WorkerTimeout,
    PackExecutionFailed,
    QueueEnqueueFailed,
    WorkerCrashDuringFinalize,
    NoSettlementReceipt,
    InsufficientBudget,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkerTimeout => "WORKER_TIMEOUT",
            Self::PackExecutionFailed => "PACK_EXECUTION_FAILED",
            Self::QueueEnqueueFailed => "QUEUE_ENQUEUE_FAILED",
            Self::WorkerCrashDuringFinalize => "WORKER_CRASH_DURING_FINALIZE",
            Self::NoSettlementReceipt => "NO_SETTLEMENT_RECEIPT",
            Self::InsufficientBudget => "INSUFFICIENT_BUDGET",
        }
    }
}

/// Absolute floor under which a configured `MIN_RESERVATION_MICROS` would let
/// minimum-fee logic underflow. `dpp-config` rejects any configured value
/// below this at load time; it is never itself the admission-time floor —
/// `PlanGuard` enforces whatever `AppConfig.min_reservation` was loaded with.
pub const PLATFORM_MIN_RESERVATION_MICROS: i64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub pack_type: String,
    pub status: RunStatus,
    pub money_state: MoneyState,
    pub version: i64,
    pub idempotency_key: Option<String>,
    pub payload_hash: String,

    pub reservation_max_cost_micros: i64,
    pub actual_cost_micros: Option<i64>,
    pub minimum_fee_micros: i64,

    pub timebox_sec: i32,
    pub min_reliability_score: f64,
    pub inputs: serde_json::Value,

    pub lease_token: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub finalize_token: Option<String>,
    pub finalize_stage: Option<FinalizeStage>,
    pub finalize_claimed_at: Option<DateTime<Utc>>,

    pub result_bucket: Option<String>,
    pub result_key: Option<String>,
    pub result_sha256: Option<String>,

    pub retention_until: Option<DateTime<Utc>>,
    pub last_error_reason_code: Option<String>,
    pub last_error_detail: Option<String>,
    pub trace_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn reservation(&self) -> Money {
        Money::from_micros(self.reservation_max_cost_micros)
    }

    pub fn minimum_fee(&self) -> Money {
        Money::from_micros(self.minimum_fee_micros)
    }
}

/// `clamp(max(FLOOR, 2% * reserved), 0, min(reserved, CEILING))` — the
/// stricter form from so `minimum_fee` can never
/// exceed the reservation it is carved from.
pub fn compute_minimum_fee(reserved: Money, floor: Money, ceiling: Money) -> Money {
    let two_pct = Money::from_micros(reserved.micros() / 50); // 2% == /50
    let floored = if two_pct > floor { two_pct } else { floor };
    let upper = if reserved < ceiling { reserved } else { ceiling };
    floored.clamp(Money::ZERO, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_fee_never_exceeds_reservation() {
        let floor = Money::from_micros(5_000);
        let ceiling = Money::from_micros(100_000);

        // Reservation smaller than the floor: fee must still clamp to reservation.
        let tiny = Money::from_micros(1_000);
        assert_eq!(compute_minimum_fee(tiny, floor, ceiling), tiny);

        // Typical case: 2% dominates and is below ceiling.
        let mid = Money::from_micros(200_000);
        assert_eq!(compute_minimum_fee(mid, floor, ceiling), Money::from_micros(4_000).max(floor));

        // Large reservation: fee caps at ceiling.
        let big = Money::from_micros(50_000_000);
        assert_eq!(compute_minimum_fee(big, floor, ceiling), ceiling);
    }

    #[test]
    fn run_status_db_round_trips() {
        for s in [
            RunStatus::Queued,
            RunStatus::Processing,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::TimedOut,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(s.as_db_str()), Some(s));
        }
    }

    #[test]
    fn terminal_statuses_are_classified_correctly() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::TimedOut.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Processing.is_terminal());
    }
}
