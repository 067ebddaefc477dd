//! PlanGuard: the admission-time policy gate.
//!
//! Every check here maps to a structured, never-exceptional outcome the
//! HTTP edge turns into the matching RFC 9457 problem.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dpp_ledger::{LedgerOps, RateLimitOutcome};
use dpp_store::PlanStore;
use dpp_types::Money;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlanViolation {
    #[error("tenant has no active plan")]
    NoActivePlan,
    #[error("pack type {0:?} is not permitted by this tenant's plan")]
    PackNotAllowed(String),
    #[error("requested reservation exceeds the plan's per-pack ceiling of {ceiling_micros} micros")]
    ReservationExceedsCeiling { ceiling_micros: i64 },
    #[error("requested reservation is below the platform floor of {floor_micros} micros")]
    ReservationBelowFloor { floor_micros: i64 },
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { limit: u64, retry_after: Duration },
    #[error("platform is paused until {until}")]
    GlobalPause {
        reason: Option<String>,
        until: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Submit,
    Poll,
}

impl RateLimitScope {
    fn key_prefix(self) -> &'static str {
        match self {
            Self::Submit => "ratelimit:submit",
            Self::Poll => "ratelimit:poll",
        }
    }
}

#[derive(Clone)]
pub struct PlanGuard {
    plans: PlanStore,
    ledger: LedgerOps,
    min_reservation: Money,
}

impl PlanGuard {
    pub fn new(plans: PlanStore, ledger: LedgerOps, min_reservation: Money) -> Self {
        Self { plans, ledger, min_reservation }
    }

    /// Gate 0, checked ahead of everything else: a paused platform rejects
    /// every admission regardless of plan standing.
    pub async fn check_not_paused(&self) -> Result<(), PlanViolation> {
        if let Some((until, reason)) = self.plans.active_global_pause().await.map_err(|e| {
            tracing::error!(error = %e, "failed to read global pause state");
            PlanViolation::NoActivePlan
        })? {
            return Err(PlanViolation::GlobalPause { reason, until });
        }
        Ok(())
    }

    /// Pack-type allow-list, per-pack ceiling, and minimum-reservation-floor
    /// checks. Does not touch the rate limiter.
    pub async fn check_admission(
        &self,
        tenant_id: &str,
        pack_type: &str,
        requested_max_cost: Money,
    ) -> Result<(), PlanViolation> {
        if requested_max_cost.micros() < self.min_reservation.micros() {
            return Err(PlanViolation::ReservationBelowFloor {
                floor_micros: self.min_reservation.micros(),
            });
        }

        let plan = self
            .plans
            .plan_for_tenant(tenant_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, tenant_id, "failed to load tenant plan");
                PlanViolation::NoActivePlan
            })?
            .ok_or(PlanViolation::NoActivePlan)?;

        if !plan.allowed_pack_types.iter().any(|p| p == pack_type) {
            return Err(PlanViolation::PackNotAllowed(pack_type.to_string()));
        }

        if let Some(ceiling) = plan.pack_ceiling_micros(pack_type) {
            if requested_max_cost.micros() > ceiling {
                return Err(PlanViolation::ReservationExceedsCeiling {
                    ceiling_micros: ceiling,
                });
            }
        }

        Ok(())
    }

    /// Atomic INCR-first rate counter: the increment always
    /// happens before any limit check, so a racing burst can never slip
    /// through a check-then-set gap. Returns `(limit, count_after_increment)`
    /// on success so the HTTP edge can derive `X-RateLimit-Remaining`.
    pub async fn check_rate_limit(
        &self,
        scope: RateLimitScope,
        tenant_id: &str,
    ) -> Result<RateLimitStatus, PlanViolation> {
        let plan = self
            .plans
            .plan_for_tenant(tenant_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, tenant_id, "failed to load tenant plan for rate limit");
                PlanViolation::NoActivePlan
            })?
            .ok_or(PlanViolation::NoActivePlan)?;

        let limit = match scope {
            RateLimitScope::Submit => plan.submit_rate_limit_per_min,
            RateLimitScope::Poll => plan.poll_rate_limit_per_min,
        };

        let key = format!("{}:{tenant_id}", scope.key_prefix());
        let outcome = self
            .ledger
            .rate_limit_incr(&key, limit.max(0) as u64, Duration::from_secs(60))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, tenant_id, "rate limiter call failed");
                PlanViolation::NoActivePlan
            })?;

        match outcome {
            RateLimitOutcome::Allowed { limit, count } => Ok(RateLimitStatus { limit, count }),
            RateLimitOutcome::Limited { limit, retry_after } => {
                Err(PlanViolation::RateLimitExceeded { limit, retry_after })
            }
        }
    }
}

/// Post-increment rate counter state, enough to derive
/// `X-RateLimit-{Limit,Remaining}` at the HTTP edge.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub count: u64,
}

impl RateLimitStatus {
    pub fn remaining(self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_scope_keys_are_distinct() {
        assert_ne!(
            RateLimitScope::Submit.key_prefix(),
            RateLimitScope::Poll.key_prefix()
        );
    }
}
