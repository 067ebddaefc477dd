//! LedgerOps: the atomic money engine.
//!
//! Three mutators (`reserve`, `settle`, `refund_full`), each a single
//! server-side Lua script so the whole operation is indivisible from every
//! other client's point of view, plus three plain-read inspectors.
//!
//! Every call acquires its own connection rather than reusing a shared
//! handle: "any connection/session to the durable store is
//! never shared across concurrent tasks."

mod errors;
mod scripts;

pub use errors::LedgerError;

use std::time::Duration;

use dpp_types::{Money, RefundOutcome, ReserveOutcome, SettleOutcome};
use redis::AsyncCommands;
use redis::Client;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub struct Reservation {
    pub tenant_id: String,
    pub amount: Money,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub tenant_id: String,
    pub charged: Money,
    pub settled_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { limit: u64, count: u64 },
    Limited { limit: u64, retry_after: Duration },
}

#[derive(Clone)]
pub struct LedgerOps {
    client: Client,
}

fn balance_key(tenant_id: &str) -> String {
    format!("balance:{tenant_id}")
}

fn reserve_key(run_id: &str) -> String {
    format!("reserve:{run_id}")
}

fn receipt_key(run_id: &str) -> String {
    format!("receipt:{run_id}")
}

impl LedgerOps {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// `reserve(tenant, run, amount)`
    pub async fn reserve(
        &self,
        tenant_id: &str,
        run_id: &str,
        amount: Money,
        ttl: Duration,
    ) -> Result<ReserveOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now_ms = now_millis();
        let reply: Vec<String> = scripts::RESERVE
            .key(balance_key(tenant_id))
            .key(reserve_key(run_id))
            .arg(amount.micros())
            .arg(now_ms)
            .arg(ttl.as_secs())
            .arg(tenant_id)
            .invoke_async(&mut conn)
            .await?;

        match reply.first().map(String::as_str) {
            Some("OK") => {
                let balance = parse_micros(&reply, 1)?;
                Ok(ReserveOutcome::Ok {
                    new_balance: Money::from_micros(balance),
                })
            }
            Some("ERR_INSUFFICIENT") => {
                let balance = parse_micros(&reply, 1)?;
                Ok(ReserveOutcome::Insufficient {
                    balance: Money::from_micros(balance),
                })
            }
            Some("ERR_ALREADY_RESERVED") => Ok(ReserveOutcome::AlreadyReserved),
            _ => Err(LedgerError::UnexpectedReply(format!("{reply:?}"))),
        }
    }

    /// `settle(tenant, run, requested_charge)` The script
    /// clamps `requested_charge` into `[0, reserved]` server-side; a rogue or
    /// overflowing caller can never drive the balance negative.
    pub async fn settle(
        &self,
        tenant_id: &str,
        run_id: &str,
        requested_charge: Money,
    ) -> Result<SettleOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now_ms = now_millis();
        let reply: Vec<String> = scripts::SETTLE
            .key(balance_key(tenant_id))
            .key(reserve_key(run_id))
            .key(receipt_key(run_id))
            .arg(requested_charge.micros())
            .arg(now_ms)
            .arg(tenant_id)
            .invoke_async(&mut conn)
            .await?;

        match reply.first().map(String::as_str) {
            Some("OK") => {
                let charge = parse_micros(&reply, 1)?;
                let refund = parse_micros(&reply, 2)?;
                let balance = parse_micros(&reply, 3)?;
                Ok(SettleOutcome::Ok {
                    charge: Money::from_micros(charge),
                    refund: Money::from_micros(refund),
                    new_balance: Money::from_micros(balance),
                })
            }
            Some("ERR_NO_RESERVE") => Ok(SettleOutcome::NoReserve),
            _ => Err(LedgerError::UnexpectedReply(format!("{reply:?}"))),
        }
    }

    /// `refund_full(tenant, run)` Used to compensate an
    /// unconsumed reservation; writes no receipt.
    pub async fn refund_full(&self, tenant_id: &str, run_id: &str) -> Result<RefundOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Vec<String> = scripts::REFUND_FULL
            .key(balance_key(tenant_id))
            .key(reserve_key(run_id))
            .invoke_async(&mut conn)
            .await?;

        match reply.first().map(String::as_str) {
            Some("OK") => {
                let refunded = parse_micros(&reply, 1)?;
                let balance = parse_micros(&reply, 2)?;
                Ok(RefundOutcome::Ok {
                    refunded: Money::from_micros(refunded),
                    new_balance: Money::from_micros(balance),
                })
            }
            Some("ERR_NO_RESERVE") => Ok(RefundOutcome::NoReserve),
            _ => Err(LedgerError::UnexpectedReply(format!("{reply:?}"))),
        }
    }

    pub async fn get_balance(&self, tenant_id: &str) -> Result<Money> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(balance_key(tenant_id)).await?;
        Ok(Money::from_micros(raw.and_then(|s| s.parse().ok()).unwrap_or(0)))
    }

    pub async fn get_reservation(&self, run_id: &str) -> Result<Option<Reservation>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let map: std::collections::HashMap<String, String> =
            conn.hgetall(reserve_key(run_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Reservation {
            tenant_id: map.get("tenant").cloned().unwrap_or_default(),
            amount: Money::from_micros(
                map.get("amount").and_then(|s| s.parse().ok()).unwrap_or(0),
            ),
            created_at_ms: map
                .get("created_at_ms")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }))
    }

    pub async fn get_receipt(&self, run_id: &str) -> Result<Option<Receipt>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let map: std::collections::HashMap<String, String> =
            conn.hgetall(receipt_key(run_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Receipt {
            tenant_id: map.get("tenant").cloned().unwrap_or_default(),
            charged: Money::from_micros(
                map.get("charged_micros")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            ),
            settled_at_ms: map
                .get("settled_at_ms")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }))
    }

    /// Atomic `(scope, tenant)` rate counter for PlanGuard.
    /// `Allowed` carries the post-increment count so the HTTP edge can
    /// compute `X-RateLimit-Remaining`; `Limited` carries the retry hint.
    pub async fn rate_limit_incr(
        &self,
        scope_key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Vec<String> = scripts::RATE_INCR
            .key(scope_key)
            .arg(limit)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await?;
        match reply.first().map(String::as_str) {
            Some("OK") => {
                let count = parse_micros(&reply, 1)? as u64;
                Ok(RateLimitOutcome::Allowed { limit, count })
            }
            Some("LIMITED") => {
                let ttl: u64 = reply
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(window.as_secs());
                Ok(RateLimitOutcome::Limited {
                    limit,
                    retry_after: Duration::from_secs(ttl.max(1)),
                })
            }
            _ => Err(LedgerError::UnexpectedReply(format!("{reply:?}"))),
        }
    }

    /// Test/ops helper: seed a tenant's balance directly.
    pub async fn set_balance_for_test(&self, tenant_id: &str, amount: Money) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(balance_key(tenant_id), amount.micros()).await?;
        Ok(())
    }

    /// Sums every live `reserve:*` hash's `amount` field. Used by the
    /// Reconciler's standing partial audit, not by any money-moving path —
    /// a SCAN is never atomic against concurrent reserve/settle/refund, so
    /// this is a point-in-time estimate, not a ledger primitive.
    pub async fn scan_active_reservations(&self) -> Result<(Money, u64)> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut cursor: u64 = 0;
        let mut total: i64 = 0;
        let mut count: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("reserve:*")
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await?;

            for key in &keys {
                let map: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
                if let Some(amount) = map.get("amount").and_then(|s| s.parse::<i64>().ok()) {
                    total += amount;
                    count += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok((Money::from_micros(total), count))
    }
}

fn parse_micros(reply: &[String], idx: usize) -> Result<i64> {
    reply
        .get(idx)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LedgerError::UnexpectedReply(format!("{reply:?}")))
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
