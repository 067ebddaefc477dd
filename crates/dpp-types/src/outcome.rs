//! Explicit result types replacing exceptions-as-control-flow: `ClaimOutcome`,
//! `SettleOutcome`, `ReserveOutcome`, and `RefundOutcome` are matchable enum
//! variants instead.

use crate::money::Money;

/// Outcome of a 2-phase-finalize claim attempt (`FinalizeProtocol` phase A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller won the race; carries the fresh finalize token and the
    /// version the row now has after the claiming CAS.
    Won { finalize_token: String, version: i64 },
    /// Zero rows matched the claim CAS: another actor already claimed,
    /// already committed, or the row no longer satisfies the identity
    /// predicate. Expected under contention; logged at debug, never
    /// user-visible.
    Lost,
}

/// Outcome of `LedgerOps::settle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Ok {
        charge: Money,
        refund: Money,
        new_balance: Money,
    },
    NoReserve,
}

/// Outcome of `LedgerOps::reserve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Ok { new_balance: Money },
    Insufficient { balance: Money },
    AlreadyReserved,
}

/// Outcome of `LedgerOps::refund_full`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Ok { refunded: Money, new_balance: Money },
    NoReserve,
}
