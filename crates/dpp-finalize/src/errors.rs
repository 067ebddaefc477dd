use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("ledger reported no reservation for this run during settle")]
    NoReservation,

    #[error(transparent)]
    Store(#[from] dpp_store::StoreError),

    #[error(transparent)]
    Ledger(#[from] dpp_ledger::LedgerError),
}
