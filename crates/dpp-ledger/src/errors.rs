use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("redis connection/command error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("ledger script returned an unrecognized reply: {0}")]
    UnexpectedReply(String),
}
