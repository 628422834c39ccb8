// Error taxonomy for balance-affecting operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Stake or credit amount outside the accepted range.
    #[error("invalid amount")]
    InvalidAmount,

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    /// The per-wallet section could not be acquired within the bound.
    #[error("wallet busy, retry")]
    Busy,

    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error("balance arithmetic overflow")]
    Overflow,

    /// Durable-store failure on a synchronous write-through path. The
    /// batched path never surfaces this; it requeues and retries instead.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl WalletError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        WalletError::Persistence(err.to_string())
    }
}
