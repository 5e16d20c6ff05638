//! Error types shared across the trader

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraderError>;

#[derive(Error, Debug)]
pub enum TraderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Chain {0} is not connected")]
    UnknownChain(u64),

    #[error("Pricing error: {0}")]
    Pricing(String),

    #[error("No pool discovered for token {token} on chain {chain_id}")]
    NoPool { chain_id: u64, token: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Gas reserve breached on chain {chain_id}: balance {balance} would fall below reserve {reserve}")]
    GasReserve {
        chain_id: u64,
        balance: String,
        reserve: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Position already open for token {token} on chain {chain_id}")]
    PositionExists { chain_id: u64, token: String },

    #[error("Invalid position transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Wallet scan failed: {0}")]
    Scan(String),
}

impl TraderError {
    /// Errors that abort the current pass for one chain but must not
    /// bring down the control loop.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TraderError::Config(_))
    }
}

impl From<ethers::providers::ProviderError> for TraderError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        TraderError::Rpc(e.to_string())
    }
}
