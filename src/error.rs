use alloy::primitives::B256;
use thiserror::Error;

/// Errors surfaced by the keeper core.
///
/// Every recoverable kind maps to a fixed policy at the call site: RPC
/// failures are retried with backoff, capacity and funding shortfalls skip
/// the opportunity, reverts are counted and abandoned for the cycle.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Invalid or missing configuration. Fatal; the process exits 1.
    #[error("config: {0}")]
    Config(String),

    /// Node unreachable or malformed RPC response.
    #[error("chain rpc: {0}")]
    ChainRpc(String),

    /// Oracle returned `valid = false` for a collateral.
    #[error("invalid oracle price for {ilk}")]
    InvalidOracle { ilk: String },

    /// Wallet, Vat, or PSM pocket balance below what the action requires.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Debt ceiling, pool-trade cap, or slippage bound violated.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Transaction mined but reverted. Usually a competing keeper won.
    #[error("tx {tx_hash} reverted: {reason}")]
    TxReverted { tx_hash: B256, reason: String },

    /// Node rejected the send as underpriced.
    #[error("tx underpriced: {0}")]
    TxUnderpriced(String),

    /// Receipt wait timed out twice; outcome unknown.
    #[error("tx outcome unknown: {tx_hash}")]
    TxUnknown { tx_hash: B256 },

    /// Shutdown signal received.
    #[error("interrupted")]
    Interrupted,
}

impl KeeperError {
    /// Whether the error should abort the process rather than the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KeeperError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
