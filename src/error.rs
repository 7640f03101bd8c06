//! Error types for the bridge relayer

use ethers::types::H256;
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for domain {domain_id}: {message}")]
    ChainConnection { domain_id: u8, message: String },

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactError),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Message handler error: {0}")]
    Handler(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Listener for domain {domain_id} stopped")]
    ListenerStopped { domain_id: u8 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayerError::ChainConnection { .. } | RelayerError::GasEstimation(_) => true,
            RelayerError::Transaction(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Where in the sign-and-send sequence a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing reached the network and the nonce is untouched
    PreCommit,
    /// The node refused the transaction; the nonce is untouched
    Broadcast,
    /// The transaction was accepted and the nonce consumed; outcome uncertain
    PostCommit,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::PreCommit => "pre_commit",
            FailureClass::Broadcast => "broadcast",
            FailureClass::PostCommit => "post_commit",
        }
    }
}

/// Failures of a single `Transactor::transact` call
#[derive(Error, Debug)]
pub enum TransactError {
    #[error("failed to read nonce: {0}")]
    NonceRead(String),

    #[error("failed to resolve gas price: {0}")]
    GasPrice(String),

    #[error("failed to build transaction: {0}")]
    TxBuild(String),

    #[error("failed to broadcast transaction: {0}")]
    Broadcast(String),

    #[error("transaction {tx_hash:?} broadcast but nonce increment failed: {message}")]
    NonceIncrement { tx_hash: H256, message: String },

    #[error("no receipt for transaction {tx_hash:?}: {message}")]
    ReceiptTimeout { tx_hash: H256, message: String },

    #[error("transaction {tx_hash:?} reverted on chain")]
    Reverted { tx_hash: H256 },
}

impl TransactError {
    pub fn class(&self) -> FailureClass {
        match self {
            TransactError::NonceRead(_)
            | TransactError::GasPrice(_)
            | TransactError::TxBuild(_) => FailureClass::PreCommit,
            TransactError::Broadcast(_) => FailureClass::Broadcast,
            TransactError::NonceIncrement { .. }
            | TransactError::ReceiptTimeout { .. }
            | TransactError::Reverted { .. } => FailureClass::PostCommit,
        }
    }

    /// Pre-commit and broadcast failures never consumed a nonce and can be
    /// resent as-is. Post-commit failures must not be blindly resent.
    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::PostCommit
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
