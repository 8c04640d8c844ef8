use thiserror::Error;

use crate::kv::StoreError;

/// Errors surfaced by the connect engine.
///
/// The `Display` output of the protocol-facing variants is exactly the string
/// delivered to pages in `{ success: false, error }` payloads.
#[derive(Debug, Error)]
pub enum Error {
    #[error("User must authorize the current website")]
    AuthorizationRequired,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    UserRejected(String),

    #[error("Invalid password")]
    InvalidCredential,

    #[error("insufficient funds for asset {asset}: need {needed}, have {available}")]
    InsufficientFunds {
        asset: String,
        needed: u64,
        available: u64,
    },

    #[error("Transaction contains invalid signatures")]
    SignatureValidationFailed,

    #[error("{0}")]
    MissingPendingData(String),

    #[error("Method not implemented.")]
    UnknownOperation(String),

    #[error("No active tab available")]
    NoOrigin,

    #[error("a decision for {0} is already awaited")]
    ApprovalPending(String),

    #[error("approval for {0} timed out")]
    ApprovalTimeout(String),

    #[error("approval for {0} was abandoned")]
    ApprovalAbandoned(String),

    #[error("approval UI error: {0}")]
    Launcher(String),

    #[error("wallet not found")]
    WalletNotFound,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("amount overflow")]
    AmountOverflow,

    #[error("PSET error: {0}")]
    Pset(String),

    #[error("blinding error: {0}")]
    Blinding(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("finalize error: {0}")]
    Finalize(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("chain source error: {0}")]
    Chain(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task join error: {0}")]
    Task(String),

    /// Copy of another error's message, for reporting one failure to two
    /// parties.
    #[error("{0}")]
    Relayed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Arity or null-parameter failure of the spend operations.
    pub fn missing_params() -> Self {
        Error::InvalidRequest("Missing params".to_string())
    }

    pub fn relay(&self) -> Self {
        Error::Relayed(self.to_string())
    }
}
