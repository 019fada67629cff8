use thiserror::Error;

use crate::amount::Wei;
use crate::quote::{Direction, QuoteHash};

pub type Result<T> = std::result::Result<T, FlyoverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    MalformedQuote,
    OutOfBoundsQuote,
    QuoteExpired,
    InvalidSignature,
    AlreadyAccepted,
    LockingCapExceeded,
    ProviderRejected,
    PaymentCheckUnavailable,
    RefundCheckUnavailable,
    ProviderNotFound,
    NoQuotesAvailable,
    Transport,
    Chain,
    Signer,
    Storage,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureParty {
    Client,
    Provider,
}

impl std::fmt::Display for SignatureParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureParty::Client => f.write_str("client"),
            SignatureParty::Provider => f.write_str("provider"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlyoverError {
    #[error("invalid quote request: {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },

    #[error("malformed quote: {field}: {reason}")]
    MalformedQuote { field: &'static str, reason: String },

    #[error("quote value {value} outside provider bounds [{min}, {max}]")]
    OutOfBoundsQuote { value: Wei, min: Wei, max: Wei },

    #[error("quote {quote_hash} expired at {deadline}")]
    QuoteExpired { quote_hash: QuoteHash, deadline: u64 },

    #[error("invalid {party} signature for quote {quote_hash}: {reason}")]
    InvalidSignature {
        party: SignatureParty,
        quote_hash: QuoteHash,
        reason: String,
    },

    #[error("quote {quote_hash} already accepted with a different signature")]
    AlreadyAccepted { quote_hash: QuoteHash },

    #[error("provider {provider_id} locking cap exceeded for {direction}: {message}")]
    LockingCapExceeded {
        provider_id: u64,
        direction: Direction,
        message: String,
    },

    #[error("provider rejected request (status {status}): {message}")]
    ProviderRejected {
        status: u16,
        message: String,
        recoverable: bool,
    },

    #[error("payment check for {quote_hash} unavailable after {attempts} attempts: {last_error}")]
    PaymentCheckUnavailable {
        quote_hash: QuoteHash,
        attempts: u32,
        last_error: String,
    },

    #[error("refund check for {quote_hash} unavailable after {attempts} attempts: {last_error}")]
    RefundCheckUnavailable {
        quote_hash: QuoteHash,
        attempts: u32,
        last_error: String,
    },

    #[error("liquidity provider {0} not found")]
    ProviderNotFound(u64),

    #[error("provider {provider_id} returned no {direction} quotes")]
    NoQuotesAvailable { provider_id: u64, direction: Direction },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("chain error: {0}")]
    Chain(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl FlyoverError {
    pub fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        FlyoverError::MalformedQuote {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_request(field: &'static str, reason: impl Into<String>) -> Self {
        FlyoverError::InvalidRequest {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlyoverError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            FlyoverError::MalformedQuote { .. } => ErrorKind::MalformedQuote,
            FlyoverError::OutOfBoundsQuote { .. } => ErrorKind::OutOfBoundsQuote,
            FlyoverError::QuoteExpired { .. } => ErrorKind::QuoteExpired,
            FlyoverError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            FlyoverError::AlreadyAccepted { .. } => ErrorKind::AlreadyAccepted,
            FlyoverError::LockingCapExceeded { .. } => ErrorKind::LockingCapExceeded,
            FlyoverError::ProviderRejected { .. } => ErrorKind::ProviderRejected,
            FlyoverError::PaymentCheckUnavailable { .. } => ErrorKind::PaymentCheckUnavailable,
            FlyoverError::RefundCheckUnavailable { .. } => ErrorKind::RefundCheckUnavailable,
            FlyoverError::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            FlyoverError::NoQuotesAvailable { .. } => ErrorKind::NoQuotesAvailable,
            FlyoverError::Transport(_) => ErrorKind::Transport,
            FlyoverError::Chain(_) => ErrorKind::Chain,
            FlyoverError::Signer(_) => ErrorKind::Signer,
            FlyoverError::Storage(_) => ErrorKind::Storage,
            FlyoverError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether retrying the same call with the same inputs may succeed later.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FlyoverError::ProviderRejected { recoverable, .. } => *recoverable,
            FlyoverError::PaymentCheckUnavailable { .. }
            | FlyoverError::RefundCheckUnavailable { .. }
            | FlyoverError::Transport(_)
            | FlyoverError::Chain(_) => true,
            _ => false,
        }
    }
}
