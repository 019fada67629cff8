pub mod btc;
pub mod rsk;

use thiserror::Error;

use crate::error::FlyoverError;

pub use self::btc::{BitcoinConnection, BtcDeposit, BtcOutput, BtcTransaction};
pub use self::rsk::{
    CallData, EventFilter, LbcCall, LbcCallResult, LbcEvent, LbcEventKind, PeginRegistration,
    RskAddress, RskConnection,
};

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("node unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid node response: {0}")]
    InvalidResponse(String),
}

impl From<ChainError> for FlyoverError {
    fn from(err: ChainError) -> Self {
        FlyoverError::Chain(err.to_string())
    }
}
