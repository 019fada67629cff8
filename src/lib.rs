pub mod amount;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod quote;
pub mod retry;
pub mod signer;
pub mod swap;

pub use crate::error::{ErrorKind, FlyoverError, Result};
