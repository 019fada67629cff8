use std::str::FromStr as _;

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, AddressType, Network};

use super::ChainError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcDeposit {
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
    /// `None` while the transaction sits in the mempool.
    pub block_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcOutput {
    pub address: Option<String>,
    pub value_sats: u64,
    /// Payload of an `OP_RETURN` output.
    pub op_return: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcTransaction {
    pub txid: String,
    pub block_height: Option<u32>,
    pub outputs: Vec<BtcOutput>,
}

#[async_trait]
pub trait BitcoinConnection: Send + Sync {
    async fn tip_height(&self) -> Result<u32, ChainError>;

    async fn get_balance(&self, address: &str) -> Result<u64, ChainError>;

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String, ChainError>;

    async fn get_transaction(&self, txid: &str) -> Result<Option<BtcTransaction>, ChainError>;

    /// Outputs paying `address`, confirmed or not.
    async fn watch_address(&self, address: &str) -> Result<Vec<BtcDeposit>, ChainError>;
}

pub fn confirmations(tip_height: u32, block_height: Option<u32>) -> u32 {
    match block_height {
        None | Some(0) => 0,
        Some(height) if tip_height < height => 0,
        Some(height) => tip_height - height + 1,
    }
}

pub fn parse_address(address: &str, network: Network) -> Result<Address, String> {
    let unchecked = Address::<NetworkUnchecked>::from_str(address.trim())
        .map_err(|e| format!("invalid bitcoin address {address:?}: {e}"))?;
    unchecked
        .require_network(network)
        .map_err(|e| format!("bitcoin address {address:?} network mismatch: {e}"))
}

pub fn is_p2sh(address: &Address) -> bool {
    address.address_type() == Some(AddressType::P2sh)
}

pub fn confirmed_value(deposits: &[BtcDeposit], tip_height: u32, min_confs: u32) -> u64 {
    deposits
        .iter()
        .filter(|d| confirmations(tip_height, d.block_height) >= min_confs)
        .map(|d| d.value_sats)
        .fold(0u64, u64::saturating_add)
}
