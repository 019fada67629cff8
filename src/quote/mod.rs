pub mod hash;
pub mod request;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::amount::{Wei, opt_int_or_string};
use crate::chain::{CallData, RskAddress};
use crate::error::{FlyoverError, Result};

pub use self::hash::quote_hash;
pub use self::request::{PeginQuoteRequest, PegoutQuoteRequest, QuoteRequest, QuoteRequestBuilder};
pub use self::validate::{QuoteValidator, fetch_quotes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Pegin,
    Pegout,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Pegin => "pegin",
            Direction::Pegout => "pegout",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pegin" => Ok(Direction::Pegin),
            "pegout" => Ok(Direction::Pegout),
            other => Err(format!("unknown direction {other:?}")),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuoteHash([u8; 32]);

impl QuoteHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for QuoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for QuoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuoteHash({self})")
    }
}

impl FromStr for QuoteHash {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body).map_err(|e| format!("quote hash is not hex: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "quote hash must be 32 bytes".to_string())?;
        Ok(Self(bytes))
    }
}

impl Serialize for QuoteHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuoteHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeginQuote {
    #[serde(rename = "fedBTCAddr")]
    pub fed_btc_addr: String,
    pub lbc_addr: RskAddress,
    #[serde(rename = "lpRSKAddr")]
    pub lp_rsk_addr: RskAddress,
    pub btc_refund_addr: String,
    #[serde(rename = "rskRefundAddr")]
    pub rsk_refund_addr: RskAddress,
    #[serde(rename = "lpBTCAddr")]
    pub lp_btc_addr: String,
    pub call_fee: Wei,
    pub penalty_fee: Wei,
    pub contract_addr: RskAddress,
    pub data: CallData,
    pub gas_limit: u32,
    pub nonce: i64,
    pub value: Wei,
    pub agreement_timestamp: u64,
    pub time_for_deposit: u32,
    pub lp_call_time: u32,
    pub confirmations: u16,
    pub call_on_register: bool,
    pub gas_fee: Wei,
    pub product_fee_amount: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PegoutQuote {
    pub lbc_address: RskAddress,
    pub liquidity_provider_rsk_address: RskAddress,
    pub btc_refund_address: String,
    pub rsk_refund_address: RskAddress,
    pub lp_btc_addr: String,
    pub call_fee: Wei,
    pub penalty_fee: Wei,
    pub nonce: i64,
    pub deposit_addr: String,
    pub value: Wei,
    pub agreement_timestamp: u64,
    pub deposit_date_limit: u64,
    pub deposit_confirmations: u16,
    pub transfer_confirmations: u16,
    pub transfer_time: u32,
    pub expire_date: u64,
    pub expire_blocks: u64,
    pub gas_fee: Wei,
    pub product_fee_amount: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", content = "quote", rename_all = "snake_case")]
pub enum Quote {
    Pegin(PeginQuote),
    Pegout(PegoutQuote),
}

impl Quote {
    pub fn direction(&self) -> Direction {
        match self {
            Quote::Pegin(_) => Direction::Pegin,
            Quote::Pegout(_) => Direction::Pegout,
        }
    }

    pub fn value(&self) -> Wei {
        match self {
            Quote::Pegin(q) => q.value,
            Quote::Pegout(q) => q.value,
        }
    }

    pub fn lbc_address(&self) -> RskAddress {
        match self {
            Quote::Pegin(q) => q.lbc_addr,
            Quote::Pegout(q) => q.lbc_address,
        }
    }

    pub fn provider_rsk_address(&self) -> RskAddress {
        match self {
            Quote::Pegin(q) => q.lp_rsk_addr,
            Quote::Pegout(q) => q.liquidity_provider_rsk_address,
        }
    }

    /// Amount the user must deposit: value plus every fee.
    pub fn total(&self) -> Option<Wei> {
        let (value, call_fee, gas_fee, product_fee) = match self {
            Quote::Pegin(q) => (q.value, q.call_fee, q.gas_fee, q.product_fee_amount),
            Quote::Pegout(q) => (q.value, q.call_fee, q.gas_fee, q.product_fee_amount),
        };
        value
            .checked_add(call_fee)?
            .checked_add(gas_fee)?
            .checked_add(product_fee)
    }

    pub fn deposit_deadline(&self) -> u64 {
        match self {
            Quote::Pegin(q) => q
                .agreement_timestamp
                .saturating_add(u64::from(q.time_for_deposit)),
            Quote::Pegout(q) => q.deposit_date_limit,
        }
    }
}

/// A quote that passed validation, bound to the hash computed from its own body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuote {
    provider_id: u64,
    quote: Quote,
    hash: QuoteHash,
}

impl ValidatedQuote {
    pub(crate) fn new(provider_id: u64, quote: Quote) -> Self {
        let hash = quote_hash(&quote);
        Self {
            provider_id,
            quote,
            hash,
        }
    }

    /// Rebuilds a quote loaded from persistent storage, refusing it if the stored hash no
    /// longer matches the body.
    pub(crate) fn restore(provider_id: u64, quote: Quote, stored_hash: &QuoteHash) -> Result<Self> {
        let restored = Self::new(provider_id, quote);
        if &restored.hash != stored_hash {
            return Err(FlyoverError::Storage(format!(
                "stored quote {stored_hash} does not hash to its key (got {})",
                restored.hash
            )));
        }
        Ok(restored)
    }

    pub fn provider_id(&self) -> u64 {
        self.provider_id
    }

    pub fn quote(&self) -> &Quote {
        &self.quote
    }

    pub fn hash(&self) -> &QuoteHash {
        &self.hash
    }

    pub fn direction(&self) -> Direction {
        self.quote.direction()
    }

    pub fn verify_commitment(&self) -> Result<()> {
        let recomputed = quote_hash(&self.quote);
        if recomputed != self.hash {
            return Err(FlyoverError::malformed(
                "quoteHash",
                format!("quote body hashes to {recomputed}, committed {}", self.hash),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPeginQuote {
    #[serde(rename = "fedBTCAddr")]
    pub fed_btc_addr: Option<String>,
    pub lbc_addr: Option<String>,
    #[serde(rename = "lpRSKAddr")]
    pub lp_rsk_addr: Option<String>,
    pub btc_refund_addr: Option<String>,
    #[serde(rename = "rskRefundAddr")]
    pub rsk_refund_addr: Option<String>,
    #[serde(rename = "lpBTCAddr")]
    pub lp_btc_addr: Option<String>,
    pub call_fee: Option<Wei>,
    pub penalty_fee: Option<Wei>,
    pub contract_addr: Option<String>,
    pub data: Option<String>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub gas_limit: Option<u32>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub nonce: Option<i64>,
    pub value: Option<Wei>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub agreement_timestamp: Option<u64>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub time_for_deposit: Option<u32>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub lp_call_time: Option<u32>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub confirmations: Option<u16>,
    pub call_on_register: Option<bool>,
    pub gas_fee: Option<Wei>,
    pub product_fee_amount: Option<Wei>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPeginQuoteResponse {
    pub quote: RawPeginQuote,
    pub quote_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPegoutQuote {
    pub lbc_address: Option<String>,
    pub liquidity_provider_rsk_address: Option<String>,
    pub btc_refund_address: Option<String>,
    pub rsk_refund_address: Option<String>,
    pub lp_btc_addr: Option<String>,
    pub call_fee: Option<Wei>,
    pub penalty_fee: Option<Wei>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub nonce: Option<i64>,
    pub deposit_addr: Option<String>,
    pub value: Option<Wei>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub agreement_timestamp: Option<u64>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub deposit_date_limit: Option<u64>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub deposit_confirmations: Option<u16>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub transfer_confirmations: Option<u16>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub transfer_time: Option<u32>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub expire_date: Option<u64>,
    #[serde(default, deserialize_with = "opt_int_or_string")]
    pub expire_blocks: Option<u64>,
    pub gas_fee: Option<Wei>,
    pub product_fee_amount: Option<Wei>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPegoutQuoteResponse {
    pub quote: RawPegoutQuote,
    pub quote_hash: Option<String>,
}
