use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest as _, Keccak256};

use super::ChainError;
use crate::amount::Wei;
use crate::quote::QuoteHash;

const BRIDGE_REFUNDED_USER_ERROR_CODE: i128 = -100;
const BRIDGE_REFUNDED_LP_ERROR_CODE: i128 = -200;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RskAddress([u8; 20]);

impl RskAddress {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Left-padded 32-byte word, as addresses appear in contract call encodings.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    pub fn from_uncompressed_pubkey(pubkey: &[u8; 65]) -> Self {
        let digest = Keccak256::digest(&pubkey[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }
}

impl fmt::Display for RskAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RskAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RskAddress({self})")
    }
}

impl FromStr for RskAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("rsk address must start with 0x: {s:?}"))?;
        if body.len() != 40 {
            return Err(format!(
                "rsk address must have 40 hex characters, got {}",
                body.len()
            ));
        }
        let bytes = hex::decode(body).map_err(|e| format!("rsk address is not hex: {e}"))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for RskAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RskAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Arbitrary contract call payload, hex encoded on the wire (`""` or `"0x"` for none).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct CallData(Vec<u8>);

impl CallData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CallData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallData(0x{})", hex::encode(&self.0))
    }
}

impl FromStr for CallData {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(body)
            .map(CallData)
            .map_err(|e| format!("call data is not hex: {e}"))
    }
}

impl Serialize for CallData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for CallData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeginRegistration {
    Transferred(Wei),
    /// The bridge rejected the deposit (for example its locking cap was reached) and returned
    /// the bitcoin to the user.
    RefundedToUser,
    RefundedToProvider,
    Unprocessable(i128),
}

impl PeginRegistration {
    pub fn from_transferred_amount(amount: i128) -> Self {
        match amount {
            a if a >= 0 => PeginRegistration::Transferred(Wei::new(a as u128)),
            BRIDGE_REFUNDED_USER_ERROR_CODE => PeginRegistration::RefundedToUser,
            BRIDGE_REFUNDED_LP_ERROR_CODE => PeginRegistration::RefundedToProvider,
            code => PeginRegistration::Unprocessable(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbcEvent {
    CallForUser {
        quote_hash: QuoteHash,
        from: RskAddress,
        dest: RskAddress,
        value: Wei,
        success: bool,
        block_number: u64,
    },
    PegInRegistered {
        quote_hash: QuoteHash,
        registration: PeginRegistration,
        block_number: u64,
    },
    PegOutDeposit {
        quote_hash: QuoteHash,
        sender: RskAddress,
        amount: Wei,
        timestamp: u64,
        block_number: u64,
    },
    PegOutRefunded {
        quote_hash: QuoteHash,
        block_number: u64,
    },
    PegOutUserRefunded {
        quote_hash: QuoteHash,
        user: RskAddress,
        amount: Wei,
        block_number: u64,
    },
}

impl LbcEvent {
    pub fn kind(&self) -> LbcEventKind {
        match self {
            LbcEvent::CallForUser { .. } => LbcEventKind::CallForUser,
            LbcEvent::PegInRegistered { .. } => LbcEventKind::PegInRegistered,
            LbcEvent::PegOutDeposit { .. } => LbcEventKind::PegOutDeposit,
            LbcEvent::PegOutRefunded { .. } => LbcEventKind::PegOutRefunded,
            LbcEvent::PegOutUserRefunded { .. } => LbcEventKind::PegOutUserRefunded,
        }
    }

    pub fn quote_hash(&self) -> &QuoteHash {
        match self {
            LbcEvent::CallForUser { quote_hash, .. }
            | LbcEvent::PegInRegistered { quote_hash, .. }
            | LbcEvent::PegOutDeposit { quote_hash, .. }
            | LbcEvent::PegOutRefunded { quote_hash, .. }
            | LbcEvent::PegOutUserRefunded { quote_hash, .. } => quote_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LbcEventKind {
    CallForUser,
    PegInRegistered,
    PegOutDeposit,
    PegOutRefunded,
    PegOutUserRefunded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: LbcEventKind,
    pub quote_hash: QuoteHash,
    pub from_block: Option<u64>,
}

impl EventFilter {
    pub fn new(kind: LbcEventKind, quote_hash: QuoteHash) -> Self {
        Self {
            kind,
            quote_hash,
            from_block: None,
        }
    }

    pub fn matches(&self, event: &LbcEvent) -> bool {
        event.kind() == self.kind
            && event.quote_hash() == &self.quote_hash
            && self
                .from_block
                .is_none_or(|from| event_block(event) >= from)
    }
}

fn event_block(event: &LbcEvent) -> u64 {
    match event {
        LbcEvent::CallForUser { block_number, .. }
        | LbcEvent::PegInRegistered { block_number, .. }
        | LbcEvent::PegOutDeposit { block_number, .. }
        | LbcEvent::PegOutRefunded { block_number, .. }
        | LbcEvent::PegOutUserRefunded { block_number, .. } => *block_number,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbcCall {
    IsPegOutQuoteCompleted(QuoteHash),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LbcCallResult {
    Bool(bool),
}

impl LbcCallResult {
    pub fn into_bool(self) -> bool {
        match self {
            LbcCallResult::Bool(value) => value,
        }
    }
}

#[async_trait]
pub trait RskConnection: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn call(&self, call: &LbcCall) -> Result<LbcCallResult, ChainError>;

    /// Events matching `filter`, ordered by block then log index.
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<LbcEvent>, ChainError>;
}
