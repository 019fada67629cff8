pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Wei;
use crate::chain::RskAddress;
use crate::error::{FlyoverError, Result};
use crate::quote::{
    Direction, PeginQuoteRequest, PegoutQuoteRequest, QuoteHash, RawPeginQuoteResponse,
    RawPegoutQuoteResponse,
};
use crate::signer::QuoteSignature;

pub use self::http::HttpLiquidityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Pegin,
    Pegout,
    Both,
}

impl ProviderType {
    pub fn serves(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (ProviderType::Both, _)
                | (ProviderType::Pegin, Direction::Pegin)
                | (ProviderType::Pegout, Direction::Pegout)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    pub min_transaction_value: Wei,
    pub max_transaction_value: Wei,
    #[serde(default)]
    pub fee: Option<Wei>,
    #[serde(default)]
    pub fixed_fee: Option<Wei>,
    /// Percentage of the value charged on top of the fixed fee. Informational; quotes carry
    /// the resulting amount in `productFeeAmount`.
    #[serde(default)]
    pub fee_percentage: Option<f64>,
    pub required_confirmations: u16,
    #[serde(default)]
    pub locking_cap: Option<Wei>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityProvider {
    pub id: u64,
    pub name: String,
    pub api_base_url: String,
    pub status: bool,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub rsk_address: Option<RskAddress>,
    pub pegin: ProductDetail,
    pub pegout: ProductDetail,
}

impl LiquidityProvider {
    pub fn product(&self, direction: Direction) -> Result<&ProductDetail> {
        if !self.provider_type.serves(direction) {
            return Err(FlyoverError::invalid_request(
                "provider",
                format!("provider {} does not serve {direction}", self.id),
            ));
        }
        Ok(match direction {
            Direction::Pegin => &self.pegin,
            Direction::Pegout => &self.pegout,
        })
    }

    /// Declared data must be self-consistent before any of it is used to judge a quote.
    pub fn check_consistency(&self) -> Result<()> {
        let details = [
            (Direction::Pegin, &self.pegin),
            (Direction::Pegout, &self.pegout),
        ];
        for (direction, detail) in details {
            if !self.provider_type.serves(direction) {
                continue;
            }
            if let (Some(fee), Some(fixed_fee)) = (detail.fee, detail.fixed_fee)
                && fee != fixed_fee
            {
                return Err(FlyoverError::malformed(
                    "fixedFee",
                    format!(
                        "provider {} declares {direction} fixedFee {fixed_fee} but fee {fee}",
                        self.id
                    ),
                ));
            }
            if let Some(pct) = detail.fee_percentage
                && !(pct.is_finite() && pct >= 0.0)
            {
                return Err(FlyoverError::malformed(
                    "feePercentage",
                    format!("provider {} declares {direction} feePercentage {pct}", self.id),
                ));
            }
            if detail.min_transaction_value > detail.max_transaction_value {
                return Err(FlyoverError::malformed(
                    "minTransactionValue",
                    format!(
                        "provider {} declares {direction} min {} above max {}",
                        self.id, detail.min_transaction_value, detail.max_transaction_value
                    ),
                ));
            }
        }
        Ok(())
    }
}

pub fn find_provider(providers: &[LiquidityProvider], id: u64) -> Result<&LiquidityProvider> {
    providers
        .iter()
        .find(|p| p.id == id && p.status)
        .ok_or(FlyoverError::ProviderNotFound(id))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptQuoteRequest {
    pub quote_hash: QuoteHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptAuthenticatedQuoteRequest {
    pub quote_hash: QuoteHash,
    pub signature: QuoteSignature,
}

/// Acceptance response. Pegin providers answer with the derived bitcoin deposit address,
/// pegout providers with the bridge contract address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAcceptance {
    pub signature: Option<String>,
    #[serde(alias = "bitcoinDepositAddressHash", alias = "lbcAddress")]
    pub deposit_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LpErrorBody {
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpQuoteState {
    WaitingForDeposit,
    WaitingForDepositConfirmations,
    TimeForDepositElapsed,
    CallForUserSucceeded,
    CallForUserFailed,
    RegisterPegInSucceeded,
    RegisterPegInFailed,
    SendPegoutSucceeded,
    SendPegoutFailed,
    RefundPegOutSucceeded,
    RefundPegOutFailed,
    BridgeTxSucceeded,
    BridgeTxFailed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStatusReport {
    pub state: LpQuoteState,
    #[serde(default)]
    pub user_deposit_tx_hash: Option<String>,
    #[serde(default)]
    pub provider_tx_hash: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum LpError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("rejected with status {status}: {}", body.message)]
    Rejected { status: u16, body: LpErrorBody },

    #[error("undecodable response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LiquidityProviderApi: Send + Sync {
    async fn providers(&self) -> std::result::Result<Vec<LiquidityProvider>, LpError>;

    async fn pegin_quotes(
        &self,
        request: &PeginQuoteRequest,
    ) -> std::result::Result<Vec<RawPeginQuoteResponse>, LpError>;

    async fn pegout_quotes(
        &self,
        request: &PegoutQuoteRequest,
    ) -> std::result::Result<Vec<RawPegoutQuoteResponse>, LpError>;

    async fn accept_quote(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
    ) -> std::result::Result<RawAcceptance, LpError>;

    async fn accept_authenticated_quote(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
        signature: &QuoteSignature,
    ) -> std::result::Result<RawAcceptance, LpError>;

    async fn quote_status(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
    ) -> std::result::Result<QuoteStatusReport, LpError>;
}
