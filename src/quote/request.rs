use bitcoin::Network;
use serde::{Deserialize, Serialize};

use super::Direction;
use crate::amount::Wei;
use crate::chain::btc::parse_address;
use crate::chain::{CallData, RskAddress};
use crate::error::{FlyoverError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeginQuoteRequest {
    pub call_eoa_or_contract_address: RskAddress,
    pub call_contract_arguments: CallData,
    pub value_to_transfer: Wei,
    pub rsk_refund_address: RskAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PegoutQuoteRequest {
    pub to: String,
    pub value_to_transfer: Wei,
    pub rsk_refund_address: RskAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteRequest {
    Pegin(PeginQuoteRequest),
    Pegout(PegoutQuoteRequest),
}

impl QuoteRequest {
    pub fn direction(&self) -> Direction {
        match self {
            QuoteRequest::Pegin(_) => Direction::Pegin,
            QuoteRequest::Pegout(_) => Direction::Pegout,
        }
    }

    pub fn value(&self) -> Wei {
        match self {
            QuoteRequest::Pegin(r) => r.value_to_transfer,
            QuoteRequest::Pegout(r) => r.value_to_transfer,
        }
    }
}

/// Turns user intent into a well-formed quote request for one bitcoin network.
#[derive(Debug, Clone, Copy)]
pub struct QuoteRequestBuilder {
    network: Network,
}

impl QuoteRequestBuilder {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn pegin(
        &self,
        destination: &str,
        value: Wei,
        rsk_refund_address: &str,
        call_data: Option<&str>,
    ) -> Result<QuoteRequest> {
        let call_eoa_or_contract_address = parse_rsk("callEoaOrContractAddress", destination)?;
        let rsk_refund_address = parse_rsk("rskRefundAddress", rsk_refund_address)?;
        let call_contract_arguments = match call_data {
            Some(data) => data
                .parse()
                .map_err(|e| FlyoverError::invalid_request("callContractArguments", e))?,
            None => CallData::default(),
        };
        ensure_positive(value)?;

        Ok(QuoteRequest::Pegin(PeginQuoteRequest {
            call_eoa_or_contract_address,
            call_contract_arguments,
            value_to_transfer: value,
            rsk_refund_address,
        }))
    }

    pub fn pegout(
        &self,
        btc_destination: &str,
        value: Wei,
        rsk_refund_address: &str,
    ) -> Result<QuoteRequest> {
        let to = parse_address(btc_destination, self.network)
            .map_err(|e| FlyoverError::invalid_request("to", e))?;
        let rsk_refund_address = parse_rsk("rskRefundAddress", rsk_refund_address)?;
        ensure_positive(value)?;

        Ok(QuoteRequest::Pegout(PegoutQuoteRequest {
            to: to.to_string(),
            value_to_transfer: value,
            rsk_refund_address,
        }))
    }
}

fn parse_rsk(field: &'static str, value: &str) -> Result<RskAddress> {
    value
        .parse()
        .map_err(|e| FlyoverError::invalid_request(field, e))
}

fn ensure_positive(value: Wei) -> Result<()> {
    if value.is_zero() {
        return Err(FlyoverError::invalid_request(
            "valueToTransfer",
            "value must be > 0",
        ));
    }
    Ok(())
}
