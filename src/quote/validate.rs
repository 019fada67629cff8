use bitcoin::Network;

use super::{
    Direction, PeginQuote, PeginQuoteRequest, PegoutQuote, PegoutQuoteRequest, Quote, QuoteHash,
    QuoteRequest, RawPeginQuoteResponse, RawPegoutQuoteResponse, ValidatedQuote,
};
use crate::amount::Wei;
use crate::chain::btc::{is_p2sh, parse_address};
use crate::chain::{CallData, RskAddress};
use crate::error::{FlyoverError, Result};
use crate::provider::{LiquidityProvider, LiquidityProviderApi};
use crate::swap::admission::classify_rejection;

fn required<T>(field: &'static str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| FlyoverError::malformed(field, "missing"))
}

fn rsk_field(field: &'static str, value: Option<String>) -> Result<RskAddress> {
    required(field, value)?
        .parse()
        .map_err(|e| FlyoverError::malformed(field, e))
}

fn ensure(condition: bool, field: &'static str, reason: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(FlyoverError::malformed(field, reason()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuoteValidator<'a> {
    network: Network,
    provider: &'a LiquidityProvider,
}

impl<'a> QuoteValidator<'a> {
    pub fn new(network: Network, provider: &'a LiquidityProvider) -> Result<Self> {
        provider.check_consistency()?;
        Ok(Self { network, provider })
    }

    pub fn provider(&self) -> &LiquidityProvider {
        self.provider
    }

    fn btc_field(&self, field: &'static str, value: Option<String>) -> Result<String> {
        let value = required(field, value)?;
        let address =
            parse_address(&value, self.network).map_err(|e| FlyoverError::malformed(field, e))?;
        Ok(address.to_string())
    }

    pub fn validate_pegin(
        &self,
        request: &PeginQuoteRequest,
        response: RawPeginQuoteResponse,
    ) -> Result<ValidatedQuote> {
        let raw = response.quote;

        let fed_btc_addr = self.btc_field("fedBTCAddr", raw.fed_btc_addr)?;
        let federation = parse_address(&fed_btc_addr, self.network)
            .map_err(|e| FlyoverError::malformed("fedBTCAddr", e))?;
        ensure(is_p2sh(&federation), "fedBTCAddr", || {
            "federation address must be P2SH".to_string()
        })?;

        let data = match raw.data {
            Some(data) => data
                .parse::<CallData>()
                .map_err(|e| FlyoverError::malformed("data", e))?,
            None => CallData::default(),
        };

        let quote = PeginQuote {
            fed_btc_addr,
            lbc_addr: rsk_field("lbcAddr", raw.lbc_addr)?,
            lp_rsk_addr: rsk_field("lpRSKAddr", raw.lp_rsk_addr)?,
            btc_refund_addr: self.btc_field("btcRefundAddr", raw.btc_refund_addr)?,
            rsk_refund_addr: rsk_field("rskRefundAddr", raw.rsk_refund_addr)?,
            lp_btc_addr: self.btc_field("lpBTCAddr", raw.lp_btc_addr)?,
            call_fee: required("callFee", raw.call_fee)?,
            penalty_fee: required("penaltyFee", raw.penalty_fee)?,
            contract_addr: rsk_field("contractAddr", raw.contract_addr)?,
            data,
            gas_limit: required("gasLimit", raw.gas_limit)?,
            nonce: required("nonce", raw.nonce)?,
            value: required("value", raw.value)?,
            agreement_timestamp: required("agreementTimestamp", raw.agreement_timestamp)?,
            time_for_deposit: required("timeForDeposit", raw.time_for_deposit)?,
            lp_call_time: required("lpCallTime", raw.lp_call_time)?,
            confirmations: required("confirmations", raw.confirmations)?,
            call_on_register: required("callOnRegister", raw.call_on_register)?,
            gas_fee: required("gasFee", raw.gas_fee)?,
            product_fee_amount: required("productFeeAmount", raw.product_fee_amount)?,
        };

        ensure(quote.time_for_deposit > 0, "timeForDeposit", || {
            "must be > 0".to_string()
        })?;
        ensure(quote.lp_call_time > 0, "lpCallTime", || {
            "must be > 0".to_string()
        })?;
        ensure(quote.confirmations > 0, "confirmations", || {
            "must be > 0".to_string()
        })?;

        ensure(quote.value == request.value_to_transfer, "value", || {
            format!(
                "quote value {} differs from requested {}",
                quote.value, request.value_to_transfer
            )
        })?;
        ensure(
            quote.contract_addr == request.call_eoa_or_contract_address,
            "contractAddr",
            || {
                format!(
                    "quote pays {} but request targets {}",
                    quote.contract_addr, request.call_eoa_or_contract_address
                )
            },
        )?;
        ensure(quote.data == request.call_contract_arguments, "data", || {
            "quote call data differs from requested arguments".to_string()
        })?;
        ensure(
            quote.rsk_refund_addr == request.rsk_refund_address,
            "rskRefundAddr",
            || {
                format!(
                    "quote refunds {} but request asked for {}",
                    quote.rsk_refund_addr, request.rsk_refund_address
                )
            },
        )?;

        self.finish(Quote::Pegin(quote), response.quote_hash)
    }

    pub fn validate_pegout(
        &self,
        request: &PegoutQuoteRequest,
        response: RawPegoutQuoteResponse,
    ) -> Result<ValidatedQuote> {
        let raw = response.quote;

        let quote = PegoutQuote {
            lbc_address: rsk_field("lbcAddress", raw.lbc_address)?,
            liquidity_provider_rsk_address: rsk_field(
                "liquidityProviderRskAddress",
                raw.liquidity_provider_rsk_address,
            )?,
            btc_refund_address: self.btc_field("btcRefundAddress", raw.btc_refund_address)?,
            rsk_refund_address: rsk_field("rskRefundAddress", raw.rsk_refund_address)?,
            lp_btc_addr: self.btc_field("lpBtcAddr", raw.lp_btc_addr)?,
            call_fee: required("callFee", raw.call_fee)?,
            penalty_fee: required("penaltyFee", raw.penalty_fee)?,
            nonce: required("nonce", raw.nonce)?,
            deposit_addr: self.btc_field("depositAddr", raw.deposit_addr)?,
            value: required("value", raw.value)?,
            agreement_timestamp: required("agreementTimestamp", raw.agreement_timestamp)?,
            deposit_date_limit: required("depositDateLimit", raw.deposit_date_limit)?,
            deposit_confirmations: required("depositConfirmations", raw.deposit_confirmations)?,
            transfer_confirmations: required(
                "transferConfirmations",
                raw.transfer_confirmations,
            )?,
            transfer_time: required("transferTime", raw.transfer_time)?,
            expire_date: required("expireDate", raw.expire_date)?,
            expire_blocks: required("expireBlocks", raw.expire_blocks)?,
            gas_fee: required("gasFee", raw.gas_fee)?,
            product_fee_amount: required("productFeeAmount", raw.product_fee_amount)?,
        };

        ensure(
            quote.deposit_date_limit > quote.agreement_timestamp,
            "depositDateLimit",
            || {
                format!(
                    "deposit limit {} not after agreement {}",
                    quote.deposit_date_limit, quote.agreement_timestamp
                )
            },
        )?;
        ensure(quote.expire_date >= quote.deposit_date_limit, "expireDate", || {
            format!(
                "expiry {} precedes deposit limit {}",
                quote.expire_date, quote.deposit_date_limit
            )
        })?;
        ensure(quote.deposit_confirmations > 0, "depositConfirmations", || {
            "must be > 0".to_string()
        })?;
        ensure(
            quote.transfer_confirmations > 0,
            "transferConfirmations",
            || "must be > 0".to_string(),
        )?;

        ensure(quote.value == request.value_to_transfer, "value", || {
            format!(
                "quote value {} differs from requested {}",
                quote.value, request.value_to_transfer
            )
        })?;
        let requested_to = parse_address(&request.to, self.network)
            .map_err(|e| FlyoverError::invalid_request("to", e))?;
        ensure(quote.deposit_addr == requested_to.to_string(), "depositAddr", || {
            format!(
                "quote pays {} but request targets {}",
                quote.deposit_addr, request.to
            )
        })?;
        ensure(
            quote.rsk_refund_address == request.rsk_refund_address,
            "rskRefundAddress",
            || {
                format!(
                    "quote refunds {} but request asked for {}",
                    quote.rsk_refund_address, request.rsk_refund_address
                )
            },
        )?;

        self.finish(Quote::Pegout(quote), response.quote_hash)
    }

    fn finish(&self, quote: Quote, reported_hash: Option<String>) -> Result<ValidatedQuote> {
        let direction = quote.direction();
        let product = self.provider.product(direction)?;

        quote
            .total()
            .ok_or_else(|| FlyoverError::malformed("value", "value plus fees overflows"))?;

        if let Some(expected) = self.provider.rsk_address {
            let actual = quote.provider_rsk_address();
            ensure(actual == expected, provider_address_field(direction), || {
                format!(
                    "quote names provider {actual}, provider {} is {expected}",
                    self.provider.id
                )
            })?;
        }

        check_bounds(
            quote.value(),
            product.min_transaction_value,
            product.max_transaction_value,
        )?;

        let validated = ValidatedQuote::new(self.provider.id, quote);
        if let Some(reported) = reported_hash {
            let reported: QuoteHash = reported
                .parse()
                .map_err(|e| FlyoverError::malformed("quoteHash", e))?;
            ensure(&reported == validated.hash(), "quoteHash", || {
                format!(
                    "provider reported {reported}, quote hashes to {}",
                    validated.hash()
                )
            })?;
        }

        tracing::debug!(
            quote_hash = %validated.hash(),
            provider_id = self.provider.id,
            %direction,
            value = %validated.quote().value(),
            "quote validated"
        );
        Ok(validated)
    }
}

fn provider_address_field(direction: Direction) -> &'static str {
    match direction {
        Direction::Pegin => "lpRSKAddr",
        Direction::Pegout => "liquidityProviderRskAddress",
    }
}

fn check_bounds(value: Wei, min: Wei, max: Wei) -> Result<()> {
    if value < min || value > max {
        return Err(FlyoverError::OutOfBoundsQuote { value, min, max });
    }
    Ok(())
}

pub async fn fetch_quotes(
    api: &dyn LiquidityProviderApi,
    validator: &QuoteValidator<'_>,
    request: &QuoteRequest,
) -> Result<Vec<ValidatedQuote>> {
    let provider = validator.provider();
    let direction = request.direction();
    provider.product(direction)?;

    let quotes = match request {
        QuoteRequest::Pegin(req) => api
            .pegin_quotes(req)
            .await
            .map_err(|e| classify_rejection(provider.id, direction, None, e))?
            .into_iter()
            .map(|raw| validator.validate_pegin(req, raw))
            .collect::<Result<Vec<_>>>()?,
        QuoteRequest::Pegout(req) => api
            .pegout_quotes(req)
            .await
            .map_err(|e| classify_rejection(provider.id, direction, None, e))?
            .into_iter()
            .map(|raw| validator.validate_pegout(req, raw))
            .collect::<Result<Vec<_>>>()?,
    };

    if quotes.is_empty() {
        return Err(FlyoverError::NoQuotesAvailable {
            provider_id: provider.id,
            direction,
        });
    }
    tracing::info!(
        provider_id = provider.id,
        %direction,
        count = quotes.len(),
        "received quotes"
    );
    Ok(quotes)
}
