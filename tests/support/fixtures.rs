use anyhow::{Context as _, Result};
use bitcoin::{Address, Network, ScriptBuf};
use flyover_swap::amount::Wei;
use flyover_swap::chain::{CallData, RskAddress};
use flyover_swap::provider::{LiquidityProvider, ProductDetail, ProviderType};
use flyover_swap::quote::{
    PeginQuote, PeginQuoteRequest, PegoutQuote, PegoutQuoteRequest, Quote, QuoteValidator,
    RawPeginQuoteResponse, RawPegoutQuoteResponse, ValidatedQuote, quote_hash,
};
use flyover_swap::signer::Secp256k1Signer;

pub const NETWORK: Network = Network::Regtest;
pub const AGREEMENT: u64 = 1_700_000_000;
pub const PROVIDER_ID: u64 = 1;

pub const LP_KEY: [u8; 32] = [0x11; 32];
pub const CLIENT_KEY: [u8; 32] = [0x22; 32];

pub const MILLI_RBTC: u128 = 1_000_000_000_000_000;
pub const VALUE: Wei = Wei::new(10 * MILLI_RBTC);
pub const CALL_FEE: Wei = Wei::new(100_000_000_000_000);
pub const GAS_FEE: Wei = Wei::new(20_000_000_000_000);

pub const TIME_FOR_DEPOSIT: u32 = 3_600;
pub const LP_CALL_TIME: u32 = 7_200;
pub const PEGIN_CONFIRMATIONS: u16 = 2;

pub const DEPOSIT_WINDOW: u64 = 3_600;
pub const EXPIRE_WINDOW: u64 = 7_200;
pub const EXPIRE_BLOCKS: u64 = 500;

pub fn lp_signer() -> Secp256k1Signer {
    Secp256k1Signer::from_secret_bytes(&LP_KEY).expect("lp key")
}

pub fn client_signer() -> Secp256k1Signer {
    Secp256k1Signer::from_secret_bytes(&CLIENT_KEY).expect("client key")
}

/// Regtest P2SH address derived from a one-byte tag.
pub fn btc_address(tag: u8) -> String {
    Address::p2sh(&ScriptBuf::from_bytes(vec![0x51, tag]), NETWORK)
        .expect("p2sh address")
        .to_string()
}

pub fn rsk_address(tag: u8) -> RskAddress {
    RskAddress::new([tag; 20])
}

pub fn lbc_address() -> RskAddress {
    rsk_address(0x1b)
}

pub fn federation_address() -> String {
    btc_address(0xfe)
}

/// Stand-in 2-of-3 federation script; only its bytes matter for address derivation.
pub fn federation_redeem_script() -> ScriptBuf {
    let mut bytes = vec![0x52];
    for tag in [0x02u8, 0x03, 0x04] {
        bytes.push(0x21);
        bytes.push(0x02);
        bytes.extend_from_slice(&[tag; 32]);
    }
    bytes.extend_from_slice(&[0x53, 0xae]);
    ScriptBuf::from_bytes(bytes)
}

pub fn product() -> ProductDetail {
    ProductDetail {
        min_transaction_value: Wei::new(5 * MILLI_RBTC),
        max_transaction_value: Wei::new(1_000 * MILLI_RBTC),
        fee: Some(CALL_FEE),
        fixed_fee: Some(CALL_FEE),
        fee_percentage: Some(0.0),
        required_confirmations: PEGIN_CONFIRMATIONS,
        locking_cap: None,
    }
}

pub fn provider(id: u64, rsk_address: RskAddress) -> LiquidityProvider {
    LiquidityProvider {
        id,
        name: format!("provider-{id}"),
        api_base_url: format!("http://provider-{id}.invalid"),
        status: true,
        provider_type: ProviderType::Both,
        rsk_address: Some(rsk_address),
        pegin: product(),
        pegout: product(),
    }
}

pub fn pegin_request() -> PeginQuoteRequest {
    PeginQuoteRequest {
        call_eoa_or_contract_address: rsk_address(0xde),
        call_contract_arguments: CallData::default(),
        value_to_transfer: VALUE,
        rsk_refund_address: rsk_address(0xaa),
    }
}

pub fn pegout_request() -> PegoutQuoteRequest {
    PegoutQuoteRequest {
        to: btc_address(0x0d),
        value_to_transfer: VALUE,
        rsk_refund_address: rsk_address(0xaa),
    }
}

pub fn pegin_quote(request: &PeginQuoteRequest, lp: RskAddress, agreement: u64) -> PeginQuote {
    PeginQuote {
        fed_btc_addr: federation_address(),
        lbc_addr: lbc_address(),
        lp_rsk_addr: lp,
        btc_refund_addr: btc_address(0xbf),
        rsk_refund_addr: request.rsk_refund_address,
        lp_btc_addr: btc_address(0x1f),
        call_fee: CALL_FEE,
        penalty_fee: Wei::new(MILLI_RBTC),
        contract_addr: request.call_eoa_or_contract_address,
        data: request.call_contract_arguments.clone(),
        gas_limit: 21_000,
        nonce: 7_318_261_054_211_985_733,
        value: request.value_to_transfer,
        agreement_timestamp: agreement,
        time_for_deposit: TIME_FOR_DEPOSIT,
        lp_call_time: LP_CALL_TIME,
        confirmations: PEGIN_CONFIRMATIONS,
        call_on_register: false,
        gas_fee: GAS_FEE,
        product_fee_amount: Wei::ZERO,
    }
}

pub fn pegout_quote(request: &PegoutQuoteRequest, lp: RskAddress, agreement: u64) -> PegoutQuote {
    PegoutQuote {
        lbc_address: lbc_address(),
        liquidity_provider_rsk_address: lp,
        btc_refund_address: btc_address(0xbf),
        rsk_refund_address: request.rsk_refund_address,
        lp_btc_addr: btc_address(0x1f),
        call_fee: CALL_FEE,
        penalty_fee: Wei::new(MILLI_RBTC),
        nonce: -42,
        deposit_addr: request.to.clone(),
        value: request.value_to_transfer,
        agreement_timestamp: agreement,
        deposit_date_limit: agreement + DEPOSIT_WINDOW,
        deposit_confirmations: 2,
        transfer_confirmations: 1,
        transfer_time: 1_800,
        expire_date: agreement + EXPIRE_WINDOW,
        expire_blocks: EXPIRE_BLOCKS,
        gas_fee: GAS_FEE,
        product_fee_amount: Wei::ZERO,
    }
}

pub fn raw_pegin(quote: &PeginQuote) -> Result<RawPeginQuoteResponse> {
    let value = serde_json::to_value(quote).context("encode pegin quote")?;
    Ok(RawPeginQuoteResponse {
        quote: serde_json::from_value(value).context("decode raw pegin quote")?,
        quote_hash: Some(quote_hash(&Quote::Pegin(quote.clone())).to_string()),
    })
}

pub fn raw_pegout(quote: &PegoutQuote) -> Result<RawPegoutQuoteResponse> {
    let value = serde_json::to_value(quote).context("encode pegout quote")?;
    Ok(RawPegoutQuoteResponse {
        quote: serde_json::from_value(value).context("decode raw pegout quote")?,
        quote_hash: Some(quote_hash(&Quote::Pegout(quote.clone())).to_string()),
    })
}

pub fn validated_pegin(provider: &LiquidityProvider, agreement: u64) -> Result<ValidatedQuote> {
    let request = pegin_request();
    let lp = provider.rsk_address.context("provider rsk address")?;
    let raw = raw_pegin(&pegin_quote(&request, lp, agreement))?;
    QuoteValidator::new(NETWORK, provider)?
        .validate_pegin(&request, raw)
        .context("validate pegin quote")
}

pub fn validated_pegout(provider: &LiquidityProvider, agreement: u64) -> Result<ValidatedQuote> {
    let request = pegout_request();
    let lp = provider.rsk_address.context("provider rsk address")?;
    let raw = raw_pegout(&pegout_quote(&request, lp, agreement))?;
    QuoteValidator::new(NETWORK, provider)?
        .validate_pegout(&request, raw)
        .context("validate pegout quote")
}
