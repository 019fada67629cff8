use bitcoin::opcodes::all::OP_DROP;
use bitcoin::script::Builder;
use bitcoin::{Address, Network, Script, ScriptBuf};
use sha3::{Digest as _, Keccak256};

use super::{PeginQuote, PegoutQuote, Quote, QuoteHash};
use crate::amount::Wei;
use crate::chain::RskAddress;

enum Token<'a> {
    Word([u8; 32]),
    Bytes(&'a [u8]),
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

impl Token<'_> {
    fn uint(value: u64) -> Self {
        Token::Word(uint_word(value))
    }

    fn int(value: i64) -> Self {
        let fill = if value < 0 { 0xff } else { 0x00 };
        let mut word = [fill; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        Token::Word(word)
    }

    fn bool(value: bool) -> Self {
        Token::uint(u64::from(value))
    }

    fn wei(value: Wei) -> Self {
        Token::Word(value.to_word())
    }

    fn address(value: &RskAddress) -> Self {
        Token::Word(value.to_word())
    }
}

fn direction_tag(name: &str) -> Token<'static> {
    Token::Word(Keccak256::digest(name.as_bytes()).into())
}

fn abi_encode(tokens: &[Token<'_>]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Word(word) => head.extend_from_slice(word),
            Token::Bytes(bytes) => {
                let offset = (head_len + tail.len()) as u64;
                head.extend_from_slice(&uint_word(offset));

                tail.extend_from_slice(&uint_word(bytes.len() as u64));
                tail.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat_n(0u8, padding));
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn pegin_tokens(q: &PeginQuote) -> Vec<Token<'_>> {
    vec![
        direction_tag("PeginQuote"),
        Token::Bytes(q.fed_btc_addr.as_bytes()),
        Token::address(&q.lbc_addr),
        Token::address(&q.lp_rsk_addr),
        Token::Bytes(q.btc_refund_addr.as_bytes()),
        Token::address(&q.rsk_refund_addr),
        Token::Bytes(q.lp_btc_addr.as_bytes()),
        Token::wei(q.call_fee),
        Token::wei(q.penalty_fee),
        Token::address(&q.contract_addr),
        Token::Bytes(q.data.as_bytes()),
        Token::uint(u64::from(q.gas_limit)),
        Token::int(q.nonce),
        Token::wei(q.value),
        Token::uint(q.agreement_timestamp),
        Token::uint(u64::from(q.time_for_deposit)),
        Token::uint(u64::from(q.lp_call_time)),
        Token::uint(u64::from(q.confirmations)),
        Token::bool(q.call_on_register),
        Token::wei(q.gas_fee),
        Token::wei(q.product_fee_amount),
    ]
}

fn pegout_tokens(q: &PegoutQuote) -> Vec<Token<'_>> {
    vec![
        direction_tag("PegoutQuote"),
        Token::address(&q.lbc_address),
        Token::address(&q.liquidity_provider_rsk_address),
        Token::Bytes(q.btc_refund_address.as_bytes()),
        Token::address(&q.rsk_refund_address),
        Token::Bytes(q.lp_btc_addr.as_bytes()),
        Token::wei(q.call_fee),
        Token::wei(q.penalty_fee),
        Token::int(q.nonce),
        Token::Bytes(q.deposit_addr.as_bytes()),
        Token::wei(q.value),
        Token::uint(q.agreement_timestamp),
        Token::uint(q.deposit_date_limit),
        Token::uint(u64::from(q.deposit_confirmations)),
        Token::uint(u64::from(q.transfer_confirmations)),
        Token::uint(u64::from(q.transfer_time)),
        Token::uint(q.expire_date),
        Token::uint(q.expire_blocks),
        Token::wei(q.gas_fee),
        Token::wei(q.product_fee_amount),
    ]
}

pub fn canonical_encoding(quote: &Quote) -> Vec<u8> {
    match quote {
        Quote::Pegin(q) => abi_encode(&pegin_tokens(q)),
        Quote::Pegout(q) => abi_encode(&pegout_tokens(q)),
    }
}

pub fn quote_hash(quote: &Quote) -> QuoteHash {
    QuoteHash::new(Keccak256::digest(canonical_encoding(quote)).into())
}

/// Address the bridge contract expects the user to fund for a pegin: P2SH of
/// `<keccak256(hash ++ btcRefundAddr ++ lbcAddr ++ lpBTCAddr)> OP_DROP <federation script>`,
/// with the bitcoin addresses in their base58check payload form.
pub fn pegin_deposit_address(
    quote: &PeginQuote,
    hash: &QuoteHash,
    federation_redeem_script: &Script,
    network: Network,
) -> Result<Address, String> {
    let refund = base58_payload("btcRefundAddr", &quote.btc_refund_addr)?;
    let lp_btc = base58_payload("lpBTCAddr", &quote.lp_btc_addr)?;

    let mut preimage = Vec::with_capacity(32 + refund.len() + 20 + lp_btc.len());
    preimage.extend_from_slice(hash.as_bytes());
    preimage.extend_from_slice(&refund);
    preimage.extend_from_slice(quote.lbc_addr.as_bytes());
    preimage.extend_from_slice(&lp_btc);
    let derivation: [u8; 32] = Keccak256::digest(&preimage).into();

    let mut script = Builder::new()
        .push_slice(derivation)
        .push_opcode(OP_DROP)
        .into_script()
        .into_bytes();
    script.extend_from_slice(federation_redeem_script.as_bytes());
    Address::p2sh(&ScriptBuf::from_bytes(script), network)
        .map_err(|e| format!("deposit redeem script: {e}"))
}

fn base58_payload(field: &str, address: &str) -> Result<Vec<u8>, String> {
    bitcoin::base58::decode_check(address.trim())
        .map_err(|e| format!("{field} {address:?} is not a base58 address: {e}"))
}
