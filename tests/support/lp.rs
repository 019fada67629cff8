use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::ScriptBuf;
use flyover_swap::amount::Wei;
use flyover_swap::chain::RskAddress;
use flyover_swap::provider::{
    LiquidityProvider, LiquidityProviderApi, LpError, LpErrorBody, LpQuoteState,
    QuoteStatusReport, RawAcceptance,
};
use flyover_swap::quote::{
    Direction, PeginQuoteRequest, PegoutQuoteRequest, Quote, QuoteHash, RawPeginQuoteResponse,
    RawPegoutQuoteResponse, quote_hash,
};
use flyover_swap::quote::hash::pegin_deposit_address;
use flyover_swap::signer::{
    QuoteSignature, QuoteSigner as _, Secp256k1Signer, sign_quote, verify_signature,
};

use super::fixtures;

#[derive(Debug, Default)]
struct LpState {
    agreement: u64,
    locking_cap: Option<Wei>,
    committed: Wei,
    quotes: HashMap<QuoteHash, Quote>,
    accepted: HashMap<QuoteHash, RawAcceptance>,
    accept_calls: u32,
    expected_client: Option<RskAddress>,
    corrupt_countersignature: bool,
    next_error: Option<LpError>,
    empty_quotes: bool,
    derivation_script: Option<ScriptBuf>,
}

/// In-memory provider that quotes from the shared fixtures and countersigns with its own key.
pub struct FakeLiquidityProvider {
    provider: LiquidityProvider,
    signer: Secp256k1Signer,
    deposit_address: String,
    state: Mutex<LpState>,
}

impl FakeLiquidityProvider {
    pub fn new(id: u64) -> Self {
        let signer = fixtures::lp_signer();
        let provider = fixtures::provider(id, signer.address());
        Self {
            provider,
            signer,
            deposit_address: fixtures::btc_address(0xd0),
            state: Mutex::new(LpState {
                agreement: fixtures::AGREEMENT,
                ..LpState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LpState> {
        self.state.lock().expect("lp state mutex poisoned")
    }

    pub fn provider(&self) -> LiquidityProvider {
        self.provider.clone()
    }

    pub fn address(&self) -> RskAddress {
        self.signer.address()
    }

    /// Pegin deposit address handed out on acceptance.
    pub fn deposit_address(&self) -> &str {
        &self.deposit_address
    }

    pub fn set_locking_cap(&self, cap: Wei) {
        self.state().locking_cap = Some(cap);
    }

    pub fn require_client(&self, address: RskAddress) {
        self.state().expected_client = Some(address);
    }

    pub fn corrupt_countersignature(&self) {
        self.state().corrupt_countersignature = true;
    }

    pub fn fail_next(&self, err: LpError) {
        self.state().next_error = Some(err);
    }

    /// Hand out pegin deposit addresses derived from each quote instead of the fixed one.
    pub fn derive_deposit_addresses(&self, federation_redeem_script: ScriptBuf) {
        self.state().derivation_script = Some(federation_redeem_script);
    }

    pub fn return_no_quotes(&self) {
        self.state().empty_quotes = true;
    }

    pub fn accept_calls(&self) -> u32 {
        self.state().accept_calls
    }

    fn take_error(&self) -> Result<(), LpError> {
        match self.state().next_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn accept(
        &self,
        quote_hash: &QuoteHash,
        client: Option<&QuoteSignature>,
    ) -> Result<RawAcceptance, LpError> {
        self.take_error()?;
        let mut state = self.state();
        state.accept_calls += 1;

        if let Some(existing) = state.accepted.get(quote_hash) {
            return Ok(existing.clone());
        }

        let quote = state
            .quotes
            .get(quote_hash)
            .cloned()
            .ok_or_else(|| rejected(404, "quote not found"))?;

        if let (Some(expected), Some(signature)) = (state.expected_client, client)
            && verify_signature(quote_hash.as_bytes(), signature, &expected).is_err()
        {
            return Err(rejected(400, "invalid signature"));
        }

        let projected = state.committed.saturating_add(quote.value());
        if state.locking_cap.is_some_and(|cap| projected > cap) {
            return Err(rejected(409, "LockingCapExceeded"));
        }
        state.committed = projected;

        let mut signature = sign_quote(&self.signer, quote_hash)
            .map_err(|e| LpError::Transport(e.to_string()))?
            .to_string();
        if state.corrupt_countersignature {
            signature.replace_range(0..2, if signature.starts_with("00") { "01" } else { "00" });
        }

        let deposit_address = match (&quote, &state.derivation_script) {
            (Quote::Pegin(pegin), Some(script)) => {
                pegin_deposit_address(pegin, quote_hash, script, fixtures::NETWORK)
                    .map_err(LpError::Transport)?
                    .to_string()
            }
            (Quote::Pegin(_), None) => self.deposit_address.clone(),
            (Quote::Pegout(_), _) => quote.lbc_address().to_string(),
        };
        let acceptance = RawAcceptance {
            signature: Some(signature),
            deposit_address: Some(deposit_address),
        };
        state.accepted.insert(*quote_hash, acceptance.clone());
        Ok(acceptance)
    }
}

fn rejected(status: u16, message: &str) -> LpError {
    LpError::Rejected {
        status,
        body: LpErrorBody {
            message: message.to_string(),
            ..LpErrorBody::default()
        },
    }
}

#[async_trait]
impl LiquidityProviderApi for FakeLiquidityProvider {
    async fn providers(&self) -> Result<Vec<LiquidityProvider>, LpError> {
        self.take_error()?;
        Ok(vec![self.provider.clone()])
    }

    async fn pegin_quotes(
        &self,
        request: &PeginQuoteRequest,
    ) -> Result<Vec<RawPeginQuoteResponse>, LpError> {
        self.take_error()?;
        let mut state = self.state();
        if state.empty_quotes {
            return Ok(Vec::new());
        }
        let quote = fixtures::pegin_quote(request, self.signer.address(), state.agreement);
        let raw = fixtures::raw_pegin(&quote).map_err(|e| LpError::Decode(e.to_string()))?;
        let quote = Quote::Pegin(quote);
        state.quotes.insert(quote_hash(&quote), quote);
        Ok(vec![raw])
    }

    async fn pegout_quotes(
        &self,
        request: &PegoutQuoteRequest,
    ) -> Result<Vec<RawPegoutQuoteResponse>, LpError> {
        self.take_error()?;
        let mut state = self.state();
        if state.empty_quotes {
            return Ok(Vec::new());
        }
        let quote = fixtures::pegout_quote(request, self.signer.address(), state.agreement);
        let raw = fixtures::raw_pegout(&quote).map_err(|e| LpError::Decode(e.to_string()))?;
        let quote = Quote::Pegout(quote);
        state.quotes.insert(quote_hash(&quote), quote);
        Ok(vec![raw])
    }

    async fn accept_quote(
        &self,
        _direction: Direction,
        quote_hash: &QuoteHash,
    ) -> Result<RawAcceptance, LpError> {
        self.accept(quote_hash, None)
    }

    async fn accept_authenticated_quote(
        &self,
        _direction: Direction,
        quote_hash: &QuoteHash,
        signature: &QuoteSignature,
    ) -> Result<RawAcceptance, LpError> {
        self.accept(quote_hash, Some(signature))
    }

    async fn quote_status(
        &self,
        _direction: Direction,
        quote_hash: &QuoteHash,
    ) -> Result<QuoteStatusReport, LpError> {
        self.take_error()?;
        let state = self.state();
        let lp_state = if state.accepted.contains_key(quote_hash) {
            LpQuoteState::WaitingForDeposit
        } else {
            LpQuoteState::Unknown
        };
        Ok(QuoteStatusReport {
            state: lp_state,
            user_deposit_tx_hash: None,
            provider_tx_hash: None,
        })
    }
}
