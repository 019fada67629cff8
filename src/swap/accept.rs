use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bitcoin::{Network, ScriptBuf};

use super::AcceptedQuote;
use super::admission::AdmissionGuard;
use crate::chain::RskAddress;
use crate::chain::btc::{is_p2sh, parse_address};
use crate::clock::Clock;
use crate::error::{FlyoverError, Result, SignatureParty};
use crate::provider::{LiquidityProvider, LiquidityProviderApi, RawAcceptance};
use crate::quote::hash::pegin_deposit_address;
use crate::quote::{Quote, QuoteHash, ValidatedQuote};
use crate::signer::{QuoteSignature, QuoteSigner, sign_quote, verify_signature};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceConfig {
    pub network: Network,
    pub verify_provider_signature: bool,
    /// When set, pegin deposit addresses must derive from the quote hash and this script.
    pub federation_redeem_script: Option<ScriptBuf>,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            verify_provider_signature: true,
            federation_redeem_script: None,
        }
    }
}

pub trait AcceptanceLedger: Send + Sync {
    fn find(&self, quote_hash: &QuoteHash) -> Result<Option<AcceptedQuote>>;

    /// Stores `accepted` unless its hash is already present, and returns the stored record.
    fn record(&self, accepted: &AcceptedQuote) -> Result<AcceptedQuote>;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<QuoteHash, AcceptedQuote>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AcceptanceLedger for MemoryLedger {
    fn find(&self, quote_hash: &QuoteHash) -> Result<Option<AcceptedQuote>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(quote_hash).cloned())
    }

    fn record(&self, accepted: &AcceptedQuote) -> Result<AcceptedQuote> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .entry(*accepted.hash())
            .or_insert_with(|| accepted.clone())
            .clone())
    }
}

pub struct AcceptanceEngine {
    provider: LiquidityProvider,
    lp: Arc<dyn LiquidityProviderApi>,
    ledger: Arc<dyn AcceptanceLedger>,
    clock: Arc<dyn Clock>,
    signer: Option<Arc<dyn QuoteSigner>>,
    guard: AdmissionGuard,
    config: AcceptanceConfig,
}

impl AcceptanceEngine {
    pub fn new(
        provider: LiquidityProvider,
        lp: Arc<dyn LiquidityProviderApi>,
        ledger: Arc<dyn AcceptanceLedger>,
        clock: Arc<dyn Clock>,
        config: AcceptanceConfig,
    ) -> Self {
        Self {
            provider,
            lp,
            ledger,
            clock,
            signer: None,
            guard: AdmissionGuard::new(),
            config,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn QuoteSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn provider(&self) -> &LiquidityProvider {
        &self.provider
    }

    pub fn guard(&self) -> &AdmissionGuard {
        &self.guard
    }

    fn signer(&self) -> Result<&Arc<dyn QuoteSigner>> {
        self.signer
            .as_ref()
            .ok_or_else(|| FlyoverError::Signer("no quote signer configured".into()))
    }

    pub fn sign_quote(&self, quote: &ValidatedQuote) -> Result<QuoteSignature> {
        quote.verify_commitment()?;
        sign_quote(self.signer()?.as_ref(), quote.hash())
    }

    pub async fn accept(&self, quote: &ValidatedQuote) -> Result<AcceptedQuote> {
        self.submit(quote, None).await
    }

    pub async fn accept_authenticated(&self, quote: &ValidatedQuote) -> Result<AcceptedQuote> {
        let signature = self.sign_quote(quote)?;
        self.accept_with_signature(quote, signature).await
    }

    /// Authenticated acceptance with a signature produced elsewhere. The signature must recover
    /// to the configured signer's address before anything is sent.
    pub async fn accept_with_signature(
        &self,
        quote: &ValidatedQuote,
        signature: QuoteSignature,
    ) -> Result<AcceptedQuote> {
        let expected = self.signer()?.address();
        verify_signature(quote.hash().as_bytes(), &signature, &expected).map_err(|reason| {
            FlyoverError::InvalidSignature {
                party: SignatureParty::Client,
                quote_hash: *quote.hash(),
                reason,
            }
        })?;
        self.submit(quote, Some(signature)).await
    }

    async fn submit(
        &self,
        quote: &ValidatedQuote,
        client_signature: Option<QuoteSignature>,
    ) -> Result<AcceptedQuote> {
        let hash = *quote.hash();
        let direction = quote.direction();

        if quote.provider_id() != self.provider.id {
            return Err(FlyoverError::invalid_request(
                "provider",
                format!(
                    "quote {hash} was issued by provider {}, engine serves {}",
                    quote.provider_id(),
                    self.provider.id
                ),
            ));
        }

        if let Some(existing) = self.ledger.find(&hash)? {
            tracing::debug!(quote_hash = %hash, "quote already accepted, returning stored record");
            return Ok(existing);
        }

        let deadline = quote.quote().deposit_deadline();
        let now = self.clock.now_unix();
        if now > deadline {
            return Err(FlyoverError::QuoteExpired {
                quote_hash: hash,
                deadline,
            });
        }

        quote.verify_commitment()?;
        self.guard.precheck(&self.provider, quote);

        let response = match &client_signature {
            None => self.lp.accept_quote(direction, &hash).await,
            Some(signature) => {
                self.lp
                    .accept_authenticated_quote(direction, &hash, signature)
                    .await
            }
        }
        .map_err(|e| self.guard.classify(self.provider.id, direction, Some(quote), e))?;

        let (signature, deposit_address) = self.check_response(quote, response)?;
        let accepted =
            AcceptedQuote::new(quote.clone(), signature, deposit_address, client_signature);

        let stored = self.ledger.record(&accepted)?;
        if stored.signature() != accepted.signature() {
            return Err(FlyoverError::AlreadyAccepted { quote_hash: hash });
        }

        self.guard.record(quote);
        tracing::info!(
            quote_hash = %hash,
            provider_id = self.provider.id,
            %direction,
            deposit_address = %stored.deposit_address(),
            authenticated = stored.client_signature().is_some(),
            "quote accepted"
        );
        Ok(stored)
    }

    fn check_response(
        &self,
        quote: &ValidatedQuote,
        response: RawAcceptance,
    ) -> Result<(QuoteSignature, String)> {
        let hash = quote.hash();
        let signature = response
            .signature
            .map(QuoteSignature::from)
            .ok_or_else(|| FlyoverError::malformed("signature", "missing from acceptance"))?;

        if self.config.verify_provider_signature {
            let provider = quote.quote().provider_rsk_address();
            verify_signature(hash.as_bytes(), &signature, &provider).map_err(|reason| {
                FlyoverError::InvalidSignature {
                    party: SignatureParty::Provider,
                    quote_hash: *hash,
                    reason,
                }
            })?;
        }

        let deposit_address = response
            .deposit_address
            .ok_or_else(|| FlyoverError::malformed("depositAddress", "missing from acceptance"))?;
        let deposit_address = match quote.quote() {
            Quote::Pegin(pegin) => {
                let address = parse_address(&deposit_address, self.config.network)
                    .map_err(|e| FlyoverError::malformed("depositAddress", e))?;
                if !is_p2sh(&address) {
                    return Err(FlyoverError::malformed(
                        "depositAddress",
                        format!("pegin deposit address {address} is not P2SH"),
                    ));
                }
                if let Some(redeem_script) = &self.config.federation_redeem_script {
                    let derived =
                        pegin_deposit_address(pegin, hash, redeem_script, self.config.network)
                            .map_err(|e| FlyoverError::malformed("depositAddress", e))?;
                    if derived != address {
                        return Err(FlyoverError::malformed(
                            "depositAddress",
                            format!(
                                "pegin deposit address {address} does not derive from the quote, \
                                 expected {derived}"
                            ),
                        ));
                    }
                }
                address.to_string()
            }
            Quote::Pegout(_) => {
                let address: RskAddress = deposit_address
                    .parse()
                    .map_err(|e| FlyoverError::malformed("depositAddress", e))?;
                let lbc = quote.quote().lbc_address();
                if address != lbc {
                    return Err(FlyoverError::malformed(
                        "depositAddress",
                        format!(
                            "pegout deposit address {address} is not the bridge contract {lbc}"
                        ),
                    ));
                }
                address.to_string()
            }
        };

        Ok((signature, deposit_address))
    }
}
