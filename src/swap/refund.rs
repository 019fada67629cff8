use std::sync::Arc;

use async_trait::async_trait;

use super::AcceptedQuote;
use super::monitor::MonitorConfig;
use crate::chain::btc::confirmations;
use crate::chain::{
    BitcoinConnection, BtcDeposit, EventFilter, LbcCall, LbcEvent, LbcEventKind,
    PeginRegistration, RskConnection,
};
use crate::clock::Clock;
use crate::error::{FlyoverError, Result};
use crate::quote::{PeginQuote, PegoutQuote, Quote, QuoteHash};
use crate::retry::Cancellation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    ProviderMissedCallWindow,
    BridgeRejectedDeposit,
    PegoutExpired,
    AwaitingDeposit,
    AwaitingConfirmations,
    FulfillmentWindowOpen,
    PegoutNotExpired,
    Fulfilled,
    AlreadyRefunded,
    AlreadyRegistered,
    NoDeposit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundAction {
    RegisterPegin { btc_txid: String, vout: u32 },
    ClaimBridgeReturn { btc_refund_address: String },
    RefundUserPegout,
}

/// Proof that a refund may be executed. Only the evaluator constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundTrigger {
    quote_hash: QuoteHash,
    action: RefundAction,
    reason: RefundReason,
}

impl RefundTrigger {
    pub fn quote_hash(&self) -> &QuoteHash {
        &self.quote_hash
    }

    pub fn action(&self) -> &RefundAction {
        &self.action
    }

    pub fn reason(&self) -> RefundReason {
        self.reason
    }
}

#[derive(Debug)]
pub enum RefundEligibility {
    Eligible(RefundTrigger),
    NotYetEligible(RefundReason),
    Ineligible(RefundReason),
    /// The check itself failed; says nothing about eligibility.
    Indeterminate(FlyoverError),
}

impl RefundEligibility {
    pub fn is_refundable(&self) -> bool {
        matches!(self, RefundEligibility::Eligible(_))
    }

    pub fn reason(&self) -> Option<RefundReason> {
        match self {
            RefundEligibility::Eligible(trigger) => Some(trigger.reason),
            RefundEligibility::NotYetEligible(reason) | RefundEligibility::Ineligible(reason) => {
                Some(*reason)
            }
            RefundEligibility::Indeterminate(_) => None,
        }
    }
}

/// Executes a refund on chain. One-shot: it consumes the trigger.
#[async_trait]
pub trait RefundExecutor: Send + Sync {
    async fn execute(&self, trigger: RefundTrigger) -> Result<String>;
}

pub struct RefundEvaluator {
    btc: Arc<dyn BitcoinConnection>,
    rsk: Arc<dyn RskConnection>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
}

impl RefundEvaluator {
    pub fn new(
        btc: Arc<dyn BitcoinConnection>,
        rsk: Arc<dyn RskConnection>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            btc,
            rsk,
            clock,
            config,
        }
    }

    pub async fn evaluate(&self, accepted: &AcceptedQuote) -> RefundEligibility {
        let timeout = self.config.call_timeout();
        let outcome = match tokio::time::timeout(timeout, self.decide(accepted)).await {
            Ok(Ok(decided)) => decided,
            Ok(Err(err)) => RefundEligibility::Indeterminate(err),
            Err(_) => RefundEligibility::Indeterminate(FlyoverError::Chain(format!(
                "refund check timed out after {}ms",
                timeout.as_millis()
            ))),
        };
        tracing::debug!(quote_hash = %accepted.hash(), ?outcome, "refund evaluated");
        outcome
    }

    /// Re-evaluates until `Eligible` or `Ineligible`, or until the poll budget runs out.
    pub async fn wait_until_decided(
        &self,
        accepted: &AcceptedQuote,
        mut cancel: Cancellation,
    ) -> Result<RefundEligibility> {
        let retry = self.config.retry;
        let mut failures = 0u32;
        let mut polls = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FlyoverError::Cancelled),
                outcome = self.evaluate(accepted) => outcome,
            };

            match outcome {
                RefundEligibility::Indeterminate(err) => {
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    failures += 1;
                    if failures >= retry.max_attempts.max(1) {
                        return Err(FlyoverError::RefundCheckUnavailable {
                            quote_hash: *accepted.hash(),
                            attempts: failures,
                            last_error: err.to_string(),
                        });
                    }
                    let backoff = retry.backoff(failures);
                    tracing::warn!(
                        quote_hash = %accepted.hash(),
                        attempt = failures,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "refund check failed, retrying"
                    );
                    cancel.sleep(backoff).await?;
                }
                RefundEligibility::NotYetEligible(reason) => {
                    failures = 0;
                    polls += 1;
                    if self.config.max_polls.is_some_and(|max| polls >= max) {
                        return Ok(RefundEligibility::NotYetEligible(reason));
                    }
                    cancel.sleep(self.config.poll_interval()).await?;
                }
                decided => {
                    if let RefundEligibility::Eligible(trigger) = &decided {
                        tracing::info!(
                            quote_hash = %accepted.hash(),
                            reason = ?trigger.reason(),
                            "quote refundable"
                        );
                    }
                    return Ok(decided);
                }
            }
        }
    }

    pub async fn refund_when_eligible(
        &self,
        accepted: &AcceptedQuote,
        executor: &dyn RefundExecutor,
        cancel: Cancellation,
    ) -> Result<Option<String>> {
        match self.wait_until_decided(accepted, cancel).await? {
            RefundEligibility::Eligible(trigger) => {
                let txid = executor.execute(trigger).await?;
                tracing::info!(quote_hash = %accepted.hash(), %txid, "refund submitted");
                Ok(Some(txid))
            }
            _ => Ok(None),
        }
    }

    async fn decide(&self, accepted: &AcceptedQuote) -> Result<RefundEligibility> {
        match accepted.quote().quote() {
            Quote::Pegin(q) => self.decide_pegin(accepted, q).await,
            Quote::Pegout(q) => self.decide_pegout(accepted, q).await,
        }
    }

    async fn events(&self, kind: LbcEventKind, hash: &QuoteHash) -> Result<Vec<LbcEvent>> {
        Ok(self.rsk.get_events(&EventFilter::new(kind, *hash)).await?)
    }

    async fn decide_pegin(
        &self,
        accepted: &AcceptedQuote,
        q: &PeginQuote,
    ) -> Result<RefundEligibility> {
        let hash = accepted.hash();

        let calls = self.events(LbcEventKind::CallForUser, hash).await?;
        if calls
            .iter()
            .any(|e| matches!(e, LbcEvent::CallForUser { success: true, .. }))
        {
            return Ok(RefundEligibility::Ineligible(RefundReason::Fulfilled));
        }

        for event in self.events(LbcEventKind::PegInRegistered, hash).await? {
            let LbcEvent::PegInRegistered { registration, .. } = event else {
                continue;
            };
            match registration {
                PeginRegistration::RefundedToUser => {
                    return Ok(self.eligible(
                        hash,
                        RefundReason::BridgeRejectedDeposit,
                        RefundAction::ClaimBridgeReturn {
                            btc_refund_address: q.btc_refund_addr.clone(),
                        },
                    ));
                }
                PeginRegistration::Transferred(_) | PeginRegistration::RefundedToProvider => {
                    return Ok(RefundEligibility::Ineligible(
                        RefundReason::AlreadyRegistered,
                    ));
                }
                PeginRegistration::Unprocessable(code) => {
                    tracing::warn!(
                        quote_hash = %hash,
                        code,
                        "bridge could not process pegin registration"
                    );
                }
            }
        }

        let now = self.clock.now_unix();
        let tip = self.btc.tip_height().await?;
        let deposits = self.btc.watch_address(accepted.deposit_address()).await?;
        let required = u32::from(q.confirmations);
        let confirmed: Option<&BtcDeposit> = deposits
            .iter()
            .find(|d| confirmations(tip, d.block_height) >= required);

        let Some(deposit) = confirmed else {
            if !deposits.is_empty() {
                return Ok(RefundEligibility::NotYetEligible(
                    RefundReason::AwaitingConfirmations,
                ));
            }
            let deadline = accepted.quote().quote().deposit_deadline();
            return Ok(if now > deadline {
                RefundEligibility::Ineligible(RefundReason::NoDeposit)
            } else {
                RefundEligibility::NotYetEligible(RefundReason::AwaitingDeposit)
            });
        };

        let call_deadline = q
            .agreement_timestamp
            .saturating_add(u64::from(q.time_for_deposit))
            .saturating_add(u64::from(q.lp_call_time));
        if now > call_deadline {
            Ok(self.eligible(
                hash,
                RefundReason::ProviderMissedCallWindow,
                RefundAction::RegisterPegin {
                    btc_txid: deposit.txid.clone(),
                    vout: deposit.vout,
                },
            ))
        } else {
            Ok(RefundEligibility::NotYetEligible(
                RefundReason::FulfillmentWindowOpen,
            ))
        }
    }

    async fn decide_pegout(
        &self,
        accepted: &AcceptedQuote,
        q: &PegoutQuote,
    ) -> Result<RefundEligibility> {
        let hash = accepted.hash();

        if !self
            .events(LbcEventKind::PegOutUserRefunded, hash)
            .await?
            .is_empty()
        {
            return Ok(RefundEligibility::Ineligible(RefundReason::AlreadyRefunded));
        }

        let completed = self
            .rsk
            .call(&LbcCall::IsPegOutQuoteCompleted(*hash))
            .await?
            .into_bool();
        if completed
            || !self
                .events(LbcEventKind::PegOutRefunded, hash)
                .await?
                .is_empty()
        {
            return Ok(RefundEligibility::Ineligible(RefundReason::Fulfilled));
        }

        let now = self.clock.now_unix();
        if self
            .events(LbcEventKind::PegOutDeposit, hash)
            .await?
            .is_empty()
        {
            return Ok(if now > q.deposit_date_limit {
                RefundEligibility::Ineligible(RefundReason::NoDeposit)
            } else {
                RefundEligibility::NotYetEligible(RefundReason::AwaitingDeposit)
            });
        }

        let block = self.rsk.block_number().await?;
        if now > q.expire_date && block > q.expire_blocks {
            Ok(self.eligible(
                hash,
                RefundReason::PegoutExpired,
                RefundAction::RefundUserPegout,
            ))
        } else {
            Ok(RefundEligibility::NotYetEligible(
                RefundReason::PegoutNotExpired,
            ))
        }
    }

    fn eligible(
        &self,
        hash: &QuoteHash,
        reason: RefundReason,
        action: RefundAction,
    ) -> RefundEligibility {
        RefundEligibility::Eligible(RefundTrigger {
            quote_hash: *hash,
            action,
            reason,
        })
    }
}
