use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AcceptedQuote;
use crate::amount::Wei;
use crate::chain::btc::confirmed_value;
use crate::chain::{BitcoinConnection, EventFilter, LbcEvent, LbcEventKind, RskConnection};
use crate::error::{FlyoverError, Result};
use crate::quote::{Direction, Quote, QuoteHash};
use crate::retry::{Cancellation, RetryPolicy, with_retries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRule {
    Destination,
    Source,
    Both,
}

impl EvidenceRule {
    fn needs_source(self) -> bool {
        matches!(self, EvidenceRule::Source | EvidenceRule::Both)
    }

    fn needs_destination(self) -> bool {
        matches!(self, EvidenceRule::Destination | EvidenceRule::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub max_polls: Option<u32>,
    pub retry: RetryPolicy,
    pub pegin_rule: EvidenceRule,
    pub pegout_rule: EvidenceRule,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            call_timeout_ms: 30_000,
            max_polls: Some(360),
            retry: RetryPolicy::default(),
            pegin_rule: EvidenceRule::Destination,
            pegout_rule: EvidenceRule::Both,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn rule(&self, direction: Direction) -> EvidenceRule {
        match direction {
            Direction::Pegin => self.pegin_rule,
            Direction::Pegout => self.pegout_rule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvidence {
    NoDeposit,
    BtcDeposit {
        confirmed_sats: u64,
        required_sats: u64,
        required_confirmations: u32,
    },
    RskDeposit {
        amount: Wei,
        required: Wei,
        required_confirmations: u64,
    },
}

impl SourceEvidence {
    pub fn is_sufficient(&self) -> bool {
        match self {
            SourceEvidence::NoDeposit => false,
            SourceEvidence::BtcDeposit {
                confirmed_sats,
                required_sats,
                ..
            } => confirmed_sats >= required_sats,
            SourceEvidence::RskDeposit {
                amount, required, ..
            } => amount >= required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationEvidence {
    NotFulfilled,
    CallForUser {
        success: bool,
        value: Wei,
        block_number: u64,
    },
    BtcTransfer {
        confirmed_sats: u64,
        required_sats: u64,
        required_confirmations: u32,
    },
    PegOutSettled { block_number: u64 },
}

impl DestinationEvidence {
    pub fn is_fulfilled(&self) -> bool {
        match self {
            DestinationEvidence::NotFulfilled => false,
            DestinationEvidence::CallForUser { success, .. } => *success,
            DestinationEvidence::BtcTransfer {
                confirmed_sats,
                required_sats,
                ..
            } => confirmed_sats >= required_sats,
            DestinationEvidence::PegOutSettled { .. } => true,
        }
    }
}

/// `None` means the rule did not ask for that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvidence {
    pub source: Option<SourceEvidence>,
    pub destination: Option<DestinationEvidence>,
}

impl PaymentEvidence {
    pub fn satisfies(&self, rule: EvidenceRule) -> bool {
        let source = self.source.as_ref().is_some_and(SourceEvidence::is_sufficient);
        let destination = self
            .destination
            .as_ref()
            .is_some_and(DestinationEvidence::is_fulfilled);
        match rule {
            EvidenceRule::Destination => destination,
            EvidenceRule::Source => source,
            EvidenceRule::Both => source && destination,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatus {
    pub is_paid: bool,
    pub evidence: PaymentEvidence,
    pub polls: u32,
}

#[derive(Clone)]
pub struct PaymentMonitor {
    btc: Arc<dyn BitcoinConnection>,
    rsk: Arc<dyn RskConnection>,
    config: MonitorConfig,
}

impl PaymentMonitor {
    pub fn new(
        btc: Arc<dyn BitcoinConnection>,
        rsk: Arc<dyn RskConnection>,
        config: MonitorConfig,
    ) -> Self {
        Self { btc, rsk, config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn session(&self, accepted: AcceptedQuote, cancel: Cancellation) -> MonitorSession {
        let id = Uuid::new_v4();
        tracing::debug!(
            session_id = %id,
            quote_hash = %accepted.hash(),
            direction = %accepted.direction(),
            "payment monitor session started"
        );
        MonitorSession {
            id,
            monitor: self.clone(),
            accepted,
            cancel,
            state: PaymentState::Unpaid,
            polls: 0,
        }
    }

    pub async fn check(&self, accepted: &AcceptedQuote) -> Result<PaymentEvidence> {
        let rule = self.config.rule(accepted.direction());
        let destination = if rule.needs_destination() {
            Some(self.destination_evidence(accepted).await?)
        } else {
            None
        };
        let source = if rule.needs_source() {
            Some(self.source_evidence(accepted).await?)
        } else {
            None
        };
        Ok(PaymentEvidence {
            source,
            destination,
        })
    }

    async fn destination_evidence(&self, accepted: &AcceptedQuote) -> Result<DestinationEvidence> {
        match accepted.quote().quote() {
            Quote::Pegin(_) => {
                let filter = EventFilter::new(LbcEventKind::CallForUser, *accepted.hash());
                let events = self.rsk.get_events(&filter).await?;
                let calls = events.iter().filter_map(|event| match event {
                    LbcEvent::CallForUser {
                        success,
                        value,
                        block_number,
                        ..
                    } => Some(DestinationEvidence::CallForUser {
                        success: *success,
                        value: *value,
                        block_number: *block_number,
                    }),
                    _ => None,
                });
                let mut latest = None;
                for call in calls {
                    if call.is_fulfilled() {
                        return Ok(call);
                    }
                    latest = Some(call);
                }
                Ok(latest.unwrap_or(DestinationEvidence::NotFulfilled))
            }
            Quote::Pegout(q) => {
                let hash = accepted.hash();
                let filter = EventFilter::new(LbcEventKind::PegOutRefunded, *hash);
                let settled = self.rsk.get_events(&filter).await?;
                if let Some(block_number) = settled.iter().find_map(|event| match event {
                    LbcEvent::PegOutRefunded { block_number, .. } => Some(*block_number),
                    _ => None,
                }) {
                    return Ok(DestinationEvidence::PegOutSettled { block_number });
                }

                // Outputs count only when their transaction commits to the quote hash.
                let required_confirmations = u32::from(q.transfer_confirmations);
                let tip = self.btc.tip_height().await?;
                let mut transfers = Vec::new();
                for output in self.btc.watch_address(&q.deposit_addr).await? {
                    if self.commits_to_quote(&output.txid, hash).await? {
                        transfers.push(output);
                    }
                }
                if transfers.is_empty() {
                    return Ok(DestinationEvidence::NotFulfilled);
                }
                Ok(DestinationEvidence::BtcTransfer {
                    confirmed_sats: confirmed_value(&transfers, tip, required_confirmations),
                    required_sats: q.value.to_satoshis_floor(),
                    required_confirmations,
                })
            }
        }
    }

    async fn commits_to_quote(&self, txid: &str, hash: &QuoteHash) -> Result<bool> {
        let Some(tx) = self.btc.get_transaction(txid).await? else {
            return Ok(false);
        };
        Ok(tx
            .outputs
            .iter()
            .any(|output| output.op_return.as_deref() == Some(hash.as_bytes().as_slice())))
    }

    async fn source_evidence(&self, accepted: &AcceptedQuote) -> Result<SourceEvidence> {
        let quote = accepted.quote().quote();
        let total = quote
            .total()
            .ok_or_else(|| FlyoverError::malformed("value", "value plus fees overflows"))?;

        match quote {
            Quote::Pegin(q) => {
                let required_confirmations = u32::from(q.confirmations);
                let tip = self.btc.tip_height().await?;
                let deposits = self.btc.watch_address(accepted.deposit_address()).await?;
                if deposits.is_empty() {
                    return Ok(SourceEvidence::NoDeposit);
                }
                let required_sats = total.to_satoshis_ceil().ok_or_else(|| {
                    FlyoverError::malformed("value", "total does not fit in satoshis")
                })?;
                Ok(SourceEvidence::BtcDeposit {
                    confirmed_sats: confirmed_value(&deposits, tip, required_confirmations),
                    required_sats,
                    required_confirmations,
                })
            }
            Quote::Pegout(q) => {
                let required_confirmations = u64::from(q.deposit_confirmations);
                let filter = EventFilter::new(LbcEventKind::PegOutDeposit, *accepted.hash());
                let events = self.rsk.get_events(&filter).await?;
                if events.is_empty() {
                    return Ok(SourceEvidence::NoDeposit);
                }
                let head = self.rsk.block_number().await?;
                let amount = events
                    .iter()
                    .filter_map(|event| match event {
                        LbcEvent::PegOutDeposit {
                            amount,
                            block_number,
                            ..
                        } if rsk_confirmations(head, *block_number) >= required_confirmations => {
                            Some(*amount)
                        }
                        _ => None,
                    })
                    .fold(Wei::ZERO, Wei::saturating_add);
                Ok(SourceEvidence::RskDeposit {
                    amount,
                    required: total,
                    required_confirmations,
                })
            }
        }
    }
}

fn rsk_confirmations(head: u64, block_number: u64) -> u64 {
    if head < block_number {
        0
    } else {
        head - block_number + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PaymentState {
    Unpaid,
    Paid(PaymentEvidence),
}

/// Monitoring of one accepted quote. Once `Paid` is observed it is never revoked.
pub struct MonitorSession {
    id: Uuid,
    monitor: PaymentMonitor,
    accepted: AcceptedQuote,
    cancel: Cancellation,
    state: PaymentState,
    polls: u32,
}

impl MonitorSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn accepted(&self) -> &AcceptedQuote {
        &self.accepted
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.state, PaymentState::Paid(_))
    }

    pub async fn poll(&mut self) -> Result<PaymentStatus> {
        self.polls += 1;
        if let PaymentState::Paid(evidence) = &self.state {
            return Ok(PaymentStatus {
                is_paid: true,
                evidence: evidence.clone(),
                polls: self.polls,
            });
        }

        let config = self.monitor.config;
        let monitor = &self.monitor;
        let accepted = &self.accepted;
        let quote_hash = *accepted.hash();
        let evidence = with_retries(
            &config.retry,
            config.call_timeout(),
            &mut self.cancel,
            "payment check",
            move || monitor.check(accepted),
        )
        .await
        .map_err(|e| {
            e.into_error(|attempts, last_error| FlyoverError::PaymentCheckUnavailable {
                quote_hash,
                attempts,
                last_error,
            })
        })?;

        let rule = config.rule(self.accepted.direction());
        let is_paid = evidence.satisfies(rule);
        if is_paid {
            tracing::info!(
                session_id = %self.id,
                quote_hash = %quote_hash,
                polls = self.polls,
                "quote paid"
            );
            self.state = PaymentState::Paid(evidence.clone());
        } else {
            tracing::debug!(
                session_id = %self.id,
                quote_hash = %quote_hash,
                polls = self.polls,
                ?evidence,
                "quote not paid yet"
            );
        }

        Ok(PaymentStatus {
            is_paid,
            evidence,
            polls: self.polls,
        })
    }

    pub async fn wait_paid(&mut self) -> Result<PaymentStatus> {
        let interval = self.monitor.config.poll_interval();
        let max_polls = self.monitor.config.max_polls;
        loop {
            let status = self.poll().await?;
            if status.is_paid {
                return Ok(status);
            }
            if let Some(max) = max_polls
                && self.polls >= max
            {
                tracing::warn!(
                    session_id = %self.id,
                    quote_hash = %self.accepted.hash(),
                    polls = self.polls,
                    "payment monitor poll budget exhausted"
                );
                return Ok(status);
            }
            self.cancel.sleep(interval).await?;
        }
    }
}
