mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use flyover_swap::amount::Wei;
use flyover_swap::chain::LbcEvent;
use flyover_swap::error::{ErrorKind, FlyoverError};
use flyover_swap::quote::{PegoutQuote, Quote, QuoteHash};
use flyover_swap::retry::{Cancellation, cancellation};
use flyover_swap::swap::monitor::{DestinationEvidence, SourceEvidence};
use flyover_swap::swap::{AcceptedQuote, EvidenceRule, PaymentMonitor};

use support::chain::{FakeBitcoin, FakeRsk};
use support::flow::{self, fast_monitor_config};
use support::fixtures;
use support::wait::wait_until;

const TIP: u32 = 100;
const RSK_BLOCK: u64 = 1_000;

fn chains() -> (Arc<FakeBitcoin>, Arc<FakeRsk>) {
    (
        Arc::new(FakeBitcoin::new(TIP)),
        Arc::new(FakeRsk::new(RSK_BLOCK)),
    )
}

fn call_for_user(accepted: &AcceptedQuote, success: bool, block_number: u64) -> LbcEvent {
    LbcEvent::CallForUser {
        quote_hash: *accepted.hash(),
        from: accepted.quote().quote().provider_rsk_address(),
        dest: fixtures::pegin_request().call_eoa_or_contract_address,
        value: fixtures::VALUE,
        success,
        block_number,
    }
}

fn total_sats(accepted: &AcceptedQuote) -> Result<u64> {
    accepted
        .quote()
        .quote()
        .total()
        .and_then(Wei::to_satoshis_ceil)
        .context("quote total in sats")
}

#[tokio::test]
async fn pegin_deposit_and_delivery_are_paid_within_a_few_polls() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    let mut config = fast_monitor_config();
    config.pegin_rule = EvidenceRule::Both;
    let monitor = PaymentMonitor::new(btc.clone(), rsk.clone(), config);

    let mut session = monitor.session(accepted.clone(), Cancellation::never());
    let task = tokio::spawn(async move { session.wait_paid().await });

    wait_until("monitor to start polling", Duration::from_secs(5), || {
        let rsk = rsk.clone();
        async move { Ok((rsk.calls() >= 2).then_some(())) }
    })
    .await?;

    btc.pay(accepted.deposit_address(), total_sats(&accepted)?, Some(TIP + 1));
    btc.mine(2);
    rsk.emit(call_for_user(&accepted, true, RSK_BLOCK + 1));

    let status = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .context("monitor did not finish")?
        .context("monitor task panicked")??;
    assert!(status.is_paid);
    assert!(status.polls < 50);
    assert!(matches!(
        status.evidence.destination,
        Some(DestinationEvidence::CallForUser { success: true, .. })
    ));
    assert!(matches!(
        status.evidence.source,
        Some(SourceEvidence::BtcDeposit {
            confirmed_sats,
            required_sats,
            required_confirmations: 2,
        }) if confirmed_sats == required_sats
    ));
    Ok(())
}

#[tokio::test]
async fn failed_call_for_user_is_not_payment() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    rsk.emit(call_for_user(&accepted, false, RSK_BLOCK));
    let monitor = PaymentMonitor::new(btc, rsk, fast_monitor_config());

    let status = monitor
        .session(accepted, Cancellation::never())
        .poll()
        .await?;
    assert!(!status.is_paid);
    Ok(())
}

#[tokio::test]
async fn source_rule_waits_for_deposit_confirmations() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    let mut config = fast_monitor_config();
    config.pegin_rule = EvidenceRule::Source;
    let monitor = PaymentMonitor::new(btc.clone(), rsk, config);
    let mut session = monitor.session(accepted.clone(), Cancellation::never());

    let status = session.poll().await?;
    assert_eq!(status.evidence.source, Some(SourceEvidence::NoDeposit));
    assert_eq!(status.evidence.destination, None);

    btc.pay(accepted.deposit_address(), total_sats(&accepted)?, Some(TIP));
    let status = session.poll().await?;
    assert!(!status.is_paid, "one confirmation is not enough");

    btc.mine(1);
    let status = session.poll().await?;
    assert!(status.is_paid);
    assert_eq!(status.polls, 3);
    Ok(())
}

#[tokio::test]
async fn underpaid_deposit_is_not_payment() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    let mut config = fast_monitor_config();
    config.pegin_rule = EvidenceRule::Both;
    btc.pay(accepted.deposit_address(), total_sats(&accepted)? - 1, Some(TIP - 5));
    rsk.emit(call_for_user(&accepted, true, RSK_BLOCK));
    let monitor = PaymentMonitor::new(btc, rsk, config);

    let status = monitor
        .session(accepted, Cancellation::never())
        .poll()
        .await?;
    assert!(!status.is_paid);
    assert!(status.evidence.destination.is_some());
    Ok(())
}

#[tokio::test]
async fn transient_chain_failures_are_retried() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    rsk.emit(call_for_user(&accepted, true, RSK_BLOCK));
    rsk.fail_next(2);
    let monitor = PaymentMonitor::new(btc, rsk, fast_monitor_config());

    let status = monitor
        .session(accepted, Cancellation::never())
        .poll()
        .await
        .context("poll through transient failures")?;
    assert!(status.is_paid);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_report_payment_check_unavailable() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    rsk.set_unavailable(true);
    let monitor = PaymentMonitor::new(btc, rsk.clone(), fast_monitor_config());

    let err = monitor
        .session(accepted, Cancellation::never())
        .poll()
        .await
        .unwrap_err();
    match &err {
        FlyoverError::PaymentCheckUnavailable { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("expected PaymentCheckUnavailable, got {other:?}"),
    }
    assert!(err.is_recoverable());
    assert_eq!(rsk.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn paid_is_never_revoked_within_a_session() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    rsk.emit(call_for_user(&accepted, true, RSK_BLOCK));
    let monitor = PaymentMonitor::new(btc, rsk.clone(), fast_monitor_config());
    let mut session = monitor.session(accepted, Cancellation::never());

    assert!(session.poll().await?.is_paid);
    rsk.set_unavailable(true);
    for _ in 0..3 {
        assert!(session.poll().await?.is_paid);
    }
    assert!(session.is_paid());
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_waiting() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    let mut config = fast_monitor_config();
    config.poll_interval_ms = 60_000;
    config.max_polls = None;
    let monitor = PaymentMonitor::new(btc, rsk, config);

    let (handle, cancel) = cancellation();
    let mut session = monitor.session(accepted, cancel);
    let task = tokio::spawn(async move { session.wait_paid().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .context("cancelled monitor did not stop")?
        .context("monitor task panicked")?;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    Ok(())
}

#[tokio::test]
async fn poll_budget_returns_last_unpaid_status() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegin().await?;
    let (btc, rsk) = chains();
    let mut config = fast_monitor_config();
    config.max_polls = Some(3);
    let monitor = PaymentMonitor::new(btc, rsk, config);

    let status = monitor
        .session(accepted, Cancellation::never())
        .wait_paid()
        .await?;
    assert!(!status.is_paid);
    assert_eq!(status.polls, 3);
    Ok(())
}

#[tokio::test]
async fn pegout_needs_deposit_and_bitcoin_transfer() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegout().await?;
    let Quote::Pegout(quote) = accepted.quote().quote().clone() else {
        anyhow::bail!("expected a pegout quote");
    };
    let (btc, rsk) = chains();
    let monitor = PaymentMonitor::new(btc.clone(), rsk.clone(), fast_monitor_config());
    let mut session = monitor.session(accepted.clone(), Cancellation::never());

    rsk.emit(LbcEvent::PegOutDeposit {
        quote_hash: *accepted.hash(),
        sender: quote.rsk_refund_address,
        amount: accepted.quote().quote().total().context("total")?,
        timestamp: fixtures::AGREEMENT + 120,
        block_number: RSK_BLOCK - 1,
    });
    let status = session.poll().await?;
    assert!(status.evidence.source.as_ref().is_some_and(SourceEvidence::is_sufficient));
    assert!(!status.is_paid, "provider has not paid bitcoin yet");

    btc.pay_for_quote(
        &quote.deposit_addr,
        quote.value.to_satoshis_floor(),
        Some(TIP),
        accepted.hash(),
    );
    let status = session.poll().await?;
    assert!(status.is_paid);
    assert!(matches!(
        status.evidence.destination,
        Some(DestinationEvidence::BtcTransfer { .. })
    ));
    Ok(())
}

fn pegout_deposit(accepted: &AcceptedQuote, quote: &PegoutQuote) -> Result<LbcEvent> {
    Ok(LbcEvent::PegOutDeposit {
        quote_hash: *accepted.hash(),
        sender: quote.rsk_refund_address,
        amount: accepted.quote().quote().total().context("total")?,
        timestamp: fixtures::AGREEMENT + 120,
        block_number: RSK_BLOCK - 1,
    })
}

#[tokio::test]
async fn bitcoin_already_held_by_the_user_is_not_delivery() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegout().await?;
    let Quote::Pegout(quote) = accepted.quote().quote().clone() else {
        anyhow::bail!("expected a pegout quote");
    };
    let (btc, rsk) = chains();
    let monitor = PaymentMonitor::new(btc.clone(), rsk.clone(), fast_monitor_config());
    let mut session = monitor.session(accepted.clone(), Cancellation::never());

    let value_sats = quote.value.to_satoshis_floor();
    btc.pay(&quote.deposit_addr, value_sats, Some(5));
    rsk.emit(pegout_deposit(&accepted, &quote)?);

    let status = session.poll().await?;
    assert!(!status.is_paid, "evidence: {:?}", status.evidence);
    assert_eq!(
        status.evidence.destination,
        Some(DestinationEvidence::NotFulfilled)
    );

    btc.pay(&quote.deposit_addr, value_sats, Some(TIP));
    let status = session.poll().await?;
    assert!(!status.is_paid, "untagged transfer: {:?}", status.evidence);

    let mut other = *accepted.hash().as_bytes();
    other[0] ^= 0xff;
    btc.pay_for_quote(
        &quote.deposit_addr,
        value_sats,
        Some(TIP),
        &QuoteHash::new(other),
    );
    let status = session.poll().await?;
    assert!(!status.is_paid, "transfer for another quote: {:?}", status.evidence);

    btc.pay_for_quote(&quote.deposit_addr, value_sats, Some(TIP), accepted.hash());
    let status = session.poll().await?;
    assert!(status.is_paid);
    assert_eq!(
        status.evidence.destination,
        Some(DestinationEvidence::BtcTransfer {
            confirmed_sats: value_sats,
            required_sats: value_sats,
            required_confirmations: u32::from(quote.transfer_confirmations),
        })
    );
    Ok(())
}

#[tokio::test]
async fn bridge_settlement_counts_as_pegout_delivery() -> Result<()> {
    let flow::Accepted { accepted, .. } = flow::accept_pegout().await?;
    let Quote::Pegout(quote) = accepted.quote().quote().clone() else {
        anyhow::bail!("expected a pegout quote");
    };
    let (btc, rsk) = chains();
    let monitor = PaymentMonitor::new(btc, rsk.clone(), fast_monitor_config());
    let mut session = monitor.session(accepted.clone(), Cancellation::never());

    rsk.emit(pegout_deposit(&accepted, &quote)?);
    rsk.emit(LbcEvent::PegOutRefunded {
        quote_hash: *accepted.hash(),
        block_number: RSK_BLOCK,
    });

    let status = session.poll().await?;
    assert!(status.is_paid);
    assert_eq!(
        status.evidence.destination,
        Some(DestinationEvidence::PegOutSettled {
            block_number: RSK_BLOCK
        })
    );
    Ok(())
}
