use std::sync::Arc;

use anyhow::{Context as _, Result};
use flyover_swap::quote::{QuoteRequest, QuoteValidator, fetch_quotes};
use flyover_swap::retry::RetryPolicy;
use flyover_swap::swap::{
    AcceptanceConfig, AcceptanceEngine, AcceptedQuote, EvidenceRule, MemoryLedger, MonitorConfig,
};

use super::clock::ManualClock;
use super::fixtures::{self, AGREEMENT, NETWORK, PROVIDER_ID};
use super::lp::FakeLiquidityProvider;

pub struct Accepted {
    pub lp: Arc<FakeLiquidityProvider>,
    pub clock: Arc<ManualClock>,
    pub accepted: AcceptedQuote,
}

/// Quotes and accepts against a fresh fake provider, one minute after the agreement time.
pub async fn accept(request: QuoteRequest) -> Result<Accepted> {
    let lp = Arc::new(FakeLiquidityProvider::new(PROVIDER_ID));
    let clock = Arc::new(ManualClock::new(AGREEMENT + 60));
    let provider = lp.provider();
    let validator = QuoteValidator::new(NETWORK, &provider)?;
    let quote = fetch_quotes(lp.as_ref(), &validator, &request)
        .await
        .context("fetch quotes")?
        .remove(0);

    let engine = AcceptanceEngine::new(
        provider.clone(),
        lp.clone(),
        Arc::new(MemoryLedger::new()),
        clock.clone(),
        AcceptanceConfig {
            network: NETWORK,
            verify_provider_signature: true,
            ..AcceptanceConfig::default()
        },
    );
    let accepted = engine.accept(&quote).await.context("accept quote")?;
    Ok(Accepted {
        lp,
        clock,
        accepted,
    })
}

pub async fn accept_pegin() -> Result<Accepted> {
    accept(QuoteRequest::Pegin(fixtures::pegin_request())).await
}

pub async fn accept_pegout() -> Result<Accepted> {
    accept(QuoteRequest::Pegout(fixtures::pegout_request())).await
}

/// Millisecond intervals so polling tests finish quickly.
pub fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: 10,
        call_timeout_ms: 1_000,
        max_polls: Some(50),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
        },
        pegin_rule: EvidenceRule::Destination,
        pegout_rule: EvidenceRule::Both,
    }
}
