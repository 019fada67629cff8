use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::amount::Wei;
use crate::error::{FlyoverError, SignatureParty};
use crate::provider::{LiquidityProvider, LpError, LpErrorBody};
use crate::quote::{Direction, ValidatedQuote};

// Bodies are matched case and separator insensitive, so "LockingCapExceeded" and
// "locking_cap_exceeded" classify the same way.
pub fn classify_rejection(
    provider_id: u64,
    direction: Direction,
    quote: Option<&ValidatedQuote>,
    err: LpError,
) -> FlyoverError {
    let (status, body) = match err {
        LpError::Timeout => return FlyoverError::Transport("provider request timed out".into()),
        LpError::Transport(msg) => return FlyoverError::Transport(msg),
        LpError::Decode(msg) => {
            return FlyoverError::malformed("response", format!("undecodable provider body: {msg}"));
        }
        LpError::Rejected { status, body } => (status, body),
    };

    let haystack = normalized_text(&body);
    if haystack.contains("lockingcap") {
        return FlyoverError::LockingCapExceeded {
            provider_id,
            direction,
            message: body.message,
        };
    }
    if let Some(quote) = quote {
        if haystack.contains("signature") {
            return FlyoverError::InvalidSignature {
                party: SignatureParty::Client,
                quote_hash: *quote.hash(),
                reason: body.message,
            };
        }
        if haystack.contains("expired") {
            return FlyoverError::QuoteExpired {
                quote_hash: *quote.hash(),
                deadline: quote.quote().deposit_deadline(),
            };
        }
        if haystack.contains("alreadyaccepted") {
            return FlyoverError::AlreadyAccepted {
                quote_hash: *quote.hash(),
            };
        }
    }

    FlyoverError::ProviderRejected {
        status,
        recoverable: body.recoverable || status >= 500,
        message: body.message,
    }
}

fn normalized_text(body: &LpErrorBody) -> String {
    let mut text = body.message.clone();
    for value in body.details.values() {
        text.push(' ');
        match value {
            serde_json::Value::String(s) => text.push_str(s),
            other => text.push_str(&other.to_string()),
        }
    }
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Default)]
pub struct AdmissionGuard {
    committed: Mutex<HashMap<(u64, Direction), Wei>>,
}

impl AdmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_value(&self, provider_id: u64, direction: Direction) -> Wei {
        let committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        committed
            .get(&(provider_id, direction))
            .copied()
            .unwrap_or(Wei::ZERO)
    }

    /// Warns when our own tally would pass the declared cap. Never blocks.
    pub fn precheck(&self, provider: &LiquidityProvider, quote: &ValidatedQuote) {
        let direction = quote.direction();
        let Ok(product) = provider.product(direction) else {
            return;
        };
        let Some(cap) = product.locking_cap else {
            return;
        };
        let committed = self.committed_value(provider.id, direction);
        let projected = committed.saturating_add(quote.quote().value());
        if projected > cap {
            tracing::warn!(
                provider_id = provider.id,
                %direction,
                quote_hash = %quote.hash(),
                %committed,
                %projected,
                locking_cap = %cap,
                "acceptance may exceed declared locking cap"
            );
        }
    }

    pub fn record(&self, quote: &ValidatedQuote) {
        let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = committed
            .entry((quote.provider_id(), quote.direction()))
            .or_insert(Wei::ZERO);
        *entry = entry.saturating_add(quote.quote().value());
    }

    pub fn classify(
        &self,
        provider_id: u64,
        direction: Direction,
        quote: Option<&ValidatedQuote>,
        err: LpError,
    ) -> FlyoverError {
        let classified = classify_rejection(provider_id, direction, quote, err);
        if let FlyoverError::LockingCapExceeded { message, .. } = &classified {
            tracing::warn!(
                provider_id,
                %direction,
                committed = %self.committed_value(provider_id, direction),
                message = %message,
                "provider refused acceptance: locking cap"
            );
        }
        classified
    }
}
