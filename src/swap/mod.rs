pub mod accept;
pub mod admission;
pub mod monitor;
pub mod refund;
pub mod store;

use crate::quote::{Direction, QuoteHash, ValidatedQuote};
use crate::signer::QuoteSignature;

pub use self::accept::{AcceptanceConfig, AcceptanceEngine, AcceptanceLedger, MemoryLedger};
pub use self::admission::AdmissionGuard;
pub use self::monitor::{
    EvidenceRule, MonitorConfig, MonitorSession, PaymentMonitor, PaymentStatus,
};
pub use self::refund::{RefundEligibility, RefundEvaluator, RefundExecutor, RefundTrigger};
pub use self::store::SqliteQuoteStore;

/// A quote the provider has committed to: its countersignature plus the address the user must
/// fund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedQuote {
    quote: ValidatedQuote,
    signature: QuoteSignature,
    deposit_address: String,
    client_signature: Option<QuoteSignature>,
}

impl AcceptedQuote {
    pub(crate) fn new(
        quote: ValidatedQuote,
        signature: QuoteSignature,
        deposit_address: String,
        client_signature: Option<QuoteSignature>,
    ) -> Self {
        Self {
            quote,
            signature,
            deposit_address,
            client_signature,
        }
    }

    pub fn quote(&self) -> &ValidatedQuote {
        &self.quote
    }

    pub fn hash(&self) -> &QuoteHash {
        self.quote.hash()
    }

    pub fn direction(&self) -> Direction {
        self.quote.direction()
    }

    pub fn signature(&self) -> &QuoteSignature {
        &self.signature
    }

    pub fn deposit_address(&self) -> &str {
        &self.deposit_address
    }

    pub fn client_signature(&self) -> Option<&QuoteSignature> {
        self.client_signature.as_ref()
    }
}
