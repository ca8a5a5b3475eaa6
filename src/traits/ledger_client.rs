use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{LedgerReceipt, LedgerSubmission};

/// Append-only ledger where record hashes are anchored.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Ledger name for logging.
    fn name(&self) -> &'static str;

    /// Submit a record hash and wait until the ledger includes it.
    ///
    /// Carries no idempotency key: calling this twice for the same hash may
    /// produce two ledger entries.
    async fn submit(&self, submission: &LedgerSubmission) -> Result<LedgerReceipt, LedgerError>;
}
