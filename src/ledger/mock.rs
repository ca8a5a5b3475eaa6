use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::traits::LedgerClient;
use crate::types::{LedgerReceipt, LedgerSubmission};

/// Mock ledger for testing.
/// Records every submission and can be told to fail or to stall.
#[derive(Clone, Default)]
pub struct MockLedger {
    submissions: Arc<Mutex<Vec<LedgerSubmission>>>,
    failure: Arc<Mutex<Option<String>>>,
    delay: Option<Duration>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that rejects every submission with `message`.
    pub fn failing(message: &str) -> Self {
        let ledger = Self::new();
        ledger.set_failure(Some(message));
        ledger
    }

    /// Wait `delay` before answering each submission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = message.map(str::to_string);
        }
    }

    /// Get all submissions seen so far.
    pub fn submissions(&self) -> Vec<LedgerSubmission> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn name(&self) -> &'static str {
        "mock-ledger"
    }

    async fn submit(&self, submission: &LedgerSubmission) -> Result<LedgerReceipt, LedgerError> {
        let sequence = {
            let mut submissions = self
                .submissions
                .lock()
                .map_err(|_| LedgerError::Transport("mock lock poisoned".to_string()))?;
            submissions.push(submission.clone());
            submissions.len() as u64
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().ok().and_then(|f| f.clone());
        if let Some(message) = failure {
            return Err(LedgerError::Rejected(message));
        }

        tracing::debug!("MockLedger: recorded {}", submission.record_hash);
        Ok(LedgerReceipt {
            tx_ref: format!("0x{:064x}", sequence),
            block_number: Some(sequence),
        })
    }
}
