use anyhow::Result;
use async_trait::async_trait;

use crate::types::ConfirmationPayload;

/// External system reporting whether a delivery has been handed over.
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &'static str;

    /// Query the confirmation endpoint of one delivery.
    ///
    /// Any error is treated by the caller as "no signal this cycle".
    async fn fetch(&self, endpoint: &str) -> Result<ConfirmationPayload>;
}
