use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::traits::ConfirmationSource;
use crate::types::ConfirmationPayload;

/// Polls courier confirmation endpoints over HTTP(S) with `GET`.
///
/// Non-2xx responses and bodies that are not a JSON object are errors.
pub struct HttpConfirmationSource {
    client: reqwest::Client,
}

impl HttpConfirmationSource {
    /// Create a source whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl ConfirmationSource for HttpConfirmationSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, endpoint: &str) -> Result<ConfirmationPayload> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .with_context(|| format!("querying {endpoint}"))?
            .error_for_status()?;

        let payload: ConfirmationPayload = response
            .json()
            .await
            .with_context(|| format!("decoding confirmation from {endpoint}"))?;
        debug!(endpoint, status = ?payload.status, "confirmation endpoint answered");
        Ok(payload)
    }
}
