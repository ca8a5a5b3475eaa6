use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::ConfirmationSource;
use crate::types::ConfirmationPayload;

/// One scripted answer of the mock source.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// `{"status":"in_transit"}`.
    Pending,
    Payload(ConfirmationPayload),
    Fail(String),
    /// Answers with the payload after the delay.
    Delayed(Duration, ConfirmationPayload),
    /// Never answers; exercises the caller's timeout.
    Hang,
}

impl MockResponse {
    /// A `delivered` answer with the given recipient name and signature.
    pub fn delivered(name: &str, signature: Option<&str>) -> Self {
        MockResponse::Payload(delivered_payload(name, signature))
    }
}

/// Payload a courier sends once the recipient signed.
pub fn delivered_payload(name: &str, signature: Option<&str>) -> ConfirmationPayload {
    ConfirmationPayload {
        status: Some("delivered".to_string()),
        name: Some(name.to_string()),
        signature: signature.map(str::to_string),
        ..Default::default()
    }
}

/// Scripted confirmation source for tests.
///
/// Each endpoint answers from its own queue; once the queue is drained it
/// keeps answering `Pending`.
#[derive(Clone, Default)]
pub struct MockConfirmationSource {
    scripts: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockConfirmationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for `endpoint`, in order.
    pub fn script(&self, endpoint: &str, responses: Vec<MockResponse>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(endpoint.to_string())
                .or_default()
                .extend(responses);
        }
    }

    /// Number of queries made against `endpoint`.
    pub fn calls(&self, endpoint: &str) -> u32 {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(endpoint).copied())
            .unwrap_or(0)
    }

    fn next_response(&self, endpoint: &str) -> Result<MockResponse> {
        *self
            .calls
            .lock()
            .map_err(|_| anyhow!("mock lock poisoned"))?
            .entry(endpoint.to_string())
            .or_default() += 1;

        let mut scripts = self.scripts.lock().map_err(|_| anyhow!("mock lock poisoned"))?;
        Ok(scripts
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockResponse::Pending))
    }
}

#[async_trait]
impl ConfirmationSource for MockConfirmationSource {
    fn name(&self) -> &'static str {
        "mock-confirmation"
    }

    async fn fetch(&self, endpoint: &str) -> Result<ConfirmationPayload> {
        match self.next_response(endpoint)? {
            MockResponse::Pending => Ok(ConfirmationPayload {
                status: Some("in_transit".to_string()),
                ..Default::default()
            }),
            MockResponse::Payload(payload) => Ok(payload),
            MockResponse::Fail(message) => Err(anyhow!(message)),
            MockResponse::Delayed(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            MockResponse::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_pending() -> Result<()> {
        let source = MockConfirmationSource::new();
        source.script(
            "http://a",
            vec![MockResponse::Fail("down".to_string()), MockResponse::delivered("Alice", None)],
        );

        assert!(source.fetch("http://a").await.is_err());
        assert!(source.fetch("http://a").await?.is_delivered());
        assert!(!source.fetch("http://a").await?.is_delivered());
        assert_eq!(source.calls("http://a"), 3);
        assert_eq!(source.calls("http://b"), 0);
        Ok(())
    }
}
