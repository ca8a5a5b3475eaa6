use anyhow::Result;
use async_trait::async_trait;

use super::{http::HttpConfirmationSource, mock::MockConfirmationSource};
use crate::traits::ConfirmationSource;
use crate::types::ConfirmationPayload;

/// Enum representing all confirmation source implementations.
pub enum ConfirmationSourceVariant {
    Http(HttpConfirmationSource),
    Mock(MockConfirmationSource),
}

#[async_trait]
impl ConfirmationSource for ConfirmationSourceVariant {
    fn name(&self) -> &'static str {
        match self {
            ConfirmationSourceVariant::Http(inner) => inner.name(),
            ConfirmationSourceVariant::Mock(inner) => inner.name(),
        }
    }

    async fn fetch(&self, endpoint: &str) -> Result<ConfirmationPayload> {
        match self {
            ConfirmationSourceVariant::Http(inner) => inner.fetch(endpoint).await,
            ConfirmationSourceVariant::Mock(inner) => inner.fetch(endpoint).await,
        }
    }
}
