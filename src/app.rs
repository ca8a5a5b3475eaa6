use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, info_span, Instrument};

use crate::api::ApiServer;
use crate::config::{BaseConfig, ReconcilerConfig};
use crate::confirmation::{ConfirmationSourceVariant, HttpConfirmationSource};
use crate::ledger::LedgerVariant;
use crate::reconciler::Reconciler;
use crate::store::{RecordStoreVariant, RocksStore};
use crate::traits::LedgerClient;

/// Wires the reconciler to its HTTP front end and runs both until shutdown.
pub struct App {
    reconciler: Reconciler,
    api: ApiServer,
}

impl App {
    pub fn new(reconciler: Reconciler, bind_addr: String) -> Self {
        let api = ApiServer::new(bind_addr, reconciler.clone());
        Self { reconciler, api }
    }

    /// Build the production stack: RocksDB store, HTTP confirmation source
    /// and the configured ledger.
    pub fn initialize(config: &BaseConfig) -> Result<Self> {
        let store = RocksStore::open(&config.storage_path)?;
        info!("Storage opened at: {}", config.storage_path);

        let source = HttpConfirmationSource::new(Duration::from_millis(config.query_timeout_ms));
        let ledger = LedgerVariant::from_config(config)?;
        info!("Ledger client: {}", ledger.name());

        let reconciler = Reconciler::new(
            RecordStoreVariant::Rocks(store),
            ConfirmationSourceVariant::Http(source),
            ledger,
            ReconcilerConfig::from(config),
        );
        Ok(Self::new(reconciler, config.bind_addr.clone()))
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn api_addr(&self) -> Option<SocketAddr> {
        self.api.actual_addr().await
    }

    /// Resume unfinished deliveries and start serving the API.
    pub async fn start(&self) -> Result<()> {
        let resumed = self.reconciler.resume().await?;
        info!("Resumed {} unfinished deliveries", resumed);
        self.api.open().await
    }

    /// Stop the API first so no new work arrives, then wind down the tasks.
    pub async fn stop(&self) -> Result<()> {
        self.api.close().await?;
        self.reconciler.shutdown().await;
        info!("pharmproof stopped");
        Ok(())
    }

    /// Start, wait for `shutdown`, stop.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        async move {
            self.start().await?;
            shutdown.await;
            info!("Shutdown requested");
            self.stop().await
        }
        .instrument(info_span!("app_run"))
        .await
    }
}
