use anyhow::Result;
use async_trait::async_trait;

use super::{memory::MemoryStore, rocks::RocksStore};
use crate::traits::RecordStore;
use crate::types::{DeliveryRecord, DeliveryUpdate};

/// Enum representing all record store implementations.
pub enum RecordStoreVariant {
    Rocks(RocksStore),
    Memory(MemoryStore),
}

#[async_trait]
impl RecordStore for RecordStoreVariant {
    fn name(&self) -> &'static str {
        match self {
            RecordStoreVariant::Rocks(inner) => inner.name(),
            RecordStoreVariant::Memory(inner) => inner.name(),
        }
    }

    async fn upsert(&self, registration: &DeliveryRecord) -> Result<DeliveryRecord> {
        match self {
            RecordStoreVariant::Rocks(inner) => inner.upsert(registration).await,
            RecordStoreVariant::Memory(inner) => inner.upsert(registration).await,
        }
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>> {
        match self {
            RecordStoreVariant::Rocks(inner) => inner.get(id).await,
            RecordStoreVariant::Memory(inner) => inner.get(id).await,
        }
    }

    async fn update(&self, id: &str, update: &DeliveryUpdate) -> Result<Option<DeliveryRecord>> {
        match self {
            RecordStoreVariant::Rocks(inner) => inner.update(id, update).await,
            RecordStoreVariant::Memory(inner) => inner.update(id, update).await,
        }
    }

    async fn list_unfinished(&self) -> Result<Vec<DeliveryRecord>> {
        match self {
            RecordStoreVariant::Rocks(inner) => inner.list_unfinished().await,
            RecordStoreVariant::Memory(inner) => inner.list_unfinished().await,
        }
    }
}
