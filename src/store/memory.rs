use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::RecordStore;
use crate::types::{DeliveryRecord, DeliveryStatus, DeliveryUpdate};

/// In-memory record store for tests and local runs.
///
/// Cloning shares the underlying map, so a test can keep a handle while the
/// reconciler owns another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, DeliveryRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a record, as an external retention job would.
    pub fn remove(&self, id: &str) -> Option<DeliveryRecord> {
        self.lock().ok()?.remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DeliveryRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, registration: &DeliveryRecord) -> Result<DeliveryRecord> {
        let mut records = self.lock()?;
        let stored = records
            .entry(registration.id.clone())
            .and_modify(|existing| {
                existing.merge_registration(registration);
            })
            .or_insert_with(|| registration.clone());
        Ok(stored.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn update(&self, id: &str, update: &DeliveryUpdate) -> Result<Option<DeliveryRecord>> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };
        // Apply to a copy so a rejected update leaves the stored record intact.
        let mut next = record.clone();
        next.apply(update)?;
        *record = next.clone();
        Ok(Some(next))
    }

    async fn list_unfinished(&self) -> Result<Vec<DeliveryRecord>> {
        let mut out: Vec<DeliveryRecord> = self
            .lock()?
            .values()
            .filter(|r| matches!(r.status, DeliveryStatus::InTransit | DeliveryStatus::Delivered))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfirmedVia, DeliveredFields};

    fn registration(id: &str, pharmacist: Option<&str>) -> DeliveryRecord {
        DeliveryRecord::new(
            id.to_string(),
            format!("http://courier/{id}"),
            pharmacist.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_id() -> Result<()> {
        let store = MemoryStore::new();
        store.upsert(&registration("D1", Some("PharmA"))).await?;
        store.update("D1", &DeliveryUpdate::Attempts(4)).await?;

        let merged = store.upsert(&registration("D1", Some("PharmB"))).await?;
        assert_eq!(store.len(), 1);
        assert_eq!(merged.pharmacist.as_deref(), Some("PharmB"));
        assert_eq!(merged.attempts, 4, "re-registration must not reset attempts");
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_record() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store.update("nope", &DeliveryUpdate::Attempts(1)).await?.is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_record_intact() -> Result<()> {
        let store = MemoryStore::new();
        store.upsert(&registration("D1", None)).await?;
        store.update("D1", &DeliveryUpdate::TimedOut).await?;

        let delivered = DeliveryUpdate::Delivered(DeliveredFields {
            recipient_name: Some("Alice".to_string()),
            recipient_signature: None,
            delivered_at: "2024-05-01T10:00:00.000Z".into(),
            pharmacist_reply: None,
            confirmed_via: ConfirmedVia::Poll,
        });
        assert!(store.update("D1", &delivered).await.is_err());

        let record = store.get("D1").await?.unwrap();
        assert_eq!(record.status, DeliveryStatus::Timeout);
        assert_eq!(record.recipient_name, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_unfinished_skips_terminal() -> Result<()> {
        let store = MemoryStore::new();
        store.upsert(&registration("A", None)).await?;
        store.upsert(&registration("B", None)).await?;
        store.update("B", &DeliveryUpdate::TimedOut).await?;

        let unfinished = store.list_unfinished().await?;
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "A");
        Ok(())
    }
}
