use anyhow::Result;
use async_trait::async_trait;

use crate::types::{DeliveryRecord, DeliveryUpdate};

/// Durable store of delivery records keyed by delivery id.
///
/// Implementations must make `upsert` and `update` atomic per record: the
/// read, merge and write of one call may not interleave with another call for
/// the same id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store name for logging.
    fn name(&self) -> &'static str;

    /// Insert a fresh registration, or merge it into the existing record via
    /// [`DeliveryRecord::merge_registration`]. Returns the stored record.
    async fn upsert(&self, registration: &DeliveryRecord) -> Result<DeliveryRecord>;

    /// Point read.
    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>>;

    /// Apply one field-group update via [`DeliveryRecord::apply`].
    ///
    /// Returns `Ok(None)` when no record exists for `id`, and an error when
    /// the update would break the status order.
    async fn update(&self, id: &str, update: &DeliveryUpdate) -> Result<Option<DeliveryRecord>>;

    /// Records that still need processing (`InTransit` or `Delivered`).
    async fn list_unfinished(&self) -> Result<Vec<DeliveryRecord>>;
}
