use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::sync::Arc;
use tracing::warn;

use crate::traits::RecordStore;
use crate::types::{DeliveryRecord, DeliveryStatus, DeliveryUpdate};

const KEY_PREFIX: &[u8] = b"delivery/";

/// RocksDB-backed record store. Records are stored as JSON under
/// `delivery/<id>`.
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes read-merge-write cycles.
    write_lock: tokio::sync::Mutex<()>,
}

impl RocksStore {
    pub fn open(path: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).with_context(|| format!("opening rocksdb at {path}"))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn encode_key(id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(KEY_PREFIX.len() + id.len());
        key.extend_from_slice(KEY_PREFIX);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn read(&self, id: &str) -> Result<Option<DeliveryRecord>> {
        match self.db.get(Self::encode_key(id))? {
            Some(raw) => {
                let record = serde_json::from_slice(&raw)
                    .with_context(|| format!("decoding delivery record {id}"))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write(&self, record: &DeliveryRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)?;
        self.db.put(Self::encode_key(&record.id), raw)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RocksStore {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    async fn upsert(&self, registration: &DeliveryRecord) -> Result<DeliveryRecord> {
        let _guard = self.write_lock.lock().await;
        match self.read(&registration.id)? {
            Some(mut existing) => {
                if existing.merge_registration(registration) {
                    self.write(&existing)?;
                }
                Ok(existing)
            }
            None => {
                self.write(registration)?;
                Ok(registration.clone())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<DeliveryRecord>> {
        self.read(id)
    }

    async fn update(&self, id: &str, update: &DeliveryUpdate) -> Result<Option<DeliveryRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.read(id)? else {
            return Ok(None);
        };
        record.apply(update)?;
        self.write(&record)?;
        Ok(Some(record))
    }

    async fn list_unfinished(&self) -> Result<Vec<DeliveryRecord>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(KEY_PREFIX, Direction::Forward));

        for item in iter {
            let (raw_key, value) = item?;
            if !raw_key.starts_with(KEY_PREFIX) {
                break;
            }
            let record: DeliveryRecord = match serde_json::from_slice(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&raw_key),
                        error = %e,
                        "skipping undecodable delivery record"
                    );
                    continue;
                }
            };
            if matches!(
                record.status,
                DeliveryStatus::InTransit | DeliveryStatus::Delivered
            ) {
                out.push(record);
            }
        }

        Ok(out)
    }
}
