use ::pharmproof::store::RocksStore;
use ::pharmproof::types::{
    ConfirmedVia, DeliveredFields, DeliveryRecord, DeliveryStatus, DeliveryUpdate,
};
use ::pharmproof::{RecordStore, TransitionError};
use anyhow::Result;

// ===== Test Helper Functions =====

fn open_store(dir: &tempfile::TempDir) -> Result<RocksStore> {
    RocksStore::open(dir.path().to_str().unwrap())
}

fn registration(id: &str, pharmacist: Option<&str>) -> DeliveryRecord {
    DeliveryRecord::new(
        id.to_string(),
        format!("http://courier.test/track/{id}"),
        pharmacist.map(str::to_string),
    )
}

fn delivered(name: &str) -> DeliveryUpdate {
    DeliveryUpdate::Delivered(DeliveredFields {
        recipient_name: Some(name.to_string()),
        recipient_signature: Some("sig".to_string()),
        delivered_at: "2024-05-01T10:00:00.000Z".into(),
        pharmacist_reply: Some("PharmA".to_string()),
        confirmed_via: ConfirmedVia::Poll,
    })
}

// ===== Tests =====

#[tokio::test]
async fn test_upsert_creates_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    let stored = store.upsert(&registration("D1", Some("PharmA"))).await?;
    assert_eq!(stored.status, DeliveryStatus::InTransit);
    assert_eq!(stored.attempts, 0);

    let read = store.get("D1").await?.unwrap();
    assert_eq!(read, stored);
    assert!(store.get("D2").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_upsert_merges_pharmacist_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    let first = store.upsert(&registration("D1", Some("PharmA"))).await?;
    let mut other = registration("D1", Some("PharmB"));
    other.confirmation_endpoint = "http://elsewhere/D1".to_string();
    let second = store.upsert(&other).await?;

    assert_eq!(second.pharmacist.as_deref(), Some("PharmB"));
    assert_eq!(second.confirmation_endpoint, first.confirmation_endpoint);
    assert_eq!(second.created_at, first.created_at);
    Ok(())
}

#[tokio::test]
async fn test_update_applies_field_group() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;
    store.upsert(&registration("D1", Some("PharmA"))).await?;

    store.update("D1", &DeliveryUpdate::Attempts(2)).await?;
    let record = store.update("D1", &delivered("Alice")).await?.unwrap();

    assert_eq!(record.status, DeliveryStatus::Delivered);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.recipient_name.as_deref(), Some("Alice"));
    assert_eq!(
        record.delivered_at.as_ref().map(ToString::to_string).as_deref(),
        Some("2024-05-01T10:00:00.000Z")
    );
    assert_eq!(store.get("D1").await?.unwrap(), record);
    Ok(())
}

#[tokio::test]
async fn test_update_missing_record_is_none() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    assert!(store.update("ghost", &DeliveryUpdate::Attempts(1)).await?.is_none());
    assert!(store.get("ghost").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_backward_move() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;
    store.upsert(&registration("D1", None)).await?;
    store.update("D1", &DeliveryUpdate::TimedOut).await?;

    let err = store.update("D1", &delivered("Alice")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TransitionError>(),
        Some(TransitionError::Invalid { .. })
    ));

    let record = store.get("D1").await?.unwrap();
    assert_eq!(record.status, DeliveryStatus::Timeout);
    assert_eq!(record.recipient_name, None);
    Ok(())
}

#[tokio::test]
async fn test_ledger_hash_set_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;
    store.upsert(&registration("D1", None)).await?;
    store.update("D1", &delivered("Alice")).await?;

    let recorded = DeliveryUpdate::OnchainRecorded {
        hash: "0xabc".to_string(),
        tx_ref: "0xdef".to_string(),
    };
    store.update("D1", &recorded).await?;
    assert!(store.update("D1", &recorded).await.is_err());

    let record = store.get("D1").await?.unwrap();
    assert_eq!(record.ledger_hash.as_deref(), Some("0xabc"));
    assert_eq!(record.ledger_tx_ref.as_deref(), Some("0xdef"));
    Ok(())
}

#[tokio::test]
async fn test_list_unfinished() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    for id in ["A", "B", "C", "D"] {
        store.upsert(&registration(id, None)).await?;
    }
    store.update("B", &delivered("Ben")).await?;
    store.update("C", &DeliveryUpdate::TimedOut).await?;
    store.update("D", &delivered("Dee")).await?;
    store
        .update("D", &DeliveryUpdate::OnchainFailed { error: "boom".to_string() })
        .await?;

    let ids: Vec<String> = store
        .list_unfinished()
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_records_survive_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let store = open_store(&dir)?;
        store.upsert(&registration("D1", Some("PharmA"))).await?;
        store.update("D1", &DeliveryUpdate::Attempts(7)).await?;
    }

    let store = open_store(&dir)?;
    let record = store.get("D1").await?.unwrap();
    assert_eq!(record.attempts, 7);
    assert_eq!(record.pharmacist.as_deref(), Some("PharmA"));
    assert_eq!(store.list_unfinished().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_record_stored_as_camel_case_json() -> Result<()> {
    let record = registration("D1", Some("PharmA"));
    let json = serde_json::to_value(&record)?;

    assert_eq!(json["confirmationEndpoint"], "http://courier.test/track/D1");
    assert_eq!(json["status"], "in_transit");
    assert!(json.get("recipientName").is_some());
    Ok(())
}
