use std::net::SocketAddr;
use std::time::Duration;

use ::pharmproof::{
    ApiServer, ConfirmationSourceVariant, DeliveryStatus, LedgerVariant, MemoryStore,
    MockConfirmationSource, MockLedger, RecordStore, RecordStoreVariant, Reconciler,
    ReconcilerConfig,
};
use hyper::{Body, Method, Request, StatusCode};
use serde_json::{json, Value};

// ===== Test Helper Functions =====

struct TestApi {
    server: ApiServer,
    addr: SocketAddr,
    reconciler: Reconciler,
    store: MemoryStore,
    ledger: MockLedger,
}

async fn start_api(ledger: MockLedger) -> TestApi {
    let store = MemoryStore::new();
    let config = ReconcilerConfig {
        // Long enough that no poll fires during a test.
        poll_interval: Duration::from_secs(3600),
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(
        RecordStoreVariant::Memory(store.clone()),
        ConfirmationSourceVariant::Mock(MockConfirmationSource::new()),
        LedgerVariant::Mock(ledger.clone()),
        config,
    );

    let server = ApiServer::new("127.0.0.1:0".to_string(), reconciler.clone());
    server.open().await.unwrap();
    let addr = server
        .actual_addr()
        .await
        .expect("Server should have bound address");

    TestApi {
        server,
        addr,
        reconciler,
        store,
        ledger,
    }
}

async fn get(addr: SocketAddr, path_and_query: &str) -> (StatusCode, Value) {
    let client = hyper::Client::new();
    let uri = format!("http://{addr}{path_and_query}");
    let response = client.get(uri.parse().unwrap()).await.unwrap();
    read_json(response).await
}

async fn post_json(addr: SocketAddr, path: &str, body: Value) -> (StatusCode, Value) {
    let client = hyper::Client::new();
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{addr}{path}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = client.request(req).await.unwrap();
    read_json(response).await
}

async fn read_json(response: hyper::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn register(addr: SocketAddr, id: &str) -> (StatusCode, Value) {
    get(
        addr,
        &format!("/api/pharm/delivery?deliveryId={id}&callback=http%3A%2F%2Fcourier.test%2F{id}&pharmacist=PharmA"),
    )
    .await
}

// ===== Tests =====

#[tokio::test]
async fn test_health() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = get(api.addr, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_register_delivery() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = register(api.addr, "D1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "id": "D1"}));

    let record = api.store.get("D1").await.unwrap().unwrap();
    assert_eq!(record.confirmation_endpoint, "http://courier.test/D1");
    assert_eq!(record.pharmacist.as_deref(), Some("PharmA"));
    assert!(api.reconciler.is_tracking("D1"));

    api.server.close().await.unwrap();
    api.reconciler.shutdown().await;
}

#[tokio::test]
async fn test_register_missing_callback() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = get(api.addr, "/api/pharm/delivery?deliveryId=D1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "deliveryId & callback required"}));
    assert!(api.store.is_empty());

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_register_during_shutdown() {
    let api = start_api(MockLedger::new()).await;
    api.reconciler.shutdown().await;

    let (status, _) = register(api.addr, "D1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_delivery() {
    let api = start_api(MockLedger::new()).await;
    register(api.addr, "D3").await;

    let (status, body) = post_json(
        api.addr,
        "/api/confirm",
        json!({"deliveryId": "D3", "name": "Bob", "signature": "sig3"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let record = api.store.get("D3").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::OnchainRecorded);
    assert_eq!(body["onchain_tx"], json!(record.ledger_tx_ref));
    assert_eq!(body["recordHash"], json!(record.ledger_hash));
    assert_eq!(api.ledger.submission_count(), 1);

    let (status, _) = post_json(
        api.addr,
        "/api/confirm",
        json!({"deliveryId": "D3", "name": "Bob"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(api.ledger.submission_count(), 1);

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_unknown_delivery() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = post_json(
        api.addr,
        "/api/confirm",
        json!({"deliveryId": "ZZZ", "name": "Alice"}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Delivery not found"}));
    assert!(api.store.is_empty());

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_requires_name() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = post_json(api.addr, "/api/confirm", json!({"deliveryId": "D1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "deliveryId & name required"}));

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_invalid_json() {
    let api = start_api(MockLedger::new()).await;

    let client = hyper::Client::new();
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/api/confirm", api.addr))
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = read_json(client.request(req).await.unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_json");

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_ledger_failure() {
    let api = start_api(MockLedger::failing("execution reverted")).await;
    register(api.addr, "D2").await;

    let (status, body) = post_json(
        api.addr,
        "/api/confirm",
        json!({"deliveryId": "D2", "name": "Alice"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "On-chain error");
    assert!(body["details"].as_str().unwrap().contains("execution reverted"));

    let (status, record) = get(api.addr, "/api/delivery/D2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "delivered_onchain_failed");
    assert_eq!(record["recipientName"], "Alice");
    assert!(record["ledgerError"].is_string());

    api.server.close().await.unwrap();
}

#[tokio::test]
async fn test_lookup_delivery() {
    let api = start_api(MockLedger::new()).await;
    register(api.addr, "D1").await;

    let (status, record) = get(api.addr, "/api/delivery/D1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], "D1");
    assert_eq!(record["status"], "in_transit");
    assert_eq!(record["attempts"], 0);

    let (status, _) = get(api.addr, "/api/delivery/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    api.server.close().await.unwrap();
    api.reconciler.shutdown().await;
}

#[tokio::test]
async fn test_lookup_decodes_percent_encoded_id() {
    let api = start_api(MockLedger::new()).await;
    let (status, _) = get(
        api.addr,
        "/api/pharm/delivery?deliveryId=D%201%2Fa&callback=http%3A%2F%2Fcourier.test%2FD1",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, record) = get(api.addr, "/api/delivery/D%201%2Fa").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], "D 1/a");

    let (status, body) = get(api.addr, "/api/delivery/%FF").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid delivery id encoding");

    api.server.close().await.unwrap();
    api.reconciler.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route() {
    let api = start_api(MockLedger::new()).await;

    let (status, body) = get(api.addr, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    api.server.close().await.unwrap();
}
