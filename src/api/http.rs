use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::reconciler::Reconciler;

/// HTTP front end of the reconciler.
///
/// # Routes
/// - `GET /api/pharm/delivery?deliveryId=&callback=&pharmacist=` registers a delivery
/// - `POST /api/confirm` confirms a delivery directly and anchors it
/// - `GET /api/delivery/{id}` returns the stored record
/// - `GET /health` health check
///
/// # Example POST /api/confirm payload:
/// ```json
/// { "deliveryId": "D3", "name": "Bob", "signature": "sig3" }
/// ```
pub struct ApiServer {
    bind_addr: String,
    reconciler: Reconciler,
    /// Actual bound address (set after the server starts)
    actual_addr: Arc<Mutex<Option<SocketAddr>>>,
    shutdown_tx: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    #[serde(default)]
    delivery_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

impl ApiServer {
    pub fn new(bind_addr: String, reconciler: Reconciler) -> Self {
        Self {
            bind_addr,
            reconciler,
            actual_addr: Arc::new(Mutex::new(None)),
            shutdown_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the actual bound address (available after the server starts).
    pub async fn actual_addr(&self) -> Option<SocketAddr> {
        *self.actual_addr.lock().await
    }

    /// Bind and serve in a background task.
    pub async fn open(&self) -> Result<()> {
        let socket_addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| anyhow!("invalid bind address {}: {}", self.bind_addr, e))?;

        let reconciler = self.reconciler.clone();
        let make_svc = make_service_fn(move |_conn| {
            let reconciler = reconciler.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    Self::handle_request(req, reconciler.clone())
                }))
            }
        });

        let server = Server::try_bind(&socket_addr)?.serve(make_svc);
        let addr = server.local_addr();
        *self.actual_addr.lock().await = Some(addr);
        info!("HTTP API listening on http://{}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                info!("HTTP API shutdown signal received");
            });

            if let Err(e) = graceful.await {
                error!("HTTP API error: {}", e);
            } else {
                info!("HTTP API stopped gracefully");
            }
        });

        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let mut shutdown_guard = self.shutdown_tx.lock().await;
        if let Some(shutdown_tx) = shutdown_guard.take() {
            if shutdown_tx.send(()).is_err() {
                warn!("Failed to send shutdown signal (server already stopped)");
            }
        }
        Ok(())
    }

    async fn handle_request(
        req: Request<Body>,
        reconciler: Reconciler,
    ) -> Result<Response<Body>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        debug!("HTTP request: {} {}", method, path);

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/health") => json_response(StatusCode::OK, json!({"status": "ok"})),
            (&Method::GET, "/api/pharm/delivery") => Self::handle_register(req, reconciler).await,
            (&Method::POST, "/api/confirm") => Self::handle_confirm(req, reconciler).await,
            (&Method::GET, p) if p.starts_with("/api/delivery/") => {
                match urlencoding::decode(&p["/api/delivery/".len()..]) {
                    Ok(id) => Self::handle_lookup(&id, reconciler).await,
                    Err(_) => json_response(
                        StatusCode::BAD_REQUEST,
                        json!({"error": "invalid delivery id encoding"}),
                    ),
                }
            }
            _ => json_response(StatusCode::NOT_FOUND, json!({"error": "not_found"})),
        };
        Ok(response)
    }

    async fn handle_register(req: Request<Body>, reconciler: Reconciler) -> Response<Body> {
        let params: HashMap<String, String> = req
            .uri()
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let param = |key: &str| params.get(key).map(String::as_str).unwrap_or("");

        let pharmacist = params.get("pharmacist").map(String::as_str);
        match reconciler
            .register_delivery(param("deliveryId"), param("callback"), pharmacist)
            .await
        {
            Ok(record) => json_response(StatusCode::OK, json!({"ok": true, "id": record.id})),
            Err(e) => engine_error_response(&e),
        }
    }

    async fn handle_confirm(req: Request<Body>, reconciler: Reconciler) -> Response<Body> {
        let whole_body = match hyper::body::to_bytes(req.into_body()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": "invalid_body", "message": e.to_string()}),
                );
            }
        };

        let request: ConfirmRequest = if whole_body.is_empty() {
            ConfirmRequest::default()
        } else {
            match serde_json::from_slice(&whole_body) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to parse confirm request: {}", e);
                    return json_response(
                        StatusCode::BAD_REQUEST,
                        json!({"error": "invalid_json", "message": e.to_string()}),
                    );
                }
            }
        };

        let id = request.delivery_id.unwrap_or_default();
        let name = request.name.unwrap_or_default();
        match reconciler
            .confirm_delivery(&id, &name, request.signature.as_deref())
            .await
        {
            Ok(confirmation) => json_response(
                StatusCode::OK,
                json!({
                    "ok": true,
                    "onchain_tx": confirmation.ledger_tx_ref,
                    "recordHash": confirmation.record_hash,
                }),
            ),
            Err(e) => engine_error_response(&e),
        }
    }

    async fn handle_lookup(id: &str, reconciler: Reconciler) -> Response<Body> {
        if id.is_empty() {
            return json_response(StatusCode::NOT_FOUND, json!({"error": "Delivery not found"}));
        }
        match reconciler.get_delivery(id).await {
            Ok(Some(record)) => match serde_json::to_value(&record) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => {
                    error!("Failed to encode delivery {}: {}", id, e);
                    json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "DB error"}))
                }
            },
            Ok(None) => json_response(StatusCode::NOT_FOUND, json!({"error": "Delivery not found"})),
            Err(e) => engine_error_response(&e),
        }
    }
}

/// Map an engine error onto a status code and JSON body.
fn engine_error_response(err: &EngineError) -> Response<Body> {
    match err {
        EngineError::InvalidInput(message) => {
            json_response(StatusCode::BAD_REQUEST, json!({"error": message}))
        }
        EngineError::NotFound(_) => {
            json_response(StatusCode::NOT_FOUND, json!({"error": "Delivery not found"}))
        }
        EngineError::AlreadyFinalized { status, .. } => json_response(
            StatusCode::CONFLICT,
            json!({"error": "Delivery already finalized", "status": status}),
        ),
        EngineError::ShuttingDown | EngineError::TaskUnavailable(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": err.to_string()}),
        ),
        EngineError::Ledger(_) | EngineError::Hash(_) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "On-chain error", "details": err.to_string()}),
        ),
        EngineError::Store(e) => {
            error!("Record store error: {:#}", e);
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "DB error"}))
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
