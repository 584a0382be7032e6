//! ==============================================================================
//! api.rs - http surface for the ui
//! ==============================================================================
//!
//! purpose:
//!     the only thing a ui needs: give it an address to connect to, a
//!     "send now" button, and a snapshot to render.
//!
//! routes:
//!     GET    /api/status      -> Snapshot
//!     POST   /api/connect     {"address": "192.168.1.108"} -> Snapshot
//!     POST   /api/disconnect  -> Snapshot
//!     POST   /api/relay       -> RelayResult (also for collector 4xx/5xx)
//!     GET    /api/history     -> [HistoryEntry]
//!     DELETE /api/history     -> {"status": "ok"}
//!
//! ==============================================================================

use std::future::Future;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::controller::PollingController;
use crate::domain::{HistoryEntry, Snapshot};
use crate::error::{ControllerError, DeviceError, RelayError};
use crate::relay::RelayResult;

pub fn router(controller: PollingController) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/connect", post(connect_handler))
        .route("/api/disconnect", post(disconnect_handler))
        .route("/api/relay", post(relay_handler))
        .route("/api/history", get(history_handler).delete(clear_history_handler))
        .layer(CorsLayer::permissive())
        .with_state(controller)
}

/// serve until `shutdown` resolves
pub async fn serve(
    bind: &str,
    controller: PollingController,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("api listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// resolves once `signal` fires, after stopping the poll timer
///
/// a signal that cannot be installed never resolves, so the server keeps running.
pub async fn shutdown_on<S>(controller: PollingController, signal: S)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
    controller.shutdown();
}

async fn status_handler(State(controller): State<PollingController>) -> Json<Snapshot> {
    Json(controller.snapshot().await)
}

#[derive(Deserialize)]
struct ConnectRequest {
    address: String,
}

async fn connect_handler(
    State(controller): State<PollingController>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<Snapshot>, ControllerError> {
    Ok(Json(controller.connect(&request.address).await?))
}

async fn disconnect_handler(State(controller): State<PollingController>) -> Json<Snapshot> {
    Json(controller.disconnect().await)
}

async fn relay_handler(
    State(controller): State<PollingController>,
) -> Result<Json<RelayResult>, ControllerError> {
    Ok(Json(controller.trigger_relay().await?))
}

async fn history_handler(State(controller): State<PollingController>) -> Json<Vec<HistoryEntry>> {
    Json(controller.history().await)
}

async fn clear_history_handler(
    State(controller): State<PollingController>,
) -> Result<Json<serde_json::Value>, ControllerError> {
    controller.clear_history().await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControllerError::Validation(_) => StatusCode::BAD_REQUEST,
            ControllerError::Relay(RelayError::EmptyHistory) => StatusCode::BAD_REQUEST,
            ControllerError::AlreadyActive(_)
            | ControllerError::Cancelled
            | ControllerError::RelayInFlight => StatusCode::CONFLICT,
            ControllerError::Device(DeviceError::Timeout(_))
            | ControllerError::Relay(RelayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ControllerError::Device(_) | ControllerError::Relay(_) => StatusCode::BAD_GATEWAY,
            ControllerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({"status": "error", "message": self.to_string()});
        (status, Json(body)).into_response()
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::domain::ConnectionState;
    use crate::notify::testing::RecordingSink;
    use crate::storage::MemoryStore;
    use mockito::Server;
    use serde_json::{json, Value};
    use std::sync::Arc;

    async fn spawn_api(device_port: u16, relay_url: String) -> (String, PollingController) {
        let mut config = MonitorConfig::default();
        config.device.port = device_port;
        config.device.fetch_timeout_ms = 300;
        config.polling.interval_ms = 5000;
        config.relay.url = relay_url;

        let controller = PollingController::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingSink::default()),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(controller.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, controller)
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let (base, _controller) = spawn_api(9, "http://127.0.0.1:9/".into()).await;

        let body: Value = reqwest::get(format!("{base}/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["state"], "idle");
        assert_eq!(body["history"], json!([]));
    }

    #[tokio::test]
    async fn bad_address_is_a_client_error() {
        let (base, _controller) = spawn_api(9, "http://127.0.0.1:9/".into()).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/connect"))
            .json(&json!({"address": "abc.def.1.1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn connect_disconnect_and_relay_round_trip() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/data")
            .with_status(200)
            .with_body(r#"{"temperature": 24.5, "humidity": 38, "movement_alert": false}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;
        let (base, controller) = spawn_api(server.socket_address().port(), server.url()).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/api/connect"))
            .json(&json!({"address": "127.0.0.1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["state"], "connected");
        assert_eq!(body["last_reading"]["temperature"], 24.5);

        let response = client.post(format!("{base}/api/relay")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let relay: Value = response.json().await.unwrap();
        assert_eq!(relay["success"], false);
        assert_eq!(relay["status"], 503);

        let body: Value = client
            .post(format!("{base}/api/disconnect"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["state"], "idle");
        assert_eq!(body["history"].as_array().unwrap().len(), 1);

        let response = client.delete(format!("{base}/api/history")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(controller.history().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_polling_before_returning() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/data")
            .with_status(200)
            .with_body(r#"{"temperature": 20, "humidity": 50, "movement_alert": false}"#)
            .create_async()
            .await;
        let (_base, controller) = spawn_api(server.socket_address().port(), server.url()).await;
        controller.connect("127.0.0.1").await.unwrap();

        shutdown_on(controller.clone(), async { Ok::<(), std::io::Error>(()) }).await;
        assert_eq!(controller.snapshot().await.state, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn broken_signal_never_triggers_shutdown() {
        let (_base, controller) = spawn_api(9, "http://127.0.0.1:9/".into()).await;

        let signal = async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "no signals")) };
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            shutdown_on(controller, signal),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn relay_with_nothing_stored_is_rejected() {
        let (base, _controller) = spawn_api(9, "http://127.0.0.1:9/".into()).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/api/relay"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
