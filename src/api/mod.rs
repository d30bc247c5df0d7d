//! Controller bridge API
//!
//! Exposes the device layer to the automation controller: device listing,
//! option manifests, feedback commands and a WebSocket stream of device events.
//! Default port: 8125

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceEvent};
use crate::feedback::SomeFeedback;

/// Default API port
pub const DEFAULT_API_PORT: u16 = 8125;

/// Shared state for API handlers
pub struct ApiState {
    /// Configured devices, in configuration order
    pub devices: Vec<Arc<dyn Device>>,
    /// Device events fanned out to WebSocket subscribers
    pub events_tx: broadcast::Sender<DeviceEvent>,
}

impl ApiState {
    fn device(&self, id: &str) -> Result<&Arc<dyn Device>, ApiError> {
        self.devices
            .iter()
            .find(|device| device.id() == id)
            .ok_or_else(|| ApiError::not_found(format!("Unknown device '{}'", id)))
    }
}

/// Request body for setting feedback
#[derive(Debug, Deserialize)]
pub struct SetFeedbackRequest {
    pub trigger_id: String,
    /// Absent or null clears the trigger
    #[serde(default)]
    pub feedback: SomeFeedback,
}

/// Entry of GET /api/devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
}

/// API error response
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn not_found(error: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id/manifest", get(device_manifest))
        .route(
            "/api/devices/:id/feedback",
            post(set_feedback).delete(clear_feedback),
        )
        .route("/api/ws/events", get(events_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// GET /api/devices - List configured devices
async fn list_devices(State(state): State<Arc<ApiState>>) -> Json<Vec<DeviceInfo>> {
    Json(
        state
            .devices
            .iter()
            .map(|device| DeviceInfo {
                id: device.id().to_string(),
            })
            .collect(),
    )
}

/// GET /api/devices/:id/manifest - Options schema of a device
async fn device_manifest(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let device = state.device(&id)?;
    Ok(Json(device.options_manifest()))
}

/// POST /api/devices/:id/feedback - Show (or clear) feedback for one trigger
async fn set_feedback(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SetFeedbackRequest>,
) -> Result<StatusCode, ApiError> {
    let device = state.device(&id)?;
    debug!("API: feedback {} / {}", id, req.trigger_id);
    device.set_feedback(&req.trigger_id, req.feedback).await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/devices/:id/feedback - Blank every control of a device
async fn clear_feedback(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<StatusCode, ApiError> {
    let device = state.device(&id)?;
    info!("API: clearing all feedback on {}", id);
    device.clear_feedback_all().await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/ws/events - WebSocket stream of device events
async fn events_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state.events_tx.subscribe()))
}

async fn handle_websocket(mut socket: WebSocket, mut rx: broadcast::Receiver<DeviceEvent>) {
    debug!("WebSocket client connected for device events");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let msg = match serde_json::to_string(&event) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("Failed to encode device event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(msg)).await.is_err() {
                            debug!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Bind the API listener; fails at startup when the port is taken
pub async fn bind(port: u16) -> Result<tokio::net::TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;
    info!("🌐 Controller API listening on http://{}", addr);
    Ok(listener)
}

/// Serve the API on a bound listener; returns once `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<ApiState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::feedback::{Feedback, Tally};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingDevice {
        feedback: Mutex<Vec<(String, SomeFeedback)>>,
        cleared: Mutex<usize>,
    }

    #[async_trait]
    impl Device for RecordingDevice {
        fn id(&self) -> &str {
            "desk"
        }

        async fn init(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn destroy(&self) {}

        async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback) {
            self.feedback.lock().push((trigger_id.to_string(), feedback));
        }

        async fn clear_feedback_all(&self) {
            *self.cleared.lock() += 1;
        }

        fn options_manifest(&self) -> serde_json::Value {
            serde_json::json!({ "title": "Recording" })
        }
    }

    fn setup() -> (Router, Arc<RecordingDevice>) {
        let device = Arc::new(RecordingDevice::default());
        let (events_tx, _) = broadcast::channel(16);
        let state = Arc::new(ApiState {
            devices: vec![device.clone() as Arc<dyn Device>],
            events_tx,
        });
        (build_router(state), device)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_listing() {
        let (app, _) = setup();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([{ "id": "desk" }]));
    }

    #[tokio::test]
    async fn test_manifest_and_unknown_device() {
        let (app, _) = setup();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/devices/desk/manifest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["title"], "Recording");

        let response = app
            .oneshot(Request::builder().uri("/api/devices/nope/manifest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_feedback_commands_reach_device() {
        let (app, device) = setup();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/devices/desk/feedback")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"trigger_id":"0/press","feedback":{"kind":"text","text":"GO","tally":1}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/devices/desk/feedback")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"trigger_id":"1/press"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/devices/desk/feedback")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let recorded = device.feedback.lock().clone();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].0, "0/press");
        assert_eq!(recorded[0].1.as_ref().map(Feedback::tally_bits), Some(Tally::ACTIVE));
        assert_eq!(recorded[1], ("1/press".to_string(), None));
        assert_eq!(*device.cleared.lock(), 1);
    }

    #[tokio::test]
    async fn test_bind_reports_taken_port() {
        let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind(port).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to bind API server"));
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let listener = bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, _) = broadcast::channel(16);
        let state = Arc::new(ApiState {
            devices: Vec::new(),
            events_tx,
        });
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, state, async move {
            let _ = stopped.await;
        }));

        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok());
        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
