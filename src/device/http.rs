//! HTTP trigger device
//!
//! Every request to the listening port becomes a trigger `"<METHOD> <path>"`
//! and is answered with an empty 200. There is nothing to display, so
//! feedback calls are no-ops.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    Router,
};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Device, DeviceEvents};
use crate::error::GatewayError;
use crate::feedback::SomeFeedback;

/// Options of the HTTP trigger device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HttpOptions {
    /// Port to listen on
    pub port: u16,
}

struct RunningServer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct HttpDevice {
    id: String,
    options: HttpOptions,
    events: DeviceEvents,
    server: Mutex<Option<RunningServer>>,
}

/// Router turning every request into a trigger
pub fn trigger_router(events: DeviceEvents) -> Router {
    Router::new().fallback(request_to_trigger).with_state(events)
}

async fn request_to_trigger(State(events): State<DeviceEvents>, method: Method, uri: Uri) -> StatusCode {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let trigger_id = format!("{} {}", method, target);
    debug!("HTTP {}: {}", events.device_id(), trigger_id);
    events.add_trigger_event(trigger_id, None);
    StatusCode::OK
}

impl HttpDevice {
    pub fn new(id: &str, options: HttpOptions, events: DeviceEvents) -> Self {
        Self {
            id: id.to_string(),
            options,
            events,
            server: Mutex::new(None),
        }
    }

    /// Bound address once initialised
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|server| server.local_addr)
    }
}

#[async_trait]
impl Device for HttpDevice {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.options.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Init(format!("failed to bind HTTP trigger server on {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Init(format!("failed to read bound address: {}", e)))?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let router = trigger_router(self.events.clone());
        let id = self.id.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!("HTTP {}: server error: {}", id, e);
            }
        });

        info!("🌐 HTTP trigger device {} listening on http://{}", self.id, local_addr);
        let previous = self.server.lock().replace(RunningServer {
            shutdown,
            task,
            local_addr,
        });
        if let Some(previous) = previous {
            let _ = previous.shutdown.send(());
        }
        Ok(())
    }

    async fn destroy(&self) {
        let server = self.server.lock().take();
        if let Some(server) = server {
            let _ = server.shutdown.send(());
            if let Err(e) = server.task.await {
                warn!("HTTP {}: server task ended abnormally: {}", self.id, e);
            }
            debug!("HTTP {}: server stopped", self.id);
        }
    }

    async fn set_feedback(&self, _trigger_id: &str, _feedback: SomeFeedback) {}

    async fn clear_feedback_all(&self) {}

    fn options_manifest(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(HttpOptions)).unwrap_or_default()
    }
}
