//! Device façade
//!
//! Every input mechanism (Stream Deck over USB, Stream Deck over TCP, plain
//! HTTP endpoint) implements [`Device`] and reports what happens on it through
//! a shared [`DeviceEvents`] channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{DeviceConfig, DeviceKind};
use crate::error::GatewayError;
use crate::feedback::SomeFeedback;
use crate::render::RenderPipeline;

pub mod analog;
pub mod http;
pub mod streamdeck;

use streamdeck::tcp_proxy::{NetworkFactory, StreamDeckTcpProxy};
use streamdeck::{DeckBackend, StreamDeckDevice};

/// Bound of the outbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Uniform capability every configured device exposes
///
/// All methods take `&self`; implementations keep their session state behind
/// interior mutability so a device can be shared as `Arc<dyn Device>`.
#[async_trait]
pub trait Device: Send + Sync {
    /// Configured device id
    fn id(&self) -> &str;

    /// Open / match / connect. Fails with `Init` or `Config`.
    async fn init(&self) -> Result<(), GatewayError>;

    /// Best effort teardown, never fails
    async fn destroy(&self);

    /// Show `feedback` for `trigger_id`. Errors are logged, not returned.
    async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback);

    async fn clear_feedback_all(&self);

    /// JSON schema of this variant's options
    fn options_manifest(&self) -> serde_json::Value;
}

/// Something happened on a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DeviceEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEventKind {
    Trigger {
        trigger_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<BTreeMap<String, f64>>,
    },
    Error {
        error: String,
    },
}

/// Create the channel devices report into
pub fn event_channel() -> (mpsc::Sender<DeviceEvent>, mpsc::Receiver<DeviceEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Event sink handed to one device
#[derive(Clone)]
pub struct DeviceEvents {
    device_id: Arc<str>,
    tx: mpsc::Sender<DeviceEvent>,
}

impl DeviceEvents {
    pub fn new(device_id: &str, tx: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            device_id: Arc::from(device_id),
            tx,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn add_trigger_event(&self, trigger_id: impl Into<String>, arguments: Option<BTreeMap<String, f64>>) {
        self.send(DeviceEventKind::Trigger {
            trigger_id: trigger_id.into(),
            arguments,
        });
    }

    pub fn emit_error(&self, error: impl Into<String>) {
        self.send(DeviceEventKind::Error { error: error.into() });
    }

    fn send(&self, kind: DeviceEventKind) {
        let event = DeviceEvent {
            device_id: self.device_id.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        // Never block the input path; drop when the consumer falls behind
        if let Err(e) = self.tx.try_send(event) {
            warn!("Device {}: event dropped ({})", self.device_id, e);
        }
    }
}

/// Transports the devices can be attached to
#[derive(Clone, Default)]
pub struct Backends {
    pub usb: Option<Arc<dyn DeckBackend>>,
    pub network: Option<NetworkFactory>,
}

/// Shared services every device is built with
#[derive(Clone)]
pub struct DeviceContext {
    pub events: mpsc::Sender<DeviceEvent>,
    pub render: RenderPipeline,
    pub backends: Backends,
}

/// Instantiate the device variant selected by its configuration
pub fn build_device(config: &DeviceConfig, ctx: &DeviceContext) -> Arc<dyn Device> {
    let events = DeviceEvents::new(&config.id, ctx.events.clone());
    match &config.kind {
        DeviceKind::StreamDeck(options) => Arc::new(StreamDeckDevice::new(
            &config.id,
            options.clone(),
            events,
            ctx.render.clone(),
            ctx.backends.usb.clone(),
        )),
        DeviceKind::StreamDeckTcp(options) => Arc::new(StreamDeckTcpProxy::new(
            &config.id,
            options.clone(),
            events,
            ctx.render.clone(),
            ctx.backends.network.clone(),
        )),
        DeviceKind::Http(options) => Arc::new(http::HttpDevice::new(&config.id, options.clone(), events)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_trigger_event_shape() {
        let (tx, mut rx) = event_channel();
        let events = DeviceEvents::new("deck", tx);

        let mut args = BTreeMap::new();
        args.insert("xPosition".to_string(), 12.0);
        events.add_trigger_event("LCD0 Tap", Some(args));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id, "deck");

        let mut value = serde_json::to_value(&event).unwrap();
        value.as_object_mut().unwrap().remove("timestamp");
        assert_eq!(
            value,
            json!({
                "device_id": "deck",
                "type": "trigger",
                "trigger_id": "LCD0 Tap",
                "arguments": { "xPosition": 12.0 }
            })
        );
    }

    #[tokio::test]
    async fn test_error_event_and_no_arguments() {
        let (tx, mut rx) = event_channel();
        let events = DeviceEvents::new("deck", tx);

        events.add_trigger_event("3 Down", None);
        events.emit_error("usb gone");

        let trigger = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert!(trigger.get("arguments").is_none());

        let error = rx.recv().await.unwrap();
        assert_eq!(
            error.kind,
            DeviceEventKind::Error {
                error: "usb gone".into()
            }
        );
    }

    #[tokio::test]
    async fn test_build_device_from_config() {
        let (tx, _rx) = event_channel();
        let ctx = DeviceContext {
            events: tx,
            render: RenderPipeline::new(),
            backends: Backends::default(),
        };

        let config: DeviceConfig =
            serde_yaml::from_str("id: web\ntype: http\noptions:\n  port: 0\n").unwrap();
        let device = build_device(&config, &ctx);
        assert_eq!(device.id(), "web");
        assert!(device.options_manifest()["properties"]["port"].is_object());

        // No USB backend attached
        let config: DeviceConfig =
            serde_yaml::from_str("id: desk\ntype: stream_deck\noptions: {}\n").unwrap();
        let device = build_device(&config, &ctx);
        assert!(matches!(device.init().await, Err(GatewayError::Init(_))));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let events = DeviceEvents::new("deck", tx);
        events.add_trigger_event("1 Down", None);
        events.add_trigger_event("1 Up", None);

        let kept = rx.try_recv().unwrap();
        assert_eq!(
            kept.kind,
            DeviceEventKind::Trigger {
                trigger_id: "1 Down".into(),
                arguments: None
            }
        );
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));
    }
}
