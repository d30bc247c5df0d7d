//! Stream Deck devices
//!
//! The hardware library is a black box behind [`DeckBackend`] (enumerate and
//! open USB panels) and [`DeckTransport`] (one open panel, USB or TCP). The
//! session logic shared by both attachments lives in [`handler`].

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::{Device, DeviceEvents};
use crate::error::GatewayError;
use crate::feedback::{SomeFeedback, StylePreset};
use crate::render::{PixelBuffer, RenderPipeline};
use crate::trigger::ControlId;

pub mod handler;
pub mod tcp_proxy;
pub mod virtual_deck;


pub use handler::{SessionOptions, StreamDeckDeviceHandler};

/// What a button shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonFeedback {
    Lcd { width: u32, height: u32 },
    Rgb,
    None,
}

/// One control reported by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDefinition {
    Button { index: u32, feedback: ButtonFeedback },
    Encoder { index: u32 },
    LcdSegment { id: u32, width: u32, height: u32 },
}

/// Touch position on an LCD strip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Input reported by an open panel
#[derive(Debug, Clone, PartialEq)]
pub enum DeckInput {
    Down(ControlId),
    Up(ControlId),
    Rotate(ControlId, f64),
    LcdShortPress(ControlId, Point),
    LcdLongPress(ControlId, Point),
    LcdSwipe(ControlId, Point, Point),
    Error(String),
}

/// An open panel (black-box hardware transport)
#[async_trait]
pub trait DeckTransport: Send + Sync {
    fn controls(&self) -> Vec<ControlDefinition>;

    /// TCP-attached panels cannot be closed, only blanked
    fn is_network(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<DeckInput>;

    async fn set_brightness(&self, percent: u8) -> anyhow::Result<()>;
    async fn clear_panel(&self) -> anyhow::Result<()>;
    async fn clear_key(&self, key: u32) -> anyhow::Result<()>;
    async fn fill_key_buffer(&self, key: u32, pixels: &PixelBuffer) -> anyhow::Result<()>;
    async fn fill_lcd(&self, segment: u32, pixels: &PixelBuffer) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Panel as listed by the USB enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckInfo {
    pub path: String,
    pub serial_number: Option<String>,
}

/// USB enumeration (black-box hardware library)
#[async_trait]
pub trait DeckBackend: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<DeckInfo>>;
    async fn open(&self, path: &str) -> anyhow::Result<Arc<dyn DeckTransport>>;
}

/// Options of a USB-attached Stream Deck
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StreamDeckOptions {
    /// HID device path
    pub path: Option<String>,
    pub serial_number: Option<String>,
    /// Position in the enumeration
    pub index: Option<usize>,
    /// Percent, 0-100 (default 100)
    pub brightness: Option<u8>,
    pub style_presets: Vec<StylePreset>,
}

/// First listed panel matching every configured selector
pub fn match_device<'a>(devices: &'a [DeckInfo], options: &StreamDeckOptions) -> Option<(usize, &'a DeckInfo)> {
    devices.iter().enumerate().find(|(index, info)| {
        options.path.as_ref().map_or(true, |path| &info.path == path)
            && options
                .serial_number
                .as_ref()
                .map_or(true, |serial| info.serial_number.as_ref() == Some(serial))
            && options.index.map_or(true, |wanted| *index == wanted)
    })
}

/// Stream Deck attached over USB
pub struct StreamDeckDevice {
    id: String,
    options: StreamDeckOptions,
    events: DeviceEvents,
    render: RenderPipeline,
    backend: Option<Arc<dyn DeckBackend>>,
    handler: RwLock<Option<StreamDeckDeviceHandler>>,
}

impl StreamDeckDevice {
    pub fn new(
        id: &str,
        options: StreamDeckOptions,
        events: DeviceEvents,
        render: RenderPipeline,
        backend: Option<Arc<dyn DeckBackend>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            options,
            events,
            render,
            backend,
            handler: RwLock::new(None),
        }
    }

    async fn open(&self) -> Result<Arc<dyn DeckTransport>, GatewayError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| GatewayError::Init("no Stream Deck USB backend available".to_string()))?;

        let devices = backend
            .list()
            .await
            .map_err(|e| GatewayError::Init(format!("failed to list Stream Decks: {:#}", e)))?;

        let (index, info) = match_device(&devices, &self.options)
            .ok_or_else(|| GatewayError::Init("Matching device not found".to_string()))?;

        debug!(
            "Stream Deck: path: {}, serialNumber: {}, index: {}",
            info.path,
            info.serial_number.as_deref().unwrap_or("-"),
            index
        );

        backend
            .open(&info.path)
            .await
            .map_err(|e| GatewayError::Init(format!("Could not open device \"{}\": {:#}", info.path, e)))
    }
}

#[async_trait]
impl Device for StreamDeckDevice {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<(), GatewayError> {
        let transport = self.open().await?;
        let handler = StreamDeckDeviceHandler::new(
            SessionOptions::from(&self.options),
            transport,
            self.events.clone(),
            self.render.clone(),
        );
        handler.init().await?;
        *self.handler.write().await = Some(handler);
        info!("✅ Stream Deck {} ready", self.id);
        Ok(())
    }

    async fn destroy(&self) {
        let handler = self.handler.write().await.take();
        if let Some(handler) = handler {
            handler.destroy().await;
        }
    }

    async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback) {
        if let Some(handler) = self.handler.read().await.as_ref() {
            handler.set_feedback(trigger_id, feedback).await;
        }
    }

    async fn clear_feedback_all(&self) {
        if let Some(handler) = self.handler.read().await.as_ref() {
            handler.clear_feedback_all().await;
        }
    }

    fn options_manifest(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(StreamDeckOptions)).unwrap_or_default()
    }
}
