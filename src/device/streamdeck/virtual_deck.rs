//! In-process Stream Deck used by `--simulate` and the tests
//!
//! Records every write it receives and lets the caller inject panel input.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::tcp_proxy::{ConnectionEvent, ConnectionManager};
use super::{ButtonFeedback, ControlDefinition, DeckBackend, DeckInfo, DeckInput, DeckTransport};
use crate::render::PixelBuffer;

/// One call received by the virtual panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckWrite {
    Brightness(u8),
    ClearPanel,
    ClearKey(u32),
    FillKey { key: u32, width: u32, height: u32 },
    FillLcd { segment: u32, width: u32, height: u32 },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Surface {
    Key(u32),
    Lcd(u32),
}

pub struct VirtualDeck {
    controls: Vec<ControlDefinition>,
    network: bool,
    inputs: broadcast::Sender<DeckInput>,
    writes: Mutex<Vec<DeckWrite>>,
    frames: Mutex<HashMap<Surface, PixelBuffer>>,
    fail_writes: AtomicBool,
}

impl VirtualDeck {
    pub fn new(controls: Vec<ControlDefinition>) -> Self {
        let (inputs, _) = broadcast::channel(256);
        Self {
            controls,
            network: false,
            inputs,
            writes: Mutex::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Stream Deck+ shaped panel: 8 LCD keys, 4 encoders, one LCD segment per encoder
    pub fn plus() -> Self {
        let mut controls: Vec<ControlDefinition> = (0..8)
            .map(|index| ControlDefinition::Button {
                index,
                feedback: ButtonFeedback::Lcd {
                    width: 120,
                    height: 120,
                },
            })
            .collect();
        controls.extend((0..4).map(|index| ControlDefinition::Encoder { index }));
        controls.extend((0..4).map(|id| ControlDefinition::LcdSegment {
            id,
            width: 200,
            height: 100,
        }));
        Self::new(controls)
    }

    /// Network dock without any panel behind it
    pub fn empty_dock() -> Self {
        Self::new(Vec::new()).networked()
    }

    /// Behave like a TCP-attached panel
    pub fn networked(mut self) -> Self {
        self.network = true;
        self
    }

    pub fn inject(&self, input: DeckInput) {
        if self.inputs.send(input).is_err() {
            debug!("Virtual deck: input dropped, nobody is listening");
        }
    }

    pub fn writes(&self) -> Vec<DeckWrite> {
        self.writes.lock().clone()
    }

    pub fn take_writes(&self) -> Vec<DeckWrite> {
        std::mem::take(&mut *self.writes.lock())
    }

    /// Last bitmap pushed to a key
    pub fn key_frame(&self, key: u32) -> Option<PixelBuffer> {
        self.frames.lock().get(&Surface::Key(key)).cloned()
    }

    pub fn lcd_frame(&self, segment: u32) -> Option<PixelBuffer> {
        self.frames.lock().get(&Surface::Lcd(segment)).cloned()
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn record(&self, write: DeckWrite) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("virtual deck rejected {:?}", write);
        }
        self.writes.lock().push(write);
        Ok(())
    }
}

#[async_trait]
impl DeckTransport for VirtualDeck {
    fn controls(&self) -> Vec<ControlDefinition> {
        self.controls.clone()
    }

    fn is_network(&self) -> bool {
        self.network
    }

    fn subscribe(&self) -> broadcast::Receiver<DeckInput> {
        self.inputs.subscribe()
    }

    async fn set_brightness(&self, percent: u8) -> anyhow::Result<()> {
        self.record(DeckWrite::Brightness(percent))
    }

    async fn clear_panel(&self) -> anyhow::Result<()> {
        self.record(DeckWrite::ClearPanel)?;
        self.frames.lock().clear();
        Ok(())
    }

    async fn clear_key(&self, key: u32) -> anyhow::Result<()> {
        self.record(DeckWrite::ClearKey(key))?;
        self.frames.lock().remove(&Surface::Key(key));
        Ok(())
    }

    async fn fill_key_buffer(&self, key: u32, pixels: &PixelBuffer) -> anyhow::Result<()> {
        self.record(DeckWrite::FillKey {
            key,
            width: pixels.width(),
            height: pixels.height(),
        })?;
        self.frames.lock().insert(Surface::Key(key), pixels.clone());
        Ok(())
    }

    async fn fill_lcd(&self, segment: u32, pixels: &PixelBuffer) -> anyhow::Result<()> {
        self.record(DeckWrite::FillLcd {
            segment,
            width: pixels.width(),
            height: pixels.height(),
        })?;
        self.frames.lock().insert(Surface::Lcd(segment), pixels.clone());
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.record(DeckWrite::Close)
    }
}

/// USB enumeration over a fixed set of virtual panels
pub struct VirtualBackend {
    decks: Vec<(DeckInfo, Arc<VirtualDeck>)>,
}

impl VirtualBackend {
    pub fn new(decks: Vec<(DeckInfo, Arc<VirtualDeck>)>) -> Self {
        Self { decks }
    }

    pub fn single(deck: Arc<VirtualDeck>) -> Self {
        Self::new(vec![(
            DeckInfo {
                path: "virtual-0".to_string(),
                serial_number: Some("VIRTUAL0".to_string()),
            },
            deck,
        )])
    }
}

#[async_trait]
impl DeckBackend for VirtualBackend {
    async fn list(&self) -> anyhow::Result<Vec<DeckInfo>> {
        Ok(self.decks.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn open(&self, path: &str) -> anyhow::Result<Arc<dyn DeckTransport>> {
        let (_, deck) = self
            .decks
            .iter()
            .find(|(info, _)| info.path == path)
            .ok_or_else(|| anyhow::anyhow!("no virtual deck at {}", path))?;
        Ok(Arc::clone(deck) as Arc<dyn DeckTransport>)
    }
}

/// Connection manager whose connection events are driven by the caller
#[derive(Default)]
pub struct VirtualConnectionManager {
    auto_connect: Option<Arc<VirtualDeck>>,
    events: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
    target: Mutex<Option<(String, u16)>>,
    disconnected_all: AtomicBool,
}

impl VirtualConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `deck` as connected as soon as `connect_to` is called
    pub fn auto_connect(deck: Arc<VirtualDeck>) -> Self {
        Self {
            auto_connect: Some(deck),
            ..Self::default()
        }
    }

    /// Address passed to `connect_to`
    pub fn target(&self) -> Option<(String, u16)> {
        self.target.lock().clone()
    }

    pub fn disconnected_all(&self) -> bool {
        self.disconnected_all.load(Ordering::SeqCst)
    }

    pub async fn connect(&self, deck: Arc<VirtualDeck>) {
        self.emit(ConnectionEvent::Connected(deck as Arc<dyn DeckTransport>)).await;
    }

    pub async fn disconnect(&self) {
        self.emit(ConnectionEvent::Disconnected).await;
    }

    pub async fn fail(&self, message: &str) {
        self.emit(ConnectionEvent::Error(message.to_string())).await;
    }

    async fn emit(&self, event: ConnectionEvent) {
        let sender = self.events.lock().clone();
        match sender {
            Some(sender) => {
                if sender.send(event).await.is_err() {
                    debug!("Virtual connection: proxy stopped listening");
                }
            }
            None => debug!("Virtual connection: not connecting, event dropped"),
        }
    }
}

#[async_trait]
impl ConnectionManager for VirtualConnectionManager {
    async fn connect_to(&self, address: &str, port: u16) -> anyhow::Result<mpsc::Receiver<ConnectionEvent>> {
        let (tx, rx) = mpsc::channel(32);
        *self.target.lock() = Some((address.to_string(), port));
        if let Some(deck) = &self.auto_connect {
            tx.send(ConnectionEvent::Connected(Arc::clone(deck) as Arc<dyn DeckTransport>))
                .await
                .map_err(|_| anyhow::anyhow!("connection event channel closed"))?;
        }
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn disconnect_from_all(&self) {
        self.disconnected_all.store(true, Ordering::SeqCst);
        self.events.lock().take();
    }
}
