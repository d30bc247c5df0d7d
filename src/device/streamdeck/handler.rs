//! Session logic for one open Stream Deck panel
//!
//! Shared by the USB device and the TCP proxy: maps panel input to trigger
//! events, keeps the feedback store and pushes rendered bitmaps back through a
//! per-panel send queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{ButtonFeedback, ControlDefinition, DeckInput, DeckTransport, Point, StreamDeckOptions};
use crate::device::analog::AnalogTriggers;
use crate::device::DeviceEvents;
use crate::error::{GatewayError, QueueError};
use crate::feedback::{resolve_style, FeedbackStore, SomeFeedback, StylePreset};
use crate::queue::SendQueue;
use crate::render::RenderPipeline;
use crate::trigger::{trigger_id, ActionKind, ControlId, TriggerAddress, ACTION_PRIORITIES};

pub const DEFAULT_BRIGHTNESS: u8 = 100;

/// Options a panel session needs, whichever way the panel is attached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub brightness: Option<u8>,
    pub style_presets: Vec<StylePreset>,
}

impl From<&StreamDeckOptions> for SessionOptions {
    fn from(options: &StreamDeckOptions) -> Self {
        Self {
            brightness: options.brightness,
            style_presets: options.style_presets.clone(),
        }
    }
}

struct HandlerInner {
    transport: Arc<dyn DeckTransport>,
    controls: Vec<ControlDefinition>,
    options: SessionOptions,
    events: DeviceEvents,
    analog: AnalogTriggers,
    render: RenderPipeline,
    feedbacks: Mutex<FeedbackStore>,
    button_down: DashMap<ControlId, bool>,
    queue: SendQueue,
    destroyed: AtomicBool,
}

/// Inner device handler, one per open panel
pub struct StreamDeckDeviceHandler {
    inner: Arc<HandlerInner>,
    input_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamDeckDeviceHandler {
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn DeckTransport>,
        events: DeviceEvents,
        render: RenderPipeline,
    ) -> Self {
        let controls = transport.controls();
        Self {
            inner: Arc::new(HandlerInner {
                transport,
                controls,
                options,
                analog: AnalogTriggers::new(events.clone()),
                events,
                render,
                feedbacks: Mutex::new(FeedbackStore::new()),
                button_down: DashMap::new(),
                queue: SendQueue::new(),
                destroyed: AtomicBool::new(false),
            }),
            input_task: Mutex::new(None),
        }
    }

    /// Set brightness, start listening to the panel and blank it
    pub async fn init(&self) -> Result<(), GatewayError> {
        let brightness = self.inner.options.brightness.unwrap_or(DEFAULT_BRIGHTNESS);
        if let Err(e) = self.inner.transport.set_brightness(brightness).await {
            error!("Stream Deck: Error setting brightness: {:#}", e);
        }

        let mut inputs = self.inner.transport.subscribe();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                match inputs.recv().await {
                    Ok(input) => inner.handle_input(input),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Stream Deck: input lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Stream Deck: input stream closed");
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.input_task.lock().replace(task) {
            previous.abort();
        }

        self.inner
            .transport
            .clear_panel()
            .await
            .map_err(GatewayError::transport)
    }

    /// Stop listening and release the panel. Never fails.
    ///
    /// The release runs on the send queue, behind any redraw already in
    /// flight, so nothing reaches the panel after it.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        if let Some(task) = self.input_task.lock().take() {
            task.abort();
        }
        self.inner.queue.clear();
        self.inner.analog.clear();
        self.inner.feedbacks.lock().clear();
        self.inner.button_down.clear();

        let inner = Arc::clone(&self.inner);
        let release = self.inner.queue.add(
            async move {
                inner.release_transport().await;
                Ok(())
            },
            None,
        );
        if let Err(e) = release.await {
            warn!("Stream Deck: release did not run: {}", e);
        }
    }

    pub async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback) {
        let address = TriggerAddress::parse(trigger_id);
        if address.action.is_empty() {
            return;
        }
        let action = match address.action_kind() {
            Ok(action) => action,
            Err(e) => {
                debug!("Stream Deck: ignoring feedback for '{}': {}", trigger_id, e);
                return;
            }
        };

        self.inner.feedbacks.lock().set(address.control, action, feedback);
        let is_down = self.inner.is_down(address.control);
        log_outcome(self.inner.schedule_update(address.control, is_down).await);
    }

    /// Clear the store and redraw everything it held as released
    pub async fn clear_feedback_all(&self) {
        let ids = {
            let mut feedbacks = self.inner.feedbacks.lock();
            let ids = feedbacks.all_feedback_ids();
            feedbacks.clear();
            ids
        };

        let pending: Vec<_> = ids
            .into_iter()
            .map(|control| self.inner.schedule_update(control, false))
            .collect();
        for outcome in pending {
            log_outcome(outcome.await);
        }
    }
}

impl Drop for StreamDeckDeviceHandler {
    fn drop(&mut self) {
        if let Some(task) = self.input_task.get_mut().take() {
            task.abort();
        }
    }
}

fn log_outcome(outcome: Result<(), QueueError>) {
    match outcome {
        // Superseded by a newer redraw of the same control
        Ok(()) | Err(QueueError::Discarded) => {}
        Err(e) => debug!("Stream Deck: feedback update failed: {}", e),
    }
}

fn position(point: Point) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("xPosition".to_string(), point.x),
        ("yPosition".to_string(), point.y),
    ])
}

impl HandlerInner {
    async fn release_transport(&self) {
        if self.transport.is_network() {
            // A network panel stays connected to its dock; blank it
            let _ = self.transport.clear_panel().await;
        } else if let Err(e) = self.transport.close().await {
            warn!("Stream Deck: Error closing device: {:#}", e);
        }
    }

    fn is_down(&self, control: ControlId) -> bool {
        self.button_down.get(&control).map(|down| *down).unwrap_or(false)
    }

    fn handle_input(self: &Arc<Self>, input: DeckInput) {
        let control = match input {
            DeckInput::Down(control) => {
                self.events.add_trigger_event(trigger_id(control, ActionKind::Down), None);
                self.button_down.insert(control, true);
                control
            }
            DeckInput::Up(control) => {
                self.events.add_trigger_event(trigger_id(control, ActionKind::Up), None);
                self.button_down.insert(control, false);
                control
            }
            DeckInput::Rotate(control, delta) => {
                self.analog.jog(&trigger_id(control, ActionKind::Jog), delta);
                control
            }
            DeckInput::LcdShortPress(control, point) => {
                self.events
                    .add_trigger_event(trigger_id(control, ActionKind::Tap), Some(position(point)));
                control
            }
            DeckInput::LcdLongPress(control, point) => {
                self.events
                    .add_trigger_event(trigger_id(control, ActionKind::Press), Some(position(point)));
                control
            }
            DeckInput::LcdSwipe(control, from, to) => {
                let arguments = BTreeMap::from([
                    ("fromXPosition".to_string(), from.x),
                    ("fromYPosition".to_string(), from.y),
                    ("toXPosition".to_string(), to.x),
                    ("toYPosition".to_string(), to.y),
                ]);
                self.events
                    .add_trigger_event(trigger_id(control, ActionKind::Swipe), Some(arguments));
                control
            }
            DeckInput::Error(message) => {
                error!("Stream Deck: {}", message);
                self.events.emit_error(message);
                return;
            }
        };

        let outcome = self.schedule_update(control, self.is_down(control));
        tokio::spawn(async move { log_outcome(outcome.await) });
    }

    /// Queue a redraw of `control`, replacing any redraw of it still pending
    fn schedule_update(
        self: &Arc<Self>,
        control: ControlId,
        is_down: bool,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send + 'static {
        let class_name = control.to_string();
        self.queue.remove(&class_name);

        let inner = Arc::clone(self);
        self.queue.add(
            async move {
                inner
                    .update_feedback(control, is_down)
                    .await
                    .map_err(anyhow::Error::from)
            },
            Some(&class_name),
        )
    }

    async fn update_feedback(&self, control: ControlId, is_down: bool) -> Result<(), GatewayError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let feedback = self
            .feedbacks
            .lock()
            .get(&control, &ACTION_PRIORITIES)
            .map(|feedback| resolve_style(feedback, &self.options.style_presets));

        let Some(feedback) = feedback else {
            if let Some(key) = control.key() {
                self.transport.clear_key(key).await.map_err(GatewayError::transport)?;
            }
            if let Some(segment) = control.lcd_segment() {
                let (width, height) = self.lcd_segment_size(segment)?;
                let pixels = self.render.render(None, width, height, false)?;
                self.transport
                    .fill_lcd(segment, &pixels)
                    .await
                    .map_err(GatewayError::transport)?;
            }
            return Ok(());
        };

        if let Some(key) = control.key().filter(|key| self.is_valid_button(*key)) {
            let (width, height) = self.button_lcd_size(key)?;
            let pixels = self.render.render(Some(&feedback), width, height, is_down)?;
            self.transport
                .fill_key_buffer(key, &pixels)
                .await
                .map_err(GatewayError::transport)?;
        } else if let Some(segment) = control.lcd_segment() {
            let (width, height) = self.lcd_segment_size(segment)?;
            let pixels = self.render.render(Some(&feedback), width, height, is_down)?;
            self.transport
                .fill_lcd(segment, &pixels)
                .await
                .map_err(GatewayError::transport)?;
        } else {
            debug!("Stream Deck: no drawable control for {}", control);
        }
        Ok(())
    }

    fn is_valid_button(&self, key: u32) -> bool {
        self.controls
            .iter()
            .any(|c| matches!(c, ControlDefinition::Button { index, .. } if *index == key))
    }

    fn button_lcd_size(&self, key: u32) -> Result<(u32, u32), GatewayError> {
        self.controls
            .iter()
            .find_map(|c| match c {
                ControlDefinition::Button {
                    index,
                    feedback: ButtonFeedback::Lcd { width, height },
                } if *index == key => Some((*width, *height)),
                _ => None,
            })
            .ok_or_else(|| {
                GatewayError::render(format!(
                    "Unknown button index: {} or button does not have LCD feedback type",
                    key
                ))
            })
    }

    fn lcd_segment_size(&self, segment: u32) -> Result<(u32, u32), GatewayError> {
        self.controls
            .iter()
            .find_map(|c| match c {
                ControlDefinition::LcdSegment { id, width, height } if *id == segment => Some((*width, *height)),
                _ => None,
            })
            .ok_or_else(|| GatewayError::render(format!("Unknown LCD Segment id: {}", segment)))
    }
}
