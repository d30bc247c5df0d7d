//! Rate-limited analog trigger events
//!
//! Rotations arrive far faster than a controller needs them. Updates for the
//! same trigger inside one window are folded into a single event, emitted when
//! the window closes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::DeviceEvents;

/// Window over which analog updates are merged
pub const DEFAULT_ANALOG_RATE_LIMIT: Duration = Duration::from_millis(50);

pub type AnalogValues = BTreeMap<String, f64>;

/// Per-device accumulator of pending analog events
#[derive(Clone)]
pub struct AnalogTriggers {
    events: DeviceEvents,
    pending: Arc<Mutex<HashMap<String, AnalogValues>>>,
}

impl AnalogTriggers {
    pub fn new(events: DeviceEvents) -> Self {
        Self {
            events,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fold an update into the pending event for `trigger_id`.
    ///
    /// `update` receives the values accumulated so far in this window (`None`
    /// for the first update) and returns the new values.
    pub fn update_trigger_analog<F>(&self, trigger_id: &str, rate_limit: Duration, update: F)
    where
        F: FnOnce(Option<&AnalogValues>) -> AnalogValues,
    {
        let mut pending = self.pending.lock();
        if let Some(values) = pending.get_mut(trigger_id) {
            *values = update(Some(&*values));
            return;
        }
        pending.insert(trigger_id.to_string(), update(None));
        drop(pending);

        let trigger_id = trigger_id.to_string();
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(rate_limit).await;
            let values = pending.lock().remove(&trigger_id);
            if let Some(values) = values {
                trace!("Analog {}: {:?}", trigger_id, values);
                events.add_trigger_event(trigger_id, Some(values));
            }
        });
    }

    /// Encoder rotation: accumulate `deltaValue`, report `direction = -1`
    pub fn jog(&self, trigger_id: &str, delta: f64) {
        self.update_trigger_analog(trigger_id, DEFAULT_ANALOG_RATE_LIMIT, |prev| {
            let previous = prev.and_then(|v| v.get("deltaValue").copied()).unwrap_or(0.0);
            let mut values = AnalogValues::new();
            values.insert("deltaValue".to_string(), previous + delta);
            values.insert("direction".to_string(), -1.0);
            values
        });
    }

    /// Forget pending events (session teardown)
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}
