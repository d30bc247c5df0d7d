//! Per-control feedback slots with action-priority resolution
//!
//! A control can hold feedback for several action kinds at once (pressed,
//! rotated, ...). Only one bitmap fits on the key, so `get` picks the first
//! populated slot in the caller's priority order.

use std::collections::HashMap;

use super::{Feedback, SomeFeedback};
use crate::trigger::{ActionKind, ControlId};

/// Session-scoped feedback slots, owned by one device handler
#[derive(Debug, Default)]
pub struct FeedbackStore {
    slots: HashMap<ControlId, HashMap<ActionKind, SomeFeedback>>,
}

impl FeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the (control, action) slot
    pub fn set(&mut self, control: ControlId, action: ActionKind, feedback: SomeFeedback) {
        self.slots.entry(control).or_default().insert(action, feedback);
    }

    /// Feedback of the first action in `priorities` that has a slot.
    ///
    /// A slot holding blank feedback still wins over lower priorities; the
    /// result is `None` both for "no slot" and for "winning slot is blank".
    pub fn get(&self, control: &ControlId, priorities: &[ActionKind]) -> Option<&Feedback> {
        let actions = self.slots.get(control)?;
        priorities
            .iter()
            .find_map(|action| actions.get(action))
            .and_then(Option::as_ref)
    }

    /// Drop a single slot, returning what it held
    pub fn remove(&mut self, control: &ControlId, action: ActionKind) -> Option<SomeFeedback> {
        let actions = self.slots.get_mut(control)?;
        let removed = actions.remove(&action);
        if actions.is_empty() {
            self.slots.remove(control);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Controls currently holding any slot, sorted
    pub fn all_feedback_ids(&self) -> Vec<ControlId> {
        let mut ids: Vec<ControlId> = self.slots.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
