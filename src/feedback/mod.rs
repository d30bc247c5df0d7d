//! Feedback values - what a control should currently show
//!
//! Feedback arrives from the automation controller as JSON. `None` (JSON `null`)
//! is a valid value and means "blank".

pub mod store;
pub mod style;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use store::FeedbackStore;
pub use style::resolve_style;

/// Broadcast tally state, independently combinable bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Tally(pub u8);

impl Tally {
    pub const NONE: Tally = Tally(0);
    pub const ACTIVE: Tally = Tally(1);
    pub const NEXT: Tally = Tally(1 << 1);
    pub const OTHER: Tally = Tally(1 << 2);
    pub const PRESENT: Tally = Tally(1 << 3);

    pub fn contains(self, other: Tally) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Tally {
    type Output = Tally;

    fn bitor(self, rhs: Tally) -> Tally {
        Tally(self.0 | rhs.0)
    }
}

/// Named visual style; `id` may carry a tally qualifier (`live:active`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StylePreset {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    /// Font size in reference units (scaled by height / 72)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
}

impl StylePreset {
    /// Overlay `self` on top of `base`: fields set here win.
    pub fn merged_over(&self, base: &StylePreset) -> StylePreset {
        StylePreset {
            id: if self.id.is_empty() {
                base.id.clone()
            } else {
                self.id.clone()
            },
            background_color: self
                .background_color
                .clone()
                .or_else(|| base.background_color.clone()),
            text_color: self.text_color.clone().or_else(|| base.text_color.clone()),
            font_size: self.font_size.or(base.font_size),
            font_weight: self.font_weight.clone().or_else(|| base.font_weight.clone()),
        }
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackContent {
    /// Text label, `\n` separates lines
    Text { text: String },
    /// Solid colour tile with an optional label
    Indicator {
        color: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Horizontal level bar, `value` in 0.0..=1.0
    Gauge {
        value: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Image file scaled to the control
    Image { path: String },
}

/// What to display for one trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tally: Option<Tally>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_class_names: Option<Vec<String>>,
    /// Explicit style; wins over any matching preset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StylePreset>,
    #[serde(flatten)]
    pub content: FeedbackContent,
}

impl Feedback {
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_content(FeedbackContent::Text { text: text.into() })
    }

    pub fn from_content(content: FeedbackContent) -> Self {
        Self {
            tally: None,
            style_class_names: None,
            style: None,
            content,
        }
    }

    pub fn with_tally(mut self, tally: Tally) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn with_classes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.style_class_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn tally_bits(&self) -> Tally {
        self.tally.unwrap_or_default()
    }
}

/// Feedback or blank
pub type SomeFeedback = Option<Feedback>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tally_bits() {
        let tally = Tally::ACTIVE | Tally::PRESENT;
        assert!(tally.contains(Tally::ACTIVE));
        assert!(tally.contains(Tally::PRESENT));
        assert!(!tally.contains(Tally::NEXT));
        assert!(!tally.contains(Tally::NONE));
    }

    #[test]
    fn test_feedback_from_json() {
        let fb: Feedback = serde_json::from_value(json!({
            "kind": "text",
            "text": "CAM 1",
            "tally": 3,
            "style_class_names": ["camera"]
        }))
        .unwrap();

        assert_eq!(fb.content, FeedbackContent::Text { text: "CAM 1".into() });
        assert!(fb.tally_bits().contains(Tally::NEXT));
        assert_eq!(fb.style_class_names.as_deref(), Some(&["camera".to_string()][..]));
    }

    #[test]
    fn test_null_is_blank() {
        let fb: SomeFeedback = serde_json::from_value(json!(null)).unwrap();
        assert!(fb.is_none());
    }

    #[test]
    fn test_explicit_style_wins_in_merge() {
        let preset = StylePreset {
            id: "live".into(),
            background_color: Some("#c00000".into()),
            text_color: Some("#ffffff".into()),
            ..Default::default()
        };
        let explicit = StylePreset {
            text_color: Some("#ffff00".into()),
            ..Default::default()
        };

        let merged = explicit.merged_over(&preset);
        assert_eq!(merged.id, "live");
        assert_eq!(merged.background_color.as_deref(), Some("#c00000"));
        assert_eq!(merged.text_color.as_deref(), Some("#ffff00"));
    }
}
