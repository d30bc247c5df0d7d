//! Trigger identifiers
//!
//! A control on the surface is addressed as `<Prefix><Index>`:
//! - `""`    - button key (`7`)
//! - `"Enc"` - rotary encoder (`Enc2`), paired with the LCD segment of the same index
//! - `"LCD"` - LCD segment (`LCD0`)
//!
//! A full trigger string appends the action token: `Enc2 Jog`, `3 Down`.

use std::fmt;
use std::str::FromStr;

const ENCODER_PREFIX: &str = "Enc";
const LCD_PREFIX: &str = "LCD";

/// One addressable control element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlId {
    Button(u32),
    Encoder(u32),
    LcdSegment(u32),
}

impl ControlId {
    /// Decode a control id. Never fails: anything unparseable is button key 0.
    pub fn parse(id: &str) -> Self {
        if let Some(index) = id.strip_prefix(ENCODER_PREFIX).and_then(parse_digits) {
            return Self::Encoder(index);
        }
        if let Some(index) = id.strip_prefix(LCD_PREFIX).and_then(parse_digits) {
            return Self::LcdSegment(index);
        }
        Self::Button(parse_digits(id).unwrap_or(0))
    }

    /// Button key index, if this control is a key
    pub fn key(&self) -> Option<u32> {
        match self {
            Self::Button(index) => Some(*index),
            _ => None,
        }
    }

    pub fn encoder(&self) -> Option<u32> {
        match self {
            Self::Encoder(index) => Some(*index),
            _ => None,
        }
    }

    /// LCD segment drawn for this control (encoders draw on the segment of their index)
    pub fn lcd_segment(&self) -> Option<u32> {
        match self {
            Self::Encoder(index) | Self::LcdSegment(index) => Some(*index),
            Self::Button(_) => None,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::Button(_) => "",
            Self::Encoder(_) => ENCODER_PREFIX,
            Self::LcdSegment(_) => LCD_PREFIX,
        }
    }

    fn index(&self) -> u32 {
        match self {
            Self::Button(index) | Self::Encoder(index) | Self::LcdSegment(index) => *index,
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.index())
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Action part of a trigger. Declaration order is not display priority,
/// see [`ACTION_PRIORITIES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Down,
    Up,
    Jog,
    Move,
    Shuttle,
    TBar,
    Tap,
    Press,
    Swipe,
}

/// Which feedback wins when several action kinds of one control carry feedback
pub const ACTION_PRIORITIES: [ActionKind; 6] = [
    ActionKind::Down,
    ActionKind::Up,
    ActionKind::Jog,
    ActionKind::Move,
    ActionKind::Shuttle,
    ActionKind::TBar,
];

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "Down",
            Self::Up => "Up",
            Self::Jog => "Jog",
            Self::Move => "Move",
            Self::Shuttle => "Shuttle",
            Self::TBar => "T-Bar",
            Self::Tap => "Tap",
            Self::Press => "Press",
            Self::Swipe => "Swipe",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown action token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Down" => Self::Down,
            "Up" => Self::Up,
            "Jog" => Self::Jog,
            "Move" => Self::Move,
            "Shuttle" => Self::Shuttle,
            "T-Bar" => Self::TBar,
            "Tap" => Self::Tap,
            "Press" => Self::Press,
            "Swipe" => Self::Swipe,
            other => return Err(UnknownAction(other.to_string())),
        })
    }
}

/// A decoded `<id> <action>` trigger string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerAddress {
    pub control: ControlId,
    /// Raw action token, empty when the trigger had none
    pub action: String,
}

impl TriggerAddress {
    pub fn parse(trigger_id: &str) -> Self {
        let mut parts = trigger_id.split_whitespace();
        let control = ControlId::parse(parts.next().unwrap_or("0"));
        let action = parts.next().unwrap_or_default().to_string();
        Self { control, action }
    }

    pub fn action_kind(&self) -> Result<ActionKind, UnknownAction> {
        self.action.parse()
    }
}

/// Build the full trigger string for a control and action
pub fn trigger_id(control: ControlId, action: ActionKind) -> String {
    format!("{} {}", control, action)
}
