//! Surface gateway
//!
//! Turns Stream Deck (USB or TCP) and HTTP inputs into trigger events for an
//! automation controller, and renders the controller's feedback back onto the
//! hardware.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod feedback;
pub mod queue;
pub mod render;
pub mod trigger;
