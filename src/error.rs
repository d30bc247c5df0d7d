//! Error kinds shared by devices, the render pipeline and the send queue

use std::fmt::Display;
use thiserror::Error;

/// Errors surfaced by the gateway core
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Device could not be found, matched or opened. Fatal to that device's startup.
    #[error("device init failed: {0}")]
    Init(String),

    /// Write/communication failure. The device stays usable afterwards.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid or missing configuration field
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unknown control index, unsupported feedback, rasterizer failure
    #[error("render failed: {0}")]
    Render(String),
}

impl GatewayError {
    /// Wrap a transport-level failure (the transport traits speak `anyhow`)
    pub fn transport(err: impl Display) -> Self {
        Self::Transport(format!("{:#}", err))
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}

/// Outcome of a job submitted to a [`SendQueue`](crate::queue::SendQueue)
#[derive(Debug, Error)]
pub enum QueueError {
    /// The job ran and returned an error
    #[error("queued job failed: {0:#}")]
    Failed(anyhow::Error),

    /// The job was dropped by `remove`/`clear` before it started
    #[error("queued job was discarded before it started")]
    Discarded,
}

impl QueueError {
    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("fillKeyBuffer failed");
        let wrapped = GatewayError::transport(err);
        assert_eq!(
            wrapped.to_string(),
            "transport error: fillKeyBuffer failed: socket closed"
        );
    }

    #[test]
    fn test_discarded_flag() {
        assert!(QueueError::Discarded.is_discarded());
        assert!(!QueueError::Failed(anyhow::anyhow!("boom")).is_discarded());
    }
}
