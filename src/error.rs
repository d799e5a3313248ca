use thiserror::Error;

use crate::dsp::engine::NodeId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WeaverError>;

#[derive(Debug, Error)]
pub enum WeaverError {
    /// The audio host cannot provide what was asked for (bad sample rate,
    /// closed context). Not retried.
    #[error("audio not supported: {0}")]
    Unsupported(String),

    /// Input bytes could not be turned into PCM. The caller may retry with
    /// a different file.
    #[error("could not decode audio: {0}")]
    Decode(String),

    /// Offline render aborted. Partial output has been discarded.
    #[error("render failed: {0}")]
    Render(String),

    /// An automation event was rejected by a parameter timeline.
    #[error("automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("node {0:?} does not exist in this context")]
    UnknownNode(NodeId),

    #[error("render cancelled")]
    Cancelled,

    #[error("invalid config: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AutomationError {
    #[error("event at {time}s precedes the last scheduled event at {last}s")]
    OutOfOrder { time: f64, last: f64 },

    #[error("event time {0} is not a finite, non-negative number")]
    InvalidTime(f64),

    #[error("value {0} is not finite")]
    InvalidValue(f32),
}

impl WeaverError {
    /// True for conditions a user can recover from by retrying (another
    /// file, another export attempt).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WeaverError::Decode(_) | WeaverError::Render(_) | WeaverError::Cancelled
        )
    }
}
