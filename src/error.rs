//! Error types for Synheart Ergo

use thiserror::Error;

/// Errors that can occur while configuring or running the engine
#[derive(Debug, Error)]
pub enum ErgoError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse landmark frame: {0}")]
    ParseError(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Monitor runtime error: {0}")]
    Runtime(String),
}

/// Errors reported by a frame source for a single acquisition attempt
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// The frame could not be read this time; the next attempt may succeed.
    #[error("Transient frame acquisition failure: {0}")]
    Transient(String),

    /// The device is gone. Not recoverable by retrying.
    #[error("Frame source disconnected: {0}")]
    Disconnected(String),
}

/// A subscriber could not accept a message
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Subscriber closed")]
    Closed,

    #[error("Subscriber queue full")]
    Full,

    #[error("Delivery failed: {0}")]
    Other(String),
}
