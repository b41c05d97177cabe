//! Error types for the deposit bot.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No channel registered under {0}")]
    UnknownChannel(String),
}

/// Session storage errors. Fatal for the event being processed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to save session {session_id}: {reason}")]
    SaveFailed { session_id: String, reason: String },

    #[error("Failed to clear session {session_id}: {reason}")]
    ClearFailed { session_id: String, reason: String },
}

/// Errors from the external rate and verification services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("{service} returned no rate for {currency}")]
    MissingRate { service: String, currency: String },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
