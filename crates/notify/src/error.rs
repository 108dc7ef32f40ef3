//! Transport error types.

use thiserror::Error;

/// Errors a transport can report for a single delivery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport refused or failed to deliver the message.
    #[error("Delivery of '{event}' on {channel} failed: {reason}")]
    Delivery {
        channel: String,
        event: String,
        reason: String,
    },

    /// The event payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
