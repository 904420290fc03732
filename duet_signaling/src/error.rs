//! Error types for the signaling relay and the negotiation client

use crate::negotiation::NegotiationState;
use crate::protocol::ConnectionHandle;
use thiserror::Error;

/// Errors that can occur inside the relay
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The connection handle is not (or no longer) connected
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionHandle),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// State snapshot could not be read or written
    #[error("State store error: {0}")]
    Store(#[from] std::io::Error),
}

/// Errors from client requests at the HTTP boundary
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Missing or malformed `x-connection-handle` header
    #[error("Missing or invalid x-connection-handle header")]
    MissingHandle,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),
}

/// Errors reported by the external media collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media permission denied")]
    PermissionDenied,

    #[error("Media device busy")]
    DeviceBusy,

    #[error("Media connection error: {0}")]
    Connection(String),
}

/// Errors from the signaling channel used by a participant
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The connection was closed (locally, or reaped by the relay)
    #[error("Signaling channel closed")]
    Closed,

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Errors from driving the negotiation state machine
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Operation not allowed in the current state
    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: NegotiationState,
    },
}
