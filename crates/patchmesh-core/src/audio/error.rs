//! Audio server error types

use thiserror::Error;

/// Errors that can occur while talking to the audio server
#[derive(Error, Debug)]
pub enum AudioError {
    /// Could not open a client on the server
    #[error("Audio server unavailable: {0}")]
    ServerUnavailable(String),

    /// Failed to register a port
    #[error("Failed to register port {name}: {reason}")]
    PortRegistration { name: String, reason: String },

    /// Failed to activate or deactivate a client
    #[error("Failed to activate client {0}: {1}")]
    Activation(String, String),

    /// Connect/disconnect request refused by the server
    #[error("Failed to {action} {source_port} -> {sink_port}: {reason}")]
    Connection {
        action: &'static str,
        source_port: String,
        sink_port: String,
        reason: String,
    },

    /// Port name not known to the server
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Shared-memory segment could not be created, opened or mapped
    #[error("Shared memory {name}: {source}")]
    SharedMemory {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed session descriptor
    #[error("Invalid session descriptor: {0}")]
    SessionDescriptor(#[from] serde_json::Error),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
