//! Error types for the SafePath environment abstraction.

use thiserror::Error;

/// Errors reported by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The user refused location access
    #[error("Location permission denied")]
    PermissionDenied,

    /// No position fix could be obtained (no signal, service disabled)
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// Alert transport failed (SMS unavailable, relay rejected, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Contacts could not be loaded
    #[error("Contact store error: {0}")]
    ContactStore(String),

    /// The collaborator did not answer in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a location-unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::LocationUnavailable(msg.into())
    }
}
