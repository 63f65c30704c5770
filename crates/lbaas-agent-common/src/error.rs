//! Error types for agent manager operations.
//!
//! All collaborator calls (device driver, control-plane RPC client) report
//! failures through [`AgentError`]. All errors implement `std::error::Error`
//! via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for agent manager operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while reconciling or propagating state.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A call into the managed-device driver failed.
    #[error("Device operation failed: {operation}: {message}")]
    Device {
        /// The operation that failed (e.g., "purge", "backup_configuration").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A call into the control-plane RPC client failed.
    #[error("Control plane operation failed: {operation}: {message}")]
    ControlPlane {
        /// The operation that failed (e.g., "validate_state").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A forwarding entry could not be interpreted.
    #[error("Invalid FDB entry for network {network_id}: {message}")]
    InvalidFdbEntry {
        /// The network the entry belongs to.
        network_id: String,
        /// Error message.
        message: String,
    },

    /// No tunnel is known for the network.
    #[error("No tunnel known for network '{network_id}'")]
    TunnelNotFound {
        /// The network identifier.
        network_id: String,
    },

    /// IO error (config file access).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl AgentError {
    /// Creates a device driver error.
    pub fn device(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a control-plane error.
    pub fn control_plane(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid FDB entry error.
    pub fn invalid_fdb_entry(network_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFdbEntry {
            network_id: network_id.into(),
            message: message.into(),
        }
    }

    /// Creates a tunnel not found error.
    pub fn tunnel_not_found(network_id: impl Into<String>) -> Self {
        Self::TunnelNotFound {
            network_id: network_id.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Device { .. } | AgentError::ControlPlane { .. } | AgentError::Io(_)
        )
    }
}
