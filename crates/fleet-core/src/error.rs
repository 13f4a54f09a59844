//! Error types for Fleet.
//!
//! Every failure that crosses a crate boundary is one of the variants below.
//! Task reports carry both the rendered message and the [`ErrorKind`] so the
//! manager can act on failures without parsing strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Agent lifecycle
    #[error("Agent registration failed after {attempts} attempts: {message}")]
    RegistrationFailed { attempts: u32, message: String },

    #[error("No container engine or service manager available: {0}")]
    RuntimeUnavailable(String),

    // Provisioning
    #[error("Image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Server {server} not ready after {attempts} probes")]
    ReadinessTimeout { server: String, attempts: u32 },

    #[error("Port {port} is already in use")]
    PortConflict { port: u16 },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Operation not supported by {runtime} runtime: {operation}")]
    Unsupported {
        runtime: String,
        operation: String,
    },

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    // Queue and registry
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    // Shared storage
    #[error("Cluster lease for {tenant} held by {holder}")]
    LeaseHeld { tenant: String, holder: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Infrastructure
    #[error("Manager returned {status}: {message}")]
    Manager { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RegistrationFailed,
    RuntimeUnavailable,
    ImagePull,
    ReadinessTimeout,
    PortConflict,
    ContainerNotFound,
    Unsupported,
    InvalidConfig,
    InvalidTransition,
    NotFound,
    Unauthorized,
    LeaseHeld,
    Cancelled,
    Manager,
    Network,
    Io,
    Serialization,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RegistrationFailed { .. } => ErrorKind::RegistrationFailed,
            Error::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Error::ImagePull { .. } => ErrorKind::ImagePull,
            Error::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Error::PortConflict { .. } => ErrorKind::PortConflict,
            Error::ContainerNotFound(_) => ErrorKind::ContainerNotFound,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::TaskNotFound(_) | Error::AgentNotFound(_) | Error::MachineNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::LeaseHeld { .. } => ErrorKind::LeaseHeld,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Manager { .. } => ErrorKind::Manager,
            Error::Network(_) => ErrorKind::Network,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error means the target is already gone. Teardown paths
    /// treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ContainerNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_renders_screaming_snake() {
        assert_eq!(ErrorKind::ReadinessTimeout.to_string(), "READINESS_TIMEOUT");
        assert_eq!(
            Error::ContainerNotFound("gs-1".into()).kind(),
            ErrorKind::ContainerNotFound
        );
    }

    #[test]
    fn test_lookup_errors_share_not_found_kind() {
        assert_eq!(Error::TaskNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::AgentNotFound("x".into()).kind(), ErrorKind::NotFound);
    }
}
