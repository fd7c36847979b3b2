//! Error types for the commissioning engine.

use uuid::Uuid;

use crate::flow::InputKind;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reported by the cloud collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CloudError {
    #[error("Cloud request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Cloud request {operation} timed out")]
    Timeout { operation: String },

    #[error("Cloud authentication failed")]
    AuthFailed,

    #[error("Cloud entity not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid response from cloud: {0}")]
    InvalidResponse(String),
}

impl CloudError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::Timeout { .. })
    }
}

/// Errors reported by the wireless transport collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("No advertising device found for serial {serial}")]
    DeviceNotFound { serial: String },

    #[error("Connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Pairing with {address} rejected: wrong mobile secret")]
    PairingRejected { address: String },

    #[error("Transport request timed out")]
    Timeout,

    #[error("Session disconnected")]
    Disconnected,

    #[error("Unexpected protocol reply: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::ConnectFailed { .. }
                | Self::Timeout
                | Self::Disconnected
        )
    }
}

/// Errors raised when writing to the setup contexts.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Context field {field} is already set")]
    AlreadySet { field: &'static str },

    #[error("Context field {field} is required but not set")]
    Missing { field: &'static str },
}

/// Flow manager errors surfaced to UI entry points.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("No active setup flow")]
    NoActiveFlow,

    #[error("Flow {id} already started")]
    AlreadyStarted { id: Uuid },

    #[error("Flow {id} is not expecting {input} input")]
    UnexpectedInput { id: Uuid, input: InputKind },

    #[error("Invalid {input} input: {reason}")]
    InvalidInput { input: InputKind, reason: String },
}

/// Errors from the concurrency scopes.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Background work panicked: {0}")]
    WorkerPanicked(String),

    #[error("Background work was aborted")]
    WorkerAborted,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
