//! Error types for the cancellation lifecycle.

use std::fmt;

use thiserror::Error;

use crate::models::{RequestId, ServiceKey};
use crate::policy::ExemptionKind;

/// Errors returned by lifecycle commands.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The service is exempt from cancellation by policy.
    #[error("Service '{name}' cannot be cancelled ({kind})")]
    NotCancellable { name: String, kind: ExemptionKind },

    /// A cancellation for this service is already recorded or in flight.
    #[error("Cancellation already in progress for {key}: {reason}")]
    AlreadyInProgress {
        key: ServiceKey,
        reason: InProgressReason,
    },

    /// The outbound cancellation call failed.
    #[error("Cancellation request failed: {0}")]
    Transport(#[from] TransportError),

    /// The horizon pushes the ETA past the representable time range.
    #[error("Cancellation horizon {horizon} is out of range")]
    HorizonOutOfRange { horizon: chrono::Duration },

    /// The cancellation succeeded remotely but could not be recorded.
    #[error("Failed to record cancellation: {0}")]
    Store(#[from] StoreError),
}

/// Why a service is considered to already have a cancellation in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InProgressReason {
    /// The service holds its own pending record.
    OwnRecord(RequestId),
    /// The service's parent holds a pending record.
    ViaParent(String),
    /// A request for this service is still awaiting the transport.
    InFlight,
}

impl fmt::Display for InProgressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnRecord(request_id) => write!(f, "pending request {request_id}"),
            Self::ViaParent(parent) => write!(f, "parent '{parent}' is being cancelled"),
            Self::InFlight => write!(f, "a request is already awaiting a response"),
        }
    }
}

/// Errors from the cancellation state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record already exists for the key.
    #[error("A pending cancellation already exists for {key} (request {request_id})")]
    DuplicateRequest {
        key: ServiceKey,
        request_id: RequestId,
    },

    /// Another live record already uses this request id.
    #[error("Request id {request_id} is already used by {existing_key}")]
    DuplicateRequestId {
        request_id: RequestId,
        existing_key: ServiceKey,
    },

    /// Reading or writing the durable slot failed.
    #[error("Failed to write {path}: {reason}")]
    Io { path: String, reason: String },

    /// Encoding the payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store lock was poisoned by a panicking writer.
    #[error("Cancellation store lock poisoned")]
    Poisoned,
}

/// The persisted cancellation payload could not be read.
///
/// This is never returned from a store constructor; the store recovers by
/// starting empty and keeps this value around as a warning.
#[derive(Debug, Clone, Error)]
#[error("Cancellation state at {path} is unreadable: {reason}")]
pub struct PersistenceCorruptError {
    pub path: String,
    pub reason: String,
}

/// Errors from the cancellation request transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    /// The endpoint answered `success: false`.
    #[error("{0}")]
    Rejected(String),

    /// The response body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors building an override policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A child was declared under more than one parent.
    #[error("Service '{child}' is declared under both '{first}' and '{second}'")]
    ConflictingParent {
        child: String,
        first: String,
        second: String,
    },

    /// A service was declared as its own child.
    #[error("Service '{0}' cannot be its own child")]
    SelfParent(String),
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    /// The config file is not valid TOML.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The override policy section is inconsistent.
    #[error("Invalid override policy: {0}")]
    Policy(#[from] PolicyError),
}

/// Errors loading a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("Failed to read catalog {path}: {reason}")]
    Io { path: String, reason: String },

    /// The catalog is not valid JSON.
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// A service has a negative or non-finite cost.
    #[error("Service '{name}' has an invalid cost: {cost}")]
    InvalidCost { name: String, cost: f64 },
}
