//! Error types for the sync engine.

use std::time::Duration;
use storesync_model::{CollectionKind, ModelError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by a remote gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The request failed in transit.
    #[error("request failed: {0}")]
    Request(String),

    /// The remote store rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The remote store is unreachable.
    #[error("remote store unavailable")]
    Unavailable,
}

/// Errors from a snapshot load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A select did not complete in time.
    #[error("fetching {collection} timed out after {after:?}")]
    Timeout {
        /// Table being fetched.
        collection: String,
        /// Configured request timeout.
        after: Duration,
    },

    /// A select returned an error.
    #[error("fetching {collection} failed: {message}")]
    FetchFailure {
        /// Table being fetched.
        collection: String,
        /// Gateway error message.
        message: String,
    },

    /// Every attempt failed.
    #[error("fetching {collection} failed after {attempts} attempts: {last}")]
    MaxRetries {
        /// Table being fetched.
        collection: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<LoadError>,
    },
}

impl LoadError {
    /// Returns the table the failure relates to.
    pub fn collection(&self) -> &str {
        match self {
            LoadError::Timeout { collection, .. }
            | LoadError::FetchFailure { collection, .. }
            | LoadError::MaxRetries { collection, .. } => collection,
        }
    }
}

/// Errors that can occur during synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Snapshot load failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Gateway call failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A change channel could not be established.
    #[error("subscription to {collection} failed: {message}")]
    Subscription {
        /// Collection of the channel.
        collection: CollectionKind,
        /// Failure reason.
        message: String,
    },

    /// A change event could not be interpreted.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A change event named an unknown collection.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// An internal channel closed; the engine is shutting down.
    #[error("engine channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Creates a malformed event error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEvent(message.into())
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Load(_) | SyncError::Subscription { .. } => true,
            SyncError::Gateway(err) => !matches!(err, GatewayError::Rejected(_)),
            _ => false,
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownCollection(name) => SyncError::UnknownCollection(name),
            other => SyncError::MalformedEvent(other.to_string()),
        }
    }
}
