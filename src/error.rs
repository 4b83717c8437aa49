//! Error types shared by the controller and node orchestrators.
//!
//! Every failure is scoped to the request that produced it. Callers map a
//! [`DriverError`] onto the volume-plugin status codes through
//! [`DriverError::code`].

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::node::MountError;
use crate::provider::ProviderError;

/// Status codes surfaced to orchestrator sidecars.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCode {
    /// Malformed name, size, identifier or capability.
    InvalidArgument,
    /// Unknown volume or node.
    NotFound,
    /// Name collision with incompatible parameters.
    AlreadyExists,
    /// Operation not allowed in the current state.
    FailedPrecondition,
    /// Node attachment ceiling reached.
    ResourceExhausted,
    /// Lock contention or stale pagination token; retry.
    Aborted,
    /// Transient provider failure after local retries; retry.
    Unavailable,
    /// Polling for a provider operation timed out.
    DeadlineExceeded,
    /// Irrecoverable provider or host failure.
    Internal,
}

impl ErrorCode {
    /// Returns the canonical upper-case name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Aborted => "ABORTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors raised by lifecycle operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when a request field is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Raised when the referenced volume is not registered.
    #[error("volume {volume_id} not found")]
    VolumeNotFound {
        /// Identifier supplied by the caller.
        volume_id: String,
    },
    /// Raised when a create request reuses a name with different parameters.
    #[error(
        "volume {name} already exists with size {existing_size_gb} GB in {existing_location}"
    )]
    AlreadyExists {
        /// Name shared by both requests.
        name: String,
        /// Size recorded for the existing volume.
        existing_size_gb: u32,
        /// Location recorded for the existing volume.
        existing_location: String,
    },
    /// Raised when an operation requires the volume to be detached.
    #[error("volume {volume_id} is attached to node {node_id}")]
    VolumeAttached {
        /// Volume identifier.
        volume_id: String,
        /// Node currently holding the attachment.
        node_id: String,
    },
    /// Raised when a volume and node live in different locations.
    #[error(
        "volume {volume_id} in {volume_location} cannot attach to node {node_id} in {node_location}"
    )]
    LocationMismatch {
        /// Volume identifier.
        volume_id: String,
        /// Location the volume was created in.
        volume_location: String,
        /// Target node.
        node_id: String,
        /// Location reported for the node.
        node_location: String,
    },
    /// Raised when a node has no attachment slots left.
    #[error("node {node_id} already has {attached} of {limit} volumes attached")]
    NodeAtCapacity {
        /// Node identifier.
        node_id: String,
        /// Volumes currently attached.
        attached: usize,
        /// Per-node ceiling.
        limit: usize,
    },
    /// Raised when another lifecycle operation still owns the volume.
    #[error("volume {volume_id} is {status}; retry once the pending operation finishes")]
    OperationPending {
        /// Volume identifier.
        volume_id: String,
        /// Transitional status the volume is in.
        status: String,
    },
    /// Raised when a lock cannot be acquired within the configured bound.
    #[error("timed out after {waited_ms} ms waiting for lock on {key}")]
    LockTimeout {
        /// Lock key that stayed contended.
        key: String,
        /// Time spent waiting.
        waited_ms: u128,
    },
    /// Raised when a pagination token cannot be resolved.
    #[error("invalid starting token {token}")]
    InvalidToken {
        /// Token supplied by the caller.
        token: String,
    },
    /// Raised when a provider operation does not finish before the deadline.
    #[error("timeout waiting for {action} on {resource}")]
    Timeout {
        /// Action being awaited.
        action: String,
        /// Provider resource identifier.
        resource: String,
    },
    /// Wrapper for provider failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Wrapper for host mount failures.
    #[error(transparent)]
    Mount(#[from] MountError),
    /// Raised when configuration is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when a background task does not complete.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl DriverError {
    /// Maps the error onto a protocol status code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => ErrorCode::InvalidArgument,
            Self::VolumeNotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::VolumeAttached { .. } | Self::LocationMismatch { .. } => {
                ErrorCode::FailedPrecondition
            }
            Self::NodeAtCapacity { .. } => ErrorCode::ResourceExhausted,
            Self::OperationPending { .. } | Self::LockTimeout { .. } | Self::InvalidToken { .. } => {
                ErrorCode::Aborted
            }
            Self::Timeout { .. } => ErrorCode::DeadlineExceeded,
            Self::Provider(err) => err.code(),
            Self::Mount(_) | Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Rejects blank identifiers before any lock or provider call.
pub(crate) fn require_field(value: &str, field: &str) -> Result<(), DriverError> {
    if value.trim().is_empty() {
        return Err(DriverError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DriverError::invalid("name"), ErrorCode::InvalidArgument)]
    #[case(
        DriverError::VolumeNotFound { volume_id: String::from("1") },
        ErrorCode::NotFound
    )]
    #[case(
        DriverError::VolumeAttached { volume_id: String::from("1"), node_id: String::from("n") },
        ErrorCode::FailedPrecondition
    )]
    #[case(
        DriverError::NodeAtCapacity { node_id: String::from("n"), attached: 16, limit: 16 },
        ErrorCode::ResourceExhausted
    )]
    #[case(
        DriverError::LockTimeout { key: String::from("volume/1"), waited_ms: 5 },
        ErrorCode::Aborted
    )]
    #[case(
        DriverError::Timeout { action: String::from("attach"), resource: String::from("1") },
        ErrorCode::DeadlineExceeded
    )]
    #[case(
        DriverError::Provider(ProviderError::RateLimited { message: String::from("slow down") }),
        ErrorCode::Unavailable
    )]
    #[case(
        DriverError::Provider(ProviderError::Rejected {
            code: String::from("invalid_input"),
            message: String::from("bad"),
        }),
        ErrorCode::Internal
    )]
    fn errors_map_to_status_codes(#[case] error: DriverError, #[case] expected: ErrorCode) {
        assert_eq!(error.code(), expected);
    }

    #[test]
    fn require_field_rejects_whitespace() {
        let err = require_field("  ", "volume_id").expect_err("blank id");
        assert_eq!(err.to_string(), "invalid argument: volume_id must not be empty");
    }
}
