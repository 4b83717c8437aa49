//! Cloud block-storage abstraction consumed by the controller.
//!
//! Provider calls return [`OperationHandle`]s for work that completes
//! asynchronously on the remote side; the controller polls them through
//! [`CloudStorageClient::get_operation`].

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::error::ErrorCode;

/// Parameters sent to the provider when creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeSpec {
    /// Volume name, unique per project.
    pub name: String,
    /// Size in whole gigabytes.
    pub size_gb: u32,
    /// Location the volume is bound to.
    pub location: String,
}

/// Volume as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderVolume {
    /// Provider identifier.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Size in whole gigabytes.
    pub size_gb: u32,
    /// Location label.
    pub location: String,
    /// Server the volume is attached to, if any.
    pub server_id: Option<String>,
    /// Device path the volume appears under once attached.
    pub linux_device: String,
}

/// Opaque token for an in-flight provider job.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct OperationHandle {
    /// Provider identifier of the job.
    pub id: String,
}

impl OperationHandle {
    /// Wraps a provider job identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Progress of a provider job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// The job has not finished yet.
    Running,
    /// The job completed successfully.
    Succeeded,
    /// The job finished with an error.
    Failed {
        /// Error reported by the provider.
        message: String,
    },
}

/// Result of a create call: the new volume and the job creating it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeCreation {
    /// Volume record returned immediately by the provider.
    pub volume: ProviderVolume,
    /// Job to await before the volume is usable, if any.
    pub operation: Option<OperationHandle>,
}

/// Errors raised by provider clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the provider throttles requests.
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when a resource is locked by another running job.
    #[error("resource locked: {message}")]
    Locked {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised for transport failures and server-side errors.
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
    /// Raised when the provider does not know the resource.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource type (for example `volume`).
        resource: String,
        /// Resource identifier.
        id: String,
    },
    /// Raised when an awaited job finishes with an error.
    #[error("operation {operation_id} failed: {message}")]
    OperationFailed {
        /// Job identifier.
        operation_id: String,
        /// Error reported by the provider.
        message: String,
    },
    /// Raised when the provider rejects a request.
    #[error("provider rejected request ({code}): {message}")]
    Rejected {
        /// Provider error code.
        code: String,
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when a response cannot be decoded.
    #[error("invalid provider response: {message}")]
    InvalidResponse {
        /// Decoder error.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` when repeating the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Locked { .. } | Self::Unavailable { .. }
        )
    }

    /// Maps the error onto a protocol status code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited { .. } | Self::Locked { .. } | Self::Unavailable { .. } => {
                ErrorCode::Unavailable
            }
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::OperationFailed { .. } | Self::Rejected { .. } | Self::InvalidResponse { .. } => {
                ErrorCode::Internal
            }
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Remote block-storage API used by the controller.
pub trait CloudStorageClient: Send + Sync {
    /// Starts creating a volume.
    fn create_volume<'a>(&'a self, spec: &'a CreateVolumeSpec)
    -> ProviderFuture<'a, VolumeCreation>;

    /// Deletes a volume; returns a job handle when deletion is asynchronous.
    fn delete_volume<'a>(&'a self, volume_id: &'a str)
    -> ProviderFuture<'a, Option<OperationHandle>>;

    /// Starts attaching a volume to a server.
    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        server_id: &'a str,
    ) -> ProviderFuture<'a, OperationHandle>;

    /// Starts detaching a volume from whichever server holds it.
    fn detach_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, OperationHandle>;

    /// Reports the progress of a job.
    fn get_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus>;

    /// Lists every volume visible to the credentials.
    fn list_volumes(&self) -> ProviderFuture<'_, Vec<ProviderVolume>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(
            ProviderError::RateLimited {
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            ProviderError::Locked {
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::NotFound {
                resource: String::from("volume"),
                id: String::from("1"),
            }
            .is_transient()
        );
    }

    #[test]
    fn operation_failure_renders_job_id() {
        let err = ProviderError::OperationFailed {
            operation_id: String::from("42"),
            message: String::from("server is locked"),
        };
        assert_eq!(err.to_string(), "operation 42 failed: server is locked");
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
