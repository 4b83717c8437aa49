//! Polling of provider operation handles.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::error::DriverError;
use crate::provider::{CloudStorageClient, OperationHandle, OperationStatus, ProviderError};
use crate::retry::{RetryPolicy, retry_transient};

/// Waits for provider jobs with a fixed interval and a total deadline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationWaiter {
    poll_interval: Duration,
    wait_timeout: Duration,
    retry: RetryPolicy,
}

impl OperationWaiter {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(poll_interval: Duration, wait_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            poll_interval,
            wait_timeout,
            retry,
        }
    }

    /// Retry policy applied to status polls.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Blocks until `handle` completes.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Timeout`] when the deadline passes,
    /// [`ProviderError::OperationFailed`] when the job reports an error, and
    /// any polling error that survives the retry policy.
    pub async fn await_completion<C>(
        &self,
        client: &C,
        handle: &OperationHandle,
        action: &str,
        resource: &str,
    ) -> Result<(), DriverError>
    where
        C: CloudStorageClient + ?Sized,
    {
        // A bound past the clock's range waits without a deadline.
        let deadline = Instant::now().checked_add(self.wait_timeout);
        while deadline.is_none_or(|limit| Instant::now() <= limit) {
            let status = retry_transient(&self.retry, "get_operation", || {
                client.get_operation(handle)
            })
            .await?;

            match status {
                OperationStatus::Succeeded => {
                    debug!(operation = %handle.id, action, resource, "operation completed");
                    return Ok(());
                }
                OperationStatus::Failed { message } => {
                    return Err(ProviderError::OperationFailed {
                        operation_id: handle.id.clone(),
                        message,
                    }
                    .into());
                }
                OperationStatus::Running => sleep(self.poll_interval).await,
            }
        }

        Err(DriverError::Timeout {
            action: action.to_owned(),
            resource: resource.to_owned(),
        })
    }
}
