//! Cancellation port: how a running job learns it should stop.
//!
//! Cancellation is cooperative and polled. Tasks call
//! `TaskContext::assert_not_cancelled` at safe points and the orchestrator
//! checks once before each task.

use async_trait::async_trait;

use crate::domain::errors::TaskError;

#[async_trait]
pub trait CancellationCheck: Send + Sync {
    /// `Ok(true)` when cancellation was requested.
    ///
    /// Errors are reserved for conditions that end the run outright:
    /// `TaskError::OwnershipLost` and `TaskError::ControlPlaneUnreachable`.
    async fn is_cancelled(&self) -> Result<bool, TaskError>;
}

/// Fails with `TaskError::Cancelled` if cancellation was requested.
pub async fn assert_not_cancelled(check: &dyn CancellationCheck) -> Result<(), TaskError> {
    if check.is_cancelled().await? {
        Err(TaskError::Cancelled)
    } else {
        Ok(())
    }
}

/// Check that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

#[async_trait]
impl CancellationCheck for NeverCancelled {
    async fn is_cancelled(&self) -> Result<bool, TaskError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(Result<bool, TaskError>);

    #[async_trait]
    impl CancellationCheck for Always {
        async fn is_cancelled(&self) -> Result<bool, TaskError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn assert_passes_when_not_cancelled() {
        assert!(assert_not_cancelled(&NeverCancelled).await.is_ok());
    }

    #[tokio::test]
    async fn assert_fails_with_cancelled() {
        let err = assert_not_cancelled(&Always(Ok(true))).await.unwrap_err();
        assert_eq!(err, TaskError::Cancelled);
    }

    #[tokio::test]
    async fn check_errors_pass_through() {
        let err = assert_not_cancelled(&Always(Err(TaskError::OwnershipLost)))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::OwnershipLost);
    }
}
