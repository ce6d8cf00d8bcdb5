//! Cancellation check backed by the control plane.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::errors::TaskError;
use crate::domain::worker::WorkerIdentity;
use crate::ports::cancellation::CancellationCheck;
use crate::ports::control_plane::{ControlPlane, RequestPolicy};

/// Fetches the job on every check.
///
/// Ownership is lost when the heartbeat has cancelled `lock_lost`, or when the
/// control plane names another worker as the lock holder.
pub struct RemoteCancellation {
    control_plane: Arc<dyn ControlPlane>,
    job_id: String,
    worker: WorkerIdentity,
    policy: RequestPolicy,
    lock_lost: Option<CancellationToken>,
}

impl RemoteCancellation {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        job_id: impl Into<String>,
        worker: WorkerIdentity,
        policy: RequestPolicy,
    ) -> Self {
        Self {
            control_plane,
            job_id: job_id.into(),
            worker,
            policy: policy.critical(),
            lock_lost: None,
        }
    }

    pub fn with_lock_signal(mut self, lock_lost: CancellationToken) -> Self {
        self.lock_lost = Some(lock_lost);
        self
    }
}

#[async_trait]
impl CancellationCheck for RemoteCancellation {
    async fn is_cancelled(&self) -> Result<bool, TaskError> {
        if self.lock_lost.as_ref().is_some_and(CancellationToken::is_cancelled) {
            error!(job_id = %self.job_id, "heartbeat reported the lock as lost");
            return Err(TaskError::OwnershipLost);
        }

        let Some(attrs) = self.control_plane.fetch_job(&self.job_id, self.policy).await? else {
            warn!(job_id = %self.job_id, "job disappeared from the control plane; treating as cancelled");
            return Ok(true);
        };

        if let Some(holder) = &attrs.worker
            && !holder.matches(&self.worker)
        {
            error!(job_id = %self.job_id, holder = ?holder, "job is locked by another worker");
            return Err(TaskError::OwnershipLost);
        }
        if attrs.cancel {
            debug!(job_id = %self.job_id, "cancellation requested");
        }
        Ok(attrs.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::inmem_control_plane::InMemoryControlPlane;
    use std::time::Duration;

    fn me() -> WorkerIdentity {
        WorkerIdentity::new("10.0.0.1", "node-a", "1")
    }

    async fn check_for(plane: &InMemoryControlPlane) -> RemoteCancellation {
        plane.create_job("job-1").await;
        RemoteCancellation::new(
            Arc::new(plane.clone()),
            "job-1",
            me(),
            RequestPolicy::new(0, Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn reports_remote_cancel_flag() {
        let plane = InMemoryControlPlane::new();
        let check = check_for(&plane).await;
        assert!(!check.is_cancelled().await.unwrap());

        plane.request_cancel("job-1").await;
        assert!(check.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn another_lock_holder_means_ownership_lost() {
        let plane = InMemoryControlPlane::new();
        let check = check_for(&plane).await;
        plane
            .set_worker("job-1", Some(WorkerIdentity::new("10.0.0.2", "node-b", "7")))
            .await;

        assert_eq!(check.is_cancelled().await.unwrap_err(), TaskError::OwnershipLost);
    }

    #[tokio::test]
    async fn heartbeat_token_short_circuits() {
        let plane = InMemoryControlPlane::new();
        let token = CancellationToken::new();
        let check = check_for(&plane).await.with_lock_signal(token.clone());

        token.cancel();
        assert_eq!(check.is_cancelled().await.unwrap_err(), TaskError::OwnershipLost);
        assert!(plane.calls().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_control_plane_is_infrastructure() {
        let plane = InMemoryControlPlane::new();
        let check = check_for(&plane).await;
        plane.set_unreachable(true).await;

        let err = check.is_cancelled().await.unwrap_err();
        assert!(matches!(err, TaskError::ControlPlaneUnreachable(_)));
    }
}
