//! Heartbeat - keeps the job lock alive while a run is in progress
//!
//! The first `beat()` acquires the lock and must succeed before the job is
//! built. `spawn()` then renews it every interval on a background task until
//! the handle is stopped or dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::config::RuntimeConfig;
use crate::domain::errors::RunnerError;
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::{ControlPlane, LockResponse, RequestPolicy};

#[derive(Clone)]
pub struct Heartbeat {
    control_plane: Arc<dyn ControlPlane>,
    job_id: String,
    worker: WorkerIdentity,
    interval: Duration,
    policy: RequestPolicy,
}

impl Heartbeat {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        job_id: impl Into<String>,
        worker: WorkerIdentity,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            control_plane,
            job_id: job_id.into(),
            worker,
            interval: config.heartbeat_interval(),
            policy: config.default_request.policy(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Acquire or renew the lock once, as a critical call.
    pub async fn beat(&self) -> Result<(), RunnerError> {
        match self.lock(self.policy.critical()).await {
            Ok(LockResponse::Acquired) => Ok(()),
            Ok(LockResponse::AlreadyLocked) => Err(RunnerError::JobAlreadyLocked(self.job_id.clone())),
            Ok(LockResponse::NotFound) => Err(RunnerError::JobNotFound(self.job_id.clone())),
            Ok(LockResponse::Rejected(status)) => Err(RunnerError::ControlPlaneUnreachable(
                format!("lock rejected with status {status}"),
            )),
            Err(err) => Err(RunnerError::ControlPlaneUnreachable(err.to_string())),
        }
    }

    async fn lock(
        &self,
        policy: RequestPolicy,
    ) -> Result<LockResponse, crate::domain::errors::ControlPlaneError> {
        self.control_plane
            .lock(&self.job_id, &self.worker, policy)
            .await
    }

    /// Renew the lock in the background.
    ///
    /// Losing the lock or the job cancels the handle's lost signal and, when
    /// a channel is given, reports the error on it. Other failures are logged
    /// and retried on the next tick.
    pub fn spawn(self, errors: Option<UnboundedSender<RunnerError>>) -> HeartbeatHandle {
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let join = {
            let stop = stop.clone();
            let lost = lost.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately and the lock was just taken.
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let failure = match self.lock(self.policy).await {
                        Ok(LockResponse::Acquired) => {
                            debug!(job_id = %self.job_id, "heartbeat");
                            continue;
                        }
                        Ok(LockResponse::AlreadyLocked) => RunnerError::LockLost(self.job_id.clone()),
                        Ok(LockResponse::NotFound) => RunnerError::JobNotFound(self.job_id.clone()),
                        Ok(LockResponse::Rejected(status)) => {
                            warn!(job_id = %self.job_id, status, "heartbeat rejected");
                            continue;
                        }
                        Err(err) => {
                            warn!(job_id = %self.job_id, error = %err, "heartbeat failed");
                            continue;
                        }
                    };

                    error!(job_id = %self.job_id, error = %failure, "heartbeat stopped");
                    lost.cancel();
                    if let Some(errors) = &errors {
                        // The receiver may already be gone.
                        let _ = errors.send(failure);
                    }
                    break;
                }
            })
        };

        HeartbeatHandle {
            stop,
            lost,
            join: Some(join),
        }
    }
}

/// Stops the background heartbeat when dropped.
pub struct HeartbeatHandle {
    stop: CancellationToken,
    lost: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Cancelled once the lock or the job is lost.
    pub fn lost_signal(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(join) = self.join.take()
            && let Err(err) = join.await
        {
            warn!(error = %err, "heartbeat task ended abnormally");
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
