//! Control plane that makes no calls.
//!
//! Selected for mock job types and when requests are disabled in development
//! and test environments. Every job looks fresh, unlocked and not cancelled.

use async_trait::async_trait;
use tracing::trace;

use crate::domain::errors::ControlPlaneError;
use crate::domain::state::CallbackKind;
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::{
    CallbackUpdate, ControlPlane, JobAttributes, JobUpdate, LockResponse, RequestPolicy,
    TaskRegistration,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledControlPlane;

#[async_trait]
impl ControlPlane for DisabledControlPlane {
    async fn fetch_job(
        &self,
        job_id: &str,
        _policy: RequestPolicy,
    ) -> Result<Option<JobAttributes>, ControlPlaneError> {
        trace!(job_id, "requests disabled; skipping fetch_job");
        Ok(Some(JobAttributes::default()))
    }

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        _policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        trace!(job_id, status = ?update.status, "requests disabled; skipping update_job");
        Ok(())
    }

    async fn lock(
        &self,
        _job_id: &str,
        _worker: &WorkerIdentity,
        _policy: RequestPolicy,
    ) -> Result<LockResponse, ControlPlaneError> {
        Ok(LockResponse::Acquired)
    }

    async fn register_tasks(
        &self,
        _job_id: &str,
        _tasks: &[TaskRegistration],
        _policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn update_callback(
        &self,
        job_id: &str,
        callback: CallbackKind,
        update: &CallbackUpdate,
        _policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        trace!(job_id, %callback, status = %update.status, "requests disabled; skipping update_callback");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
