//! Task - user code executed by the orchestrator
//!
//! # Two hooks per job type
//! - **Task**: one step of the job. A fresh instance is built for every
//!   attempt, so fields never leak state between retries.
//! - **JobCallbacks**: `on_success` / `on_error` / `on_cancel`, run once the job
//!   reaches the matching terminal status.
//!
//! Neither returns a value. Results are written into the job's data store
//! through [`TaskContext::set`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::data::JobDataStore;
use crate::domain::envelope::Tags;
use crate::domain::errors::{SerializedError, TaskError};
use crate::domain::state::{CallbackKind, RetryLimit, Status};
use crate::ports::cancellation::{CancellationCheck, assert_not_cancelled};

/// One step of a job.
///
/// ```ignore
/// #[derive(Default)]
/// struct Resize;
///
/// #[async_trait]
/// impl Task for Resize {
///     async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
///         let src = ctx.get("source").cloned().unwrap_or_default();
///         ctx.assert_not_cancelled().await?;
///         ctx.set("thumbnail", src)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send {
    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Err(TaskError::NotImplemented(ctx.action().to_string()))
    }

    /// Called after `run` fails, before the retry decision.
    async fn on_error(&mut self, _ctx: &mut TaskContext<'_>, _error: &TaskError) {}
}

/// Builds a fresh task for every attempt.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Terminal callbacks of a job type. All default to no-ops.
#[async_trait]
pub trait JobCallbacks: Send + Sync {
    async fn on_success(&self, _ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    async fn on_error(&self, _ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    async fn on_cancel(&self, _ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }
}

impl dyn JobCallbacks {
    pub async fn invoke(
        &self,
        kind: CallbackKind,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        match kind {
            CallbackKind::OnSuccess => self.on_success(ctx).await,
            CallbackKind::OnError => self.on_error(ctx).await,
            CallbackKind::OnCancel => self.on_cancel(ctx).await,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallbacks;

impl JobCallbacks for NoCallbacks {}

/// Everything a task or callback can see of its job.
pub struct TaskContext<'a> {
    job_id: &'a str,
    action: &'a str,
    tags: &'a Tags,
    status: Status,
    error: Option<&'a SerializedError>,
    data: &'a mut JobDataStore,
    cancellation: &'a dyn CancellationCheck,
    retries: u32,
    max_retries: RetryLimit,
    may_retry: bool,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        job_id: &'a str,
        action: &'a str,
        tags: &'a Tags,
        data: &'a mut JobDataStore,
        cancellation: &'a dyn CancellationCheck,
    ) -> Self {
        Self {
            job_id,
            action,
            tags,
            status: Status::Running,
            error: None,
            data,
            cancellation,
            retries: 0,
            max_retries: RetryLimit::default(),
            may_retry: false,
        }
    }

    pub fn with_retries(mut self, retries: u32, max_retries: RetryLimit, may_retry: bool) -> Self {
        self.retries = retries;
        self.max_retries = max_retries;
        self.may_retry = may_retry;
        self
    }

    pub fn with_status(mut self, status: Status, error: Option<&'a SerializedError>) -> Self {
        self.status = status;
        self.error = error;
        self
    }

    pub fn job_id(&self) -> &str {
        self.job_id
    }

    /// Name of the task or callback being executed.
    pub fn action(&self) -> &str {
        self.action
    }

    pub fn tags(&self) -> &Tags {
        self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }

    /// Job status as seen by callbacks.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Last recorded failure of the job, if any.
    pub fn error(&self) -> Option<&SerializedError> {
        self.error
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> RetryLimit {
        self.max_retries
    }

    /// Would a transient failure of this attempt be retried?
    pub fn may_retry(&self) -> bool {
        self.may_retry
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), TaskError> {
        self.data.set(key, value)
    }

    pub fn data(&self) -> &JobDataStore {
        self.data
    }

    pub async fn assert_not_cancelled(&self) -> Result<(), TaskError> {
        assert_not_cancelled(self.cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::cancellation::NeverCancelled;
    use serde_json::json;

    struct Unimplemented;

    impl Task for Unimplemented {}

    #[tokio::test]
    async fn default_run_is_not_implemented() {
        let tags = Tags::new();
        let mut data = JobDataStore::new();
        let mut ctx = TaskContext::new("job-1", "resize", &tags, &mut data, &NeverCancelled);

        let err = Unimplemented.run(&mut ctx).await.unwrap_err();
        assert_eq!(err, TaskError::NotImplemented("resize".into()));
    }

    #[tokio::test]
    async fn context_writes_go_to_the_store() {
        let tags = Tags::new();
        let mut data = JobDataStore::new();
        {
            let mut ctx = TaskContext::new("job-1", "a", &tags, &mut data, &NeverCancelled);
            ctx.set("x", 1).unwrap();
            assert_eq!(ctx.get("x"), Some(&json!(1)));
            assert!(matches!(ctx.set("x", 2), Err(TaskError::DuplicateKey(_))));
        }
        assert_eq!(data.get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn default_callbacks_succeed() {
        let tags = Tags::new();
        let mut data = JobDataStore::new();
        let mut ctx = TaskContext::new("job-1", "on_success", &tags, &mut data, &NeverCancelled);
        let callbacks: Arc<dyn JobCallbacks> = Arc::new(NoCallbacks);

        for kind in [CallbackKind::OnSuccess, CallbackKind::OnError, CallbackKind::OnCancel] {
            assert!(callbacks.invoke(kind, &mut ctx).await.is_ok());
        }
    }
}
