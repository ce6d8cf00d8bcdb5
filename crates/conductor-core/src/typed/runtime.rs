//! TaskRuntime - one attempt of one task

use tracing::{Instrument, error, info, info_span};

use super::task::{Task, TaskContext};
use crate::domain::data::JobDataStore;
use crate::domain::errors::TaskError;
use crate::domain::ids::AttemptId;

/// Pairs a freshly built task with the context of its attempt.
///
/// A retry never reuses a runtime: the orchestrator builds a new one from the
/// task factory, with the incremented retry count.
pub struct TaskRuntime<'a> {
    name: String,
    attempt: AttemptId,
    task: Box<dyn Task>,
    ctx: TaskContext<'a>,
}

impl<'a> TaskRuntime<'a> {
    pub fn new(name: impl Into<String>, task: Box<dyn Task>, ctx: TaskContext<'a>) -> Self {
        Self {
            name: name.into(),
            attempt: AttemptId::generate(),
            task,
            ctx,
        }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub async fn perform(&mut self) -> Result<&JobDataStore, TaskError> {
        let span = info_span!("task", task = %self.name, attempt = %self.attempt);
        info!(
            parent: &span,
            retries = self.ctx.retries(),
            max_retries = %self.ctx.max_retries(),
            "starting task"
        );
        self.task.run(&mut self.ctx).instrument(span).await?;
        Ok(self.ctx.data())
    }

    pub async fn on_error(&mut self, err: &TaskError) {
        let span = info_span!("task", task = %self.name, attempt = %self.attempt);
        error!(parent: &span, error = %err, kind = ?err.kind(), "task failed");
        self.task.on_error(&mut self.ctx, err).instrument(span).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::Tags;
    use crate::ports::cancellation::NeverCancelled;
    use async_trait::async_trait;
    use serde_json::json;

    struct Writes;

    #[async_trait]
    impl Task for Writes {
        async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
            ctx.set("done", true)
        }
    }

    struct Flaky;

    #[async_trait]
    impl Task for Flaky {
        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
            Err(TaskError::failed("flaky"))
        }

        async fn on_error(&mut self, ctx: &mut TaskContext<'_>, error: &TaskError) {
            let _ = ctx.set("last_error", error.to_string());
        }
    }

    #[tokio::test]
    async fn perform_returns_the_shared_store() {
        let tags = Tags::new();
        let mut data = JobDataStore::new();
        let ctx = TaskContext::new("job-1", "writes", &tags, &mut data, &NeverCancelled);
        let mut runtime = TaskRuntime::new("writes", Box::new(Writes), ctx);

        let store = runtime.perform().await.unwrap();
        assert_eq!(store.get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn on_error_reaches_the_task_hook() {
        let tags = Tags::new();
        let mut data = JobDataStore::new();
        let ctx = TaskContext::new("job-1", "flaky", &tags, &mut data, &NeverCancelled);
        let mut runtime = TaskRuntime::new("flaky", Box::new(Flaky), ctx);

        let err = runtime.perform().await.unwrap_err();
        runtime.on_error(&err).await;
        drop(runtime);

        assert_eq!(data.get("last_error"), Some(&json!("flaky")));
    }
}
