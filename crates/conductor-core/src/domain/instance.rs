//! Mutable state of one job run.

use super::data::JobDataStore;
use super::envelope::Tags;
use super::errors::{SerializedError, TaskError};
use super::state::{Action, RetryLimit, Status};
use super::worker::WorkerIdentity;
use crate::ports::cancellation::CancellationCheck;
use crate::typed::task::TaskContext;

/// A job as reconstructed for one run.
///
/// The `with_*` methods are for construction. During a run only the
/// orchestrator mutates the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInstance {
    id: String,
    name: String,
    tags: Tags,
    status: Status,
    current_action: Option<Action>,
    retries: u32,
    data: JobDataStore,
    error: Option<SerializedError>,
    worker: WorkerIdentity,
}

impl JobInstance {
    pub fn new(id: impl Into<String>, name: impl Into<String>, worker: WorkerIdentity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: Tags::new(),
            status: Status::Pending,
            current_action: None,
            retries: 0,
            data: JobDataStore::new(),
            error: None,
            worker,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_current_action(mut self, action: Option<Action>) -> Self {
        self.set_current_action(action);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_data(mut self, mut data: JobDataStore) -> Self {
        data.set_owner(self.current_action.as_ref().map(|a| a.name().to_string()));
        self.data = data;
        self
    }

    pub fn with_error(mut self, error: Option<SerializedError>) -> Self {
        self.error = error;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn current_action(&self) -> Option<&Action> {
        self.current_action.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn data(&self) -> &JobDataStore {
        &self.data
    }

    pub fn error(&self) -> Option<&SerializedError> {
        self.error.as_ref()
    }

    pub fn worker(&self) -> &WorkerIdentity {
        &self.worker
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Also makes `action` the owner of subsequent data-store writes.
    pub(crate) fn set_current_action(&mut self, action: Option<Action>) {
        self.data
            .set_owner(action.as_ref().map(|a| a.name().to_string()));
        self.current_action = action;
    }

    pub(crate) fn reset_retries(&mut self) {
        self.retries = 0;
    }

    pub(crate) fn increment_retries(&mut self) -> u32 {
        self.retries = self.retries.saturating_add(1);
        self.retries
    }

    pub(crate) fn record_error(&mut self, err: &TaskError) {
        self.error = Some(err.serialize(self.retries));
    }

    /// Context for an attempt of the current action.
    pub(crate) fn context<'a>(
        &'a mut self,
        cancellation: &'a dyn CancellationCheck,
        max_retries: RetryLimit,
        may_retry: bool,
    ) -> TaskContext<'a> {
        let action = self.current_action.as_ref().map(Action::name).unwrap_or("");
        TaskContext::new(&self.id, action, &self.tags, &mut self.data, cancellation)
            .with_retries(self.retries, max_retries, may_retry)
            .with_status(self.status, self.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::CallbackKind;
    use serde_json::json;

    fn worker() -> WorkerIdentity {
        WorkerIdentity::new("10.0.0.1", "node-a", "42-ThreadId(1)")
    }

    #[test]
    fn new_instance_is_pending_without_action() {
        let job = JobInstance::new("job-1", "Sample", worker());
        assert_eq!(job.status(), Status::Pending);
        assert!(job.current_action().is_none());
        assert_eq!(job.retries(), 0);
        assert!(job.data().is_empty());
    }

    #[test]
    fn data_writes_follow_the_current_action() {
        let mut job = JobInstance::new("job-1", "Sample", worker())
            .with_current_action(Some(Action::Task("a".into())));
        job.data.set("x", 1).unwrap();

        job.set_current_action(Some(Action::Callback(CallbackKind::OnSuccess)));
        job.data.set("y", 2).unwrap();

        assert_eq!(job.data().keys_of("a"), ["x".to_string()]);
        assert_eq!(job.data().keys_of("on_success"), ["y".to_string()]);
        assert_eq!(job.data().get("y"), Some(&json!(2)));
    }

    #[test]
    fn recorded_error_carries_the_retry_count() {
        let mut job = JobInstance::new("job-1", "Sample", worker()).with_retries(2);
        job.record_error(&TaskError::failed("boom"));

        let err = job.error().unwrap();
        assert_eq!(err.retry_count, 2);
        assert_eq!(err.message, "boom");
        assert_eq!(err.kind, "TaskError");
    }

    #[test]
    fn retries_increment_and_reset() {
        let mut job = JobInstance::new("job-1", "Sample", worker());
        assert_eq!(job.increment_retries(), 1);
        assert_eq!(job.increment_retries(), 2);
        job.reset_retries();
        assert_eq!(job.retries(), 0);
    }
}
