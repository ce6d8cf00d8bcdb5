//! In-memory control plane (development and tests).
//!
//! Applies updates to stored job attributes the way the remote API does and
//! records every call so tests can assert on the exact notification sequence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::ControlPlaneError;
use crate::domain::state::{CallbackKind, Status};
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::{
    CallbackAttributes, CallbackUpdate, ControlPlane, JobAttributes, JobUpdate, LockResponse,
    RequestPolicy, TaskAttributes, TaskRegistration, TaskUpdate,
};

/// A call as received by the in-memory control plane.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchJob {
        job_id: String,
    },
    UpdateJob {
        job_id: String,
        update: JobUpdate,
    },
    Lock {
        job_id: String,
        worker: WorkerIdentity,
    },
    RegisterTasks {
        job_id: String,
        tasks: Vec<TaskRegistration>,
    },
    UpdateCallback {
        job_id: String,
        callback: CallbackKind,
        update: CallbackUpdate,
    },
}

impl Call {
    pub fn job_id(&self) -> &str {
        match self {
            Call::FetchJob { job_id }
            | Call::UpdateJob { job_id, .. }
            | Call::Lock { job_id, .. }
            | Call::RegisterTasks { job_id, .. }
            | Call::UpdateCallback { job_id, .. } => job_id,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Call::FetchJob { .. } => "fetch_job",
            Call::UpdateJob { .. } => "update_job",
            Call::Lock { .. } => "lock",
            Call::RegisterTasks { .. } => "register_tasks",
            Call::UpdateCallback { .. } => "update_callback",
        }
    }
}

#[derive(Default)]
struct InMemoryControlPlaneState {
    jobs: HashMap<String, JobAttributes>,
    calls: Vec<Call>,
    /// Every operation fails.
    unreachable: bool,
    /// Only these operations fail.
    failing: HashSet<&'static str>,
    /// Scripted answers to `lock`, consumed before the real lock logic.
    lock_script: VecDeque<LockResponse>,
}

impl InMemoryControlPlaneState {
    fn failure(&self, operation: &'static str, policy: RequestPolicy) -> Option<ControlPlaneError> {
        if !self.unreachable && !self.failing.contains(operation) {
            return None;
        }
        let reason = "in-memory control plane is unavailable".to_string();
        Some(if policy.critical {
            ControlPlaneError::Unreachable {
                operation: operation.to_string(),
                reason,
            }
        } else {
            ControlPlaneError::Transport {
                operation: operation.to_string(),
                reason,
            }
        })
    }

    fn job_mut(
        &mut self,
        operation: &'static str,
        job_id: &str,
    ) -> Result<&mut JobAttributes, ControlPlaneError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| ControlPlaneError::Status {
                operation: operation.to_string(),
                status: 404,
                body: format!("job {job_id} not found"),
            })
    }
}

fn apply_task_update(attrs: &mut JobAttributes, update: &TaskUpdate) {
    let next_order = attrs.tasks.iter().map(|t| t.order + 1).max().unwrap_or(0);
    let task = match attrs.tasks.iter_mut().position(|t| t.name == update.name) {
        Some(i) => &mut attrs.tasks[i],
        None => {
            attrs.tasks.push(TaskAttributes {
                name: update.name.clone(),
                order: next_order,
                ..TaskAttributes::default()
            });
            let last = attrs.tasks.len() - 1;
            &mut attrs.tasks[last]
        }
    };
    task.status = update.status;
    task.exception = update.exception.clone();
    if let Some(retries) = update.retries {
        task.retries = retries;
    }
}

fn apply_callback_update(attrs: &mut JobAttributes, callback: CallbackKind, update: &CallbackUpdate) {
    let name = callback.name();
    let entry = match attrs.callbacks.iter().position(|c| c.name == name) {
        Some(i) => &mut attrs.callbacks[i],
        None => {
            attrs.callbacks.push(CallbackAttributes {
                name: name.to_string(),
                ..CallbackAttributes::default()
            });
            let last = attrs.callbacks.len() - 1;
            &mut attrs.callbacks[last]
        }
    };
    entry.status = update.status;
    entry.exception = update.exception.clone();
    if let Some(retries) = update.retries {
        entry.retries = retries;
    }
    if let Some(data) = &update.data {
        attrs.data = data.clone();
    }
}

#[derive(Clone, Default)]
pub struct InMemoryControlPlane {
    state: Arc<Mutex<InMemoryControlPlaneState>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh pending job with no recorded tasks.
    pub async fn create_job(&self, job_id: &str) {
        self.insert_job(
            job_id,
            JobAttributes {
                status: Some(Status::Pending),
                ..JobAttributes::default()
            },
        )
        .await;
    }

    pub async fn insert_job(&self, job_id: &str, attributes: JobAttributes) {
        let mut state = self.state.lock().await;
        state.jobs.insert(job_id.to_string(), attributes);
    }

    pub async fn remove_job(&self, job_id: &str) {
        let mut state = self.state.lock().await;
        state.jobs.remove(job_id);
    }

    pub async fn job(&self, job_id: &str) -> Option<JobAttributes> {
        let state = self.state.lock().await;
        state.jobs.get(job_id).cloned()
    }

    pub async fn request_cancel(&self, job_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(attrs) = state.jobs.get_mut(job_id) {
            attrs.cancel = true;
        }
    }

    /// Hand the lock to `worker`, as if another process had taken it.
    pub async fn set_worker(&self, job_id: &str, worker: Option<WorkerIdentity>) {
        let mut state = self.state.lock().await;
        if let Some(attrs) = state.jobs.get_mut(job_id) {
            attrs.worker = worker;
        }
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Make one operation (`"update_job"`, `"lock"`, ...) fail from now on.
    pub async fn fail_operation(&self, operation: &'static str) {
        self.state.lock().await.failing.insert(operation);
    }

    /// Queue an answer for an upcoming `lock` call.
    pub async fn script_lock(&self, response: LockResponse) {
        self.state.lock().await.lock_script.push_back(response);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    pub async fn calls_for(&self, job_id: &str) -> Vec<Call> {
        let state = self.state.lock().await;
        state
            .calls
            .iter()
            .filter(|c| c.job_id() == job_id)
            .cloned()
            .collect()
    }

    /// Job-level statuses sent through `update_job`, in order.
    pub async fn job_statuses(&self, job_id: &str) -> Vec<Status> {
        self.calls_for(job_id)
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateJob { update, .. } => update.status,
                _ => None,
            })
            .collect()
    }

    pub async fn task_updates(&self, job_id: &str) -> Vec<TaskUpdate> {
        self.calls_for(job_id)
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateJob { update, .. } => Some(update.tasks),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub async fn callback_updates(&self, job_id: &str) -> Vec<(CallbackKind, CallbackUpdate)> {
        self.calls_for(job_id)
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateCallback {
                    callback, update, ..
                } => Some((callback, update)),
                _ => None,
            })
            .collect()
    }

    pub async fn lock_count(&self, job_id: &str) -> usize {
        self.calls_for(job_id)
            .await
            .iter()
            .filter(|c| matches!(c, Call::Lock { .. }))
            .count()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn fetch_job(
        &self,
        job_id: &str,
        policy: RequestPolicy,
    ) -> Result<Option<JobAttributes>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::FetchJob {
            job_id: job_id.to_string(),
        });
        if let Some(err) = state.failure("fetch_job", policy) {
            return Err(err);
        }
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::UpdateJob {
            job_id: job_id.to_string(),
            update: update.clone(),
        });
        if let Some(err) = state.failure("update_job", policy) {
            return Err(err);
        }
        let attrs = state.job_mut("update_job", job_id)?;
        if let Some(status) = update.status {
            attrs.status = Some(status);
        }
        if let Some(data) = &update.data {
            attrs.data = data.clone();
        }
        for task in &update.tasks {
            apply_task_update(attrs, task);
        }
        if update.max_retries.is_some() {
            attrs.max_retries = update.max_retries;
        }
        if update.callback_max_retries.is_some() {
            attrs.callback_max_retries = update.callback_max_retries;
        }
        Ok(())
    }

    async fn lock(
        &self,
        job_id: &str,
        worker: &WorkerIdentity,
        policy: RequestPolicy,
    ) -> Result<LockResponse, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::Lock {
            job_id: job_id.to_string(),
            worker: worker.clone(),
        });
        if let Some(err) = state.failure("lock", policy) {
            return Err(err);
        }
        if let Some(response) = state.lock_script.pop_front() {
            return Ok(response);
        }
        let Some(attrs) = state.jobs.get_mut(job_id) else {
            return Ok(LockResponse::NotFound);
        };
        match &attrs.worker {
            Some(holder) if !holder.matches(worker) => Ok(LockResponse::AlreadyLocked),
            _ => {
                attrs.worker = Some(worker.clone());
                Ok(LockResponse::Acquired)
            }
        }
    }

    async fn register_tasks(
        &self,
        job_id: &str,
        tasks: &[TaskRegistration],
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::RegisterTasks {
            job_id: job_id.to_string(),
            tasks: tasks.to_vec(),
        });
        if let Some(err) = state.failure("register_tasks", policy) {
            return Err(err);
        }
        let attrs = state.job_mut("register_tasks", job_id)?;
        if attrs.tasks.is_empty() {
            attrs.tasks = tasks
                .iter()
                .map(|t| TaskAttributes {
                    name: t.name.clone(),
                    order: t.order,
                    ..TaskAttributes::default()
                })
                .collect();
        }
        Ok(())
    }

    async fn update_callback(
        &self,
        job_id: &str,
        callback: CallbackKind,
        update: &CallbackUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(Call::UpdateCallback {
            job_id: job_id.to_string(),
            callback,
            update: update.clone(),
        });
        if let Some(err) = state.failure("update_callback", policy) {
            return Err(err);
        }
        let attrs = state.job_mut("update_callback", job_id)?;
        apply_callback_update(attrs, callback, update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy() -> RequestPolicy {
        RequestPolicy::new(0, Duration::ZERO)
    }

    fn worker(pid: &str) -> WorkerIdentity {
        WorkerIdentity::new("10.0.0.1", "node-a", pid)
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;

        assert_eq!(
            plane.lock("job-1", &worker("1"), policy()).await.unwrap(),
            LockResponse::Acquired
        );
        assert_eq!(
            plane.lock("job-1", &worker("1"), policy()).await.unwrap(),
            LockResponse::Acquired
        );
        assert_eq!(
            plane.lock("job-1", &worker("2"), policy()).await.unwrap(),
            LockResponse::AlreadyLocked
        );
        assert_eq!(
            plane.lock("missing", &worker("1"), policy()).await.unwrap(),
            LockResponse::NotFound
        );
    }

    #[tokio::test]
    async fn task_updates_are_merged_by_name() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;
        plane
            .register_tasks(
                "job-1",
                &[
                    TaskRegistration { name: "a".into(), order: 0 },
                    TaskRegistration { name: "b".into(), order: 1 },
                ],
                policy(),
            )
            .await
            .unwrap();

        plane
            .update_job(
                "job-1",
                &JobUpdate::task(TaskUpdate::new("b", Status::Pending).with_retries(1)),
                policy(),
            )
            .await
            .unwrap();

        let attrs = plane.job("job-1").await.unwrap();
        assert_eq!(attrs.tasks.len(), 2);
        assert_eq!(attrs.tasks[1].retries, 1);
        assert_eq!(plane.task_updates("job-1").await.len(), 1);
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;
        let first = [TaskRegistration { name: "a".into(), order: 0 }];
        let second = [TaskRegistration { name: "z".into(), order: 0 }];

        plane.register_tasks("job-1", &first, policy()).await.unwrap();
        plane.register_tasks("job-1", &second, policy()).await.unwrap();

        let attrs = plane.job("job-1").await.unwrap();
        assert_eq!(attrs.tasks.len(), 1);
        assert_eq!(attrs.tasks[0].name, "a");
    }

    #[tokio::test]
    async fn failures_respect_criticality() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;
        plane.fail_operation("update_job").await;

        let update = JobUpdate::status(Status::Running);
        let soft = plane.update_job("job-1", &update, policy()).await.unwrap_err();
        let hard = plane
            .update_job("job-1", &update, policy().critical())
            .await
            .unwrap_err();

        assert!(!soft.is_unreachable());
        assert!(hard.is_unreachable());
        assert!(plane.fetch_job("job-1", policy()).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_lock_answers_come_first() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;
        plane.script_lock(LockResponse::AlreadyLocked).await;

        assert_eq!(
            plane.lock("job-1", &worker("1"), policy()).await.unwrap(),
            LockResponse::AlreadyLocked
        );
        assert_eq!(
            plane.lock("job-1", &worker("1"), policy()).await.unwrap(),
            LockResponse::Acquired
        );
        assert_eq!(plane.lock_count("job-1").await, 2);
    }
}
