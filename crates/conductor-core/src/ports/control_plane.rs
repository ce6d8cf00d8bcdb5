//! ControlPlane port - the remote system of record for job state
//!
//! | operation         | HTTP                              |
//! |-------------------|-----------------------------------|
//! | `fetch_job`       | `GET /jobs/{id}`                  |
//! | `update_job`      | `PUT /jobs/{id}`                  |
//! | `lock`            | `PUT /jobs/{id}/worker`           |
//! | `register_tasks`  | `POST /jobs/{id}/tasks`           |
//! | `update_callback` | `PUT /jobs/{id}/callbacks/{name}` |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{ControlPlaneError, SerializedError};
use crate::domain::state::{CallbackKind, RetryLimit, Status};
use crate::domain::worker::WorkerIdentity;

/// Per-call retry behaviour.
///
/// A critical call that exhausts its retries fails with
/// `ControlPlaneError::Unreachable`; a non-critical one reports the last
/// failed response instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub retries: u32,
    pub retry_wait: Duration,
    pub critical: bool,
}

impl RequestPolicy {
    pub fn new(retries: u32, retry_wait: Duration) -> Self {
        Self {
            retries,
            retry_wait,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Job state as recorded remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub tasks: Vec<TaskAttributes>,
    #[serde(default)]
    pub callbacks: Vec<CallbackAttributes>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default)]
    pub worker: Option<WorkerIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<RetryLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_max_retries: Option<RetryLimit>,
}

impl JobAttributes {
    /// Tasks sorted by their `order` field.
    pub fn tasks_in_order(&self) -> Vec<&TaskAttributes> {
        let mut tasks: Vec<&TaskAttributes> = self.tasks.iter().collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub name: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub exception: Option<SerializedError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackAttributes {
    pub name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub exception: Option<SerializedError>,
}

/// Body of `PUT /jobs/{id}`: job status, data, task updates and budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<RetryLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_max_retries: Option<RetryLimit>,
}

impl JobUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn task(task: TaskUpdate) -> Self {
        Self {
            tasks: vec![task],
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<SerializedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl TaskUpdate {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
            exception: None,
            retries: None,
        }
    }

    pub fn with_exception(mut self, exception: Option<SerializedError>) -> Self {
        self.exception = exception;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Body of `PUT /jobs/{id}/callbacks/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackUpdate {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<SerializedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl CallbackUpdate {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            data: None,
            exception: None,
            retries: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_exception(mut self, exception: Option<SerializedError>) -> Self {
        self.exception = exception;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Entry of `POST /jobs/{id}/tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRegistration {
    pub name: String,
    pub order: u32,
}

/// Result of `PUT /jobs/{id}/worker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResponse {
    Acquired,
    /// 401: another worker holds the lock.
    AlreadyLocked,
    /// 404
    NotFound,
    /// Any other non-success status.
    Rejected(u16),
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// `None` when the job does not exist.
    async fn fetch_job(
        &self,
        job_id: &str,
        policy: RequestPolicy,
    ) -> Result<Option<JobAttributes>, ControlPlaneError>;

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError>;

    /// Acquire or refresh the job lock for `worker`.
    async fn lock(
        &self,
        job_id: &str,
        worker: &WorkerIdentity,
        policy: RequestPolicy,
    ) -> Result<LockResponse, ControlPlaneError>;

    /// Idempotent: an "already registered" answer is a success.
    async fn register_tasks(
        &self,
        job_id: &str,
        tasks: &[TaskRegistration],
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError>;

    async fn update_callback(
        &self,
        job_id: &str,
        callback: CallbackKind,
        update: &CallbackUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError>;

    /// `false` for implementations that make no remote calls at all.
    fn is_enabled(&self) -> bool {
        true
    }
}
