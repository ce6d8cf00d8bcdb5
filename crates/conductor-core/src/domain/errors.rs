//! Error types and their operational classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the orchestrator treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry within the phase budget.
    Transient,
    /// User code declared the failure non-retryable.
    Permanent,
    /// Task or job implementation could not be resolved.
    NameResolution,
    /// Cooperative cancellation requested.
    Cancelled,
    /// Another worker owns the job now.
    OwnershipLost,
    /// The control plane cannot be reached.
    Infrastructure,
}

/// Failure raised by a task, a callback, or the checks around them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("{message}")]
    Failed { kind: String, message: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("job lock is held by another worker")]
    OwnershipLost,

    #[error("control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    #[error("task `{0}` does not implement run")]
    NotImplemented(String),

    #[error("output key `{0}` was already written")]
    DuplicateKey(String),

    #[error("no implementation registered for task `{task}` of job `{job}`")]
    TaskClassNotFound { job: String, task: String },

    #[error("current action `{0}` is not a declared task")]
    UnknownAction(String),
}

impl TaskError {
    /// Retryable failure with a free-form message.
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            kind: "TaskError".to_string(),
            message: message.into(),
        }
    }

    /// Retryable failure wrapping any error; `type` is its short type name.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let kind = full.rsplit("::").next().unwrap_or(full).to_string();
        TaskError::Failed {
            kind,
            message: err.to_string(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        TaskError::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Failed { .. } | TaskError::DuplicateKey(_) => ErrorKind::Transient,
            TaskError::Fatal(_) => ErrorKind::Permanent,
            TaskError::NotImplemented(_)
            | TaskError::TaskClassNotFound { .. }
            | TaskError::UnknownAction(_) => ErrorKind::NameResolution,
            TaskError::Cancelled => ErrorKind::Cancelled,
            TaskError::OwnershipLost => ErrorKind::OwnershipLost,
            TaskError::ControlPlaneUnreachable(_) => ErrorKind::Infrastructure,
        }
    }

    /// Value of the `type` field in the serialized error.
    pub fn type_name(&self) -> &str {
        match self {
            TaskError::Failed { kind, .. } => kind,
            TaskError::Fatal(_) => "FatalTaskError",
            TaskError::Cancelled => "Cancelled",
            TaskError::OwnershipLost => "OwnershipLost",
            TaskError::ControlPlaneUnreachable(_) => "ControlPlaneUnreachable",
            TaskError::NotImplemented(_) => "NotImplemented",
            TaskError::DuplicateKey(_) => "DuplicateKey",
            TaskError::TaskClassNotFound { .. } => "TaskClassNotFound",
            TaskError::UnknownAction(_) => "UnknownAction",
        }
    }

    pub fn serialize(&self, retry_count: u32) -> SerializedError {
        SerializedError {
            message: self.to_string(),
            kind: self.type_name().to_string(),
            retry_count,
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::from_error(&err)
    }
}

impl From<ControlPlaneError> for TaskError {
    fn from(err: ControlPlaneError) -> Self {
        match err {
            ControlPlaneError::Unreachable { .. } => {
                TaskError::ControlPlaneUnreachable(err.to_string())
            }
            other => TaskError::from_error(&other),
        }
    }
}

/// Last failure of a job as recorded on the instance and sent to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("task `{0}` is not declared")]
    TaskNotFound(String),

    #[error("task `{0}` is declared twice")]
    DuplicateTask(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("no job definition registered for `{0}`")]
    JobClassNotFound(String),

    #[error("parent job `{0}` must be registered before its children")]
    UnknownParent(String),

    #[error("tasks without an implementation: {0:?}")]
    MissingTaskImplementations(Vec<String>),
}

/// Failure of a control-plane call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    /// A critical call exhausted its retries.
    #[error("{operation}: control plane unreachable ({reason})")]
    Unreachable { operation: String, reason: String },

    #[error("{operation}: unexpected status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation}: transport failure: {reason}")]
    Transport { operation: String, reason: String },

    #[error("{operation}: malformed response: {reason}")]
    Decode { operation: String, reason: String },
}

impl ControlPlaneError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlPlaneError::Unreachable { .. })
    }
}

/// Reasons a run is aborted without completing its state machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    #[error("job lock is held by another worker")]
    OwnershipLost,

    /// Development environments surface task failures instead of retrying.
    #[error("`{action}` failed: {source}")]
    Task { action: String, source: TaskError },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactoryError {
    #[error("no job definition registered for `{0}`")]
    JobClassNotFound(String),

    #[error("job `{0}` does not exist on the control plane")]
    JobNotFound(String),

    #[error("control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    #[error(transparent)]
    ControlPlane(ControlPlaneError),
}

impl From<ControlPlaneError> for FactoryError {
    fn from(err: ControlPlaneError) -> Self {
        if err.is_unreachable() {
            FactoryError::ControlPlaneUnreachable(err.to_string())
        } else {
            FactoryError::ControlPlane(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunnerError {
    #[error("job `{0}` is locked by another worker")]
    JobAlreadyLocked(String),

    #[error("job `{0}` does not exist on the control plane")]
    JobNotFound(String),

    #[error("control plane unreachable: {0}")]
    ControlPlaneUnreachable(String),

    /// Raised by the background heartbeat.
    #[error("lost the lock on job `{0}`")]
    LockLost(String),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Run(#[from] RunError),
}

impl RunnerError {
    /// Should the queue redeliver the message?
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RunnerError::ControlPlaneUnreachable(_)
                | RunnerError::Factory(FactoryError::ControlPlaneUnreachable(_))
                | RunnerError::Run(RunError::ControlPlaneUnreachable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::failed(TaskError::failed("boom"), ErrorKind::Transient)]
    #[case::duplicate(TaskError::DuplicateKey("x".into()), ErrorKind::Transient)]
    #[case::fatal(TaskError::fatal("nope"), ErrorKind::Permanent)]
    #[case::not_implemented(TaskError::NotImplemented("a".into()), ErrorKind::NameResolution)]
    #[case::class_not_found(
        TaskError::TaskClassNotFound { job: "j".into(), task: "t".into() },
        ErrorKind::NameResolution
    )]
    #[case::cancelled(TaskError::Cancelled, ErrorKind::Cancelled)]
    #[case::ownership(TaskError::OwnershipLost, ErrorKind::OwnershipLost)]
    #[case::unreachable(
        TaskError::ControlPlaneUnreachable("down".into()),
        ErrorKind::Infrastructure
    )]
    fn classification(#[case] err: TaskError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn serialized_error_uses_type_field() {
        let err = TaskError::fatal("bad input").serialize(2);
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"message": "fatal: bad input", "type": "FatalTaskError", "retry_count": 2})
        );
    }

    #[test]
    fn wrapped_errors_keep_their_type_name() {
        let io = std::io::Error::other("disk full");
        let err = TaskError::from_error(&io);
        assert_eq!(err.type_name(), "Error");
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn unreachable_control_plane_maps_to_infrastructure() {
        let err: TaskError = ControlPlaneError::Unreachable {
            operation: "fetch_job".into(),
            reason: "timeout".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
