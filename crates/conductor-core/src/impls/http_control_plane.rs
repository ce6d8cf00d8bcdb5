//! HTTP control plane backed by `reqwest`.
//!
//! Server errors (5xx) and transport failures are retried up to
//! `RequestPolicy::retries` times with a fixed `retry_wait`. Client errors are
//! returned immediately.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::domain::errors::ControlPlaneError;
use crate::domain::state::CallbackKind;
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::{
    CallbackUpdate, ControlPlane, JobAttributes, JobUpdate, LockResponse, RequestPolicy,
    TaskRegistration,
};

/// Response of a call that made it to the server.
struct Reply {
    status: StatusCode,
    body: String,
}

impl Reply {
    fn into_status_error(self, operation: &str) -> ControlPlaneError {
        ControlPlaneError::Status {
            operation: operation.to_string(),
            status: self.status.as_u16(),
            body: self.body,
        }
    }

    fn decode<T: DeserializeOwned>(&self, operation: &str) -> Result<T, ControlPlaneError> {
        serde_json::from_str(&self.body).map_err(|e| ControlPlaneError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: Url,
}

impl fmt::Debug for HttpControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpControlPlane")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl HttpControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let invalid = |reason: String| ControlPlaneError::Transport {
            operation: "configure".to_string(),
            reason,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(format!("{base_url} cannot be a base URL")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("conductor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| invalid(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// `segments` are percent-encoded and appended to the base path.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&B>,
        policy: RequestPolicy,
    ) -> Result<Reply, ControlPlaneError> {
        let attempts = policy.retries.saturating_add(1);
        let mut last_failure = String::new();
        let mut last_reply: Option<Reply> = None;

        for attempt in 1..=attempts {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!(operation, %url, attempt, "control plane request");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if !status.is_server_error() {
                        return Ok(Reply { status, body });
                    }
                    warn!(operation, %status, attempt, attempts, "server error from control plane");
                    last_failure = format!("status {status}");
                    last_reply = Some(Reply { status, body });
                }
                Err(e) => {
                    warn!(operation, error = %e, attempt, attempts, "network error reaching control plane");
                    last_failure = e.to_string();
                    last_reply = None;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(policy.retry_wait).await;
            }
        }

        if policy.critical {
            error!(operation, attempts, reason = %last_failure, "control plane unreachable");
            return Err(ControlPlaneError::Unreachable {
                operation: operation.to_string(),
                reason: last_failure,
            });
        }
        match last_reply {
            Some(reply) => Ok(reply),
            None => Err(ControlPlaneError::Transport {
                operation: operation.to_string(),
                reason: last_failure,
            }),
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn fetch_job(
        &self,
        job_id: &str,
        policy: RequestPolicy,
    ) -> Result<Option<JobAttributes>, ControlPlaneError> {
        const OP: &str = "fetch_job";
        let url = self.url(&["jobs", job_id]);
        let reply = self.send::<()>(OP, Method::GET, url, None, policy).await?;
        match reply.status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => reply.decode(OP).map(Some),
            _ => Err(reply.into_status_error(OP)),
        }
    }

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        const OP: &str = "update_job";
        let url = self.url(&["jobs", job_id]);
        let reply = self.send(OP, Method::PUT, url, Some(update), policy).await?;
        if reply.status.is_success() {
            Ok(())
        } else {
            Err(reply.into_status_error(OP))
        }
    }

    async fn lock(
        &self,
        job_id: &str,
        worker: &WorkerIdentity,
        policy: RequestPolicy,
    ) -> Result<LockResponse, ControlPlaneError> {
        const OP: &str = "lock";
        let url = self.url(&["jobs", job_id, "worker"]);
        let reply = self.send(OP, Method::PUT, url, Some(worker), policy).await?;
        Ok(match reply.status {
            StatusCode::UNAUTHORIZED => LockResponse::AlreadyLocked,
            StatusCode::NOT_FOUND => LockResponse::NotFound,
            s if s.is_success() => LockResponse::Acquired,
            s => LockResponse::Rejected(s.as_u16()),
        })
    }

    async fn register_tasks(
        &self,
        job_id: &str,
        tasks: &[TaskRegistration],
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        const OP: &str = "register_tasks";
        let url = self.url(&["jobs", job_id, "tasks"]);
        let body = json!({ "tasks": tasks });
        let reply = self.send(OP, Method::POST, url, Some(&body), policy).await?;
        // 400 means the task list already exists.
        if reply.status.is_success() || reply.status == StatusCode::BAD_REQUEST {
            Ok(())
        } else {
            Err(reply.into_status_error(OP))
        }
    }

    async fn update_callback(
        &self,
        job_id: &str,
        callback: CallbackKind,
        update: &CallbackUpdate,
        policy: RequestPolicy,
    ) -> Result<(), ControlPlaneError> {
        const OP: &str = "update_callback";
        let url = self.url(&["jobs", job_id, "callbacks", callback.name()]);
        let reply = self.send(OP, Method::PUT, url, Some(update), policy).await?;
        if reply.status.is_success() {
            Ok(())
        } else {
            Err(reply.into_status_error(OP))
        }
    }
}
