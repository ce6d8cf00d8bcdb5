//! Orchestrator - drives one job instance through tasks and callbacks
//!
//! # Flow of `run()`
//! 1. status → running (always notified, even for already finished jobs)
//! 2. task phase, unless the job was resumed in a terminal status
//! 3. callback phase for the terminal status
//! 4. final job notification with the data, whenever the job is terminal
//!
//! Retry and callback redirection are outcomes, not errors: the job is left
//! `pending` and the caller requeues the message.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use super::cancellation::RemoteCancellation;
use super::config::RuntimeConfig;
use crate::domain::definition::JobDefinition;
use crate::domain::errors::{ControlPlaneError, ErrorKind, RunError, TaskError};
use crate::domain::ids::{AttemptId, RunId};
use crate::domain::instance::JobInstance;
use crate::domain::state::{Action, CallbackKind, RetryLimit, Status};
use crate::impls::disabled::DisabledControlPlane;
use crate::ports::cancellation::{CancellationCheck, assert_not_cancelled};
use crate::ports::control_plane::{CallbackUpdate, ControlPlane, JobUpdate, TaskUpdate};
use crate::typed::registry::TaskRegistry;
use crate::typed::runtime::TaskRuntime;

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reached `status` and its callback ran.
    Finished(Status),
    /// A transient failure within budget; the message should be redelivered.
    RetryScheduled { action: Action, retries: u32 },
    /// `on_success` or `on_cancel` failed for good; the next delivery runs
    /// `on_error`.
    CallbackRedirected { callback: CallbackKind },
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseFlow {
    Continue,
    Cancelled,
    Retry,
    Abort,
    Redirect(CallbackKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Task,
    Callback,
}

/// Mock definitions and disabled environments never talk to the control plane.
pub fn select_control_plane(
    definition: &JobDefinition,
    config: &RuntimeConfig,
    control_plane: &Arc<dyn ControlPlane>,
) -> Arc<dyn ControlPlane> {
    if definition.is_mock() || config.requests_disabled() {
        Arc::new(DisabledControlPlane)
    } else {
        Arc::clone(control_plane)
    }
}

pub struct Orchestrator {
    job: JobInstance,
    definition: Arc<JobDefinition>,
    tasks: Arc<TaskRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    cancellation: Arc<dyn CancellationCheck>,
    config: Arc<RuntimeConfig>,
    run_id: RunId,
}

impl Orchestrator {
    pub fn new(
        job: JobInstance,
        definition: Arc<JobDefinition>,
        tasks: Arc<TaskRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        let control_plane = select_control_plane(&definition, &config, &control_plane);
        let cancellation = Arc::new(RemoteCancellation::new(
            Arc::clone(&control_plane),
            job.id(),
            job.worker().clone(),
            config.default_request.policy(),
        ));
        Self {
            job,
            definition,
            tasks,
            control_plane,
            cancellation,
            config,
            run_id: RunId::generate(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Arc<dyn CancellationCheck>) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn job(&self) -> &JobInstance {
        &self.job
    }

    pub fn into_job(self) -> JobInstance {
        self.job
    }

    pub async fn run(&mut self) -> Result<RunOutcome, RunError> {
        let span = info_span!(
            "job",
            job_id = %self.job.id(),
            job = %self.job.name(),
            run = %self.run_id,
        );
        async move {
            let result = self.run_phases().await;
            let finalized = self.notify_final().await;
            match (result, finalized) {
                (Ok(outcome), Ok(())) => Ok(outcome),
                (Ok(_), Err(err)) => Err(err),
                (Err(err), _) => Err(err),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_phases(&mut self) -> Result<RunOutcome, RunError> {
        let last_status = self.job.status();
        self.job.set_status(Status::Running);
        self.notify_job(JobUpdate::status(Status::Running)).await?;

        if last_status.is_terminal() {
            debug!(status = %last_status, "tasks already finished; running callbacks only");
            self.job.set_status(last_status);
        } else {
            let flow = self.run_tasks().await?;
            if let Some(outcome) = self.interrupted(flow) {
                return Ok(outcome);
            }
            self.job.reset_retries();
        }

        let flow = self.run_callback().await?;
        if let Some(outcome) = self.interrupted(flow) {
            return Ok(outcome);
        }
        info!(status = %self.job.status(), "job finished");
        Ok(RunOutcome::Finished(self.job.status()))
    }

    fn interrupted(&self, flow: PhaseFlow) -> Option<RunOutcome> {
        match flow {
            PhaseFlow::Retry => Some(RunOutcome::RetryScheduled {
                action: self
                    .job
                    .current_action()
                    .cloned()
                    .unwrap_or(Action::Task(String::new())),
                retries: self.job.retries(),
            }),
            PhaseFlow::Redirect(callback) => Some(RunOutcome::CallbackRedirected { callback }),
            PhaseFlow::Continue | PhaseFlow::Cancelled | PhaseFlow::Abort => None,
        }
    }

    /// Declared tasks from the current action onwards.
    fn tasks_to_run(&self) -> Vec<String> {
        let tasks = self.definition.tasks();
        match self.job.current_action() {
            Some(Action::Task(name)) => tasks
                .iter()
                .position(|t| t == name)
                .map(|at| tasks[at..].to_vec())
                .unwrap_or_default(),
            Some(Action::Callback(_)) | None => Vec::new(),
        }
    }

    async fn run_tasks(&mut self) -> Result<PhaseFlow, RunError> {
        let tasks = self.tasks_to_run();
        if tasks.is_empty() {
            if self.definition.tasks().is_empty() {
                self.job.set_current_action(None);
                self.job.set_status(Status::Success);
                return Ok(PhaseFlow::Continue);
            }
            let action = self
                .job
                .current_action()
                .map(|a| a.name().to_string())
                .unwrap_or_default();
            warn!(action = %action, "current action is not a declared task");
            self.job.record_error(&TaskError::UnknownAction(action));
            self.job.set_status(Status::Error);
            return Ok(PhaseFlow::Abort);
        }

        for name in tasks {
            self.job.set_current_action(Some(Action::Task(name.clone())));
            self.notify_task(TaskUpdate::new(&name, Status::Running), false)
                .await?;

            match self.attempt_task(&name).await {
                Ok(()) => {
                    self.notify_task(TaskUpdate::new(&name, Status::Success), true)
                        .await?;
                    self.job.reset_retries();
                }
                Err(err) => return self.on_failure(err, Phase::Task).await,
            }
        }

        self.job.set_current_action(None);
        self.job.set_status(Status::Success);
        Ok(PhaseFlow::Continue)
    }

    async fn attempt_task(&mut self, name: &str) -> Result<(), TaskError> {
        let cancellation = Arc::clone(&self.cancellation);
        assert_not_cancelled(cancellation.as_ref()).await?;

        let factory = self
            .definition
            .resolve_task_implementation(&self.tasks, name)?;
        let max_retries = self.budget(Phase::Task);
        let may_retry = self.may_retry(Phase::Task);

        let ctx = self.job.context(cancellation.as_ref(), max_retries, may_retry);
        let mut runtime = TaskRuntime::new(name, factory(), ctx);
        match runtime.perform().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if !matches!(
                    err.kind(),
                    ErrorKind::Infrastructure | ErrorKind::OwnershipLost | ErrorKind::Cancelled
                ) {
                    runtime.on_error(&err).await;
                }
                Err(err)
            }
        }
    }

    async fn run_callback(&mut self) -> Result<PhaseFlow, RunError> {
        let Some(kind) = CallbackKind::for_status(self.job.status()) else {
            return Ok(PhaseFlow::Continue);
        };

        self.job.set_current_action(Some(Action::Callback(kind)));
        self.notify_callback(kind, CallbackUpdate::new(Status::Running))
            .await?;

        match self.invoke_callback(kind).await {
            Ok(()) => {
                let update = CallbackUpdate::new(Status::Success).with_data(self.job.data().to_value());
                self.notify_callback(kind, update).await?;
                self.job.set_current_action(None);
                self.job.reset_retries();
                Ok(PhaseFlow::Continue)
            }
            Err(err) => self.on_failure(err, Phase::Callback).await,
        }
    }

    async fn invoke_callback(&mut self, kind: CallbackKind) -> Result<(), TaskError> {
        let cancellation = Arc::clone(&self.cancellation);
        let callbacks = Arc::clone(self.definition.callbacks());
        let max_retries = self.budget(Phase::Callback);
        let may_retry = self.may_retry(Phase::Callback);
        let attempt = AttemptId::generate();

        let span = info_span!("callback", callback = %kind, attempt = %attempt);
        info!(parent: &span, retries = self.job.retries(), "starting callback");
        let mut ctx = self.job.context(cancellation.as_ref(), max_retries, may_retry);
        let result = callbacks.invoke(kind, &mut ctx).instrument(span.clone()).await;
        if let Err(err) = &result {
            error!(parent: &span, error = %err, "callback failed");
        }
        result
    }

    /// Dispatch a failure of the active task or callback.
    async fn on_failure(&mut self, err: TaskError, phase: Phase) -> Result<PhaseFlow, RunError> {
        match err.kind() {
            ErrorKind::Infrastructure => {
                error!(error = %err, "control plane unreachable; aborting run");
                Err(RunError::ControlPlaneUnreachable(err.to_string()))
            }
            ErrorKind::OwnershipLost => {
                error!("job lock lost; aborting run");
                Err(RunError::OwnershipLost)
            }
            ErrorKind::Cancelled if phase == Phase::Task => self.cancel().await,
            _ => self.handle_error(err, phase).await,
        }
    }

    async fn cancel(&mut self) -> Result<PhaseFlow, RunError> {
        info!("job cancelled");
        if let Some(Action::Task(name)) = self.job.current_action().cloned() {
            self.notify_task(TaskUpdate::new(name, Status::Cancelled), false)
                .await?;
        }
        self.job.set_status(Status::Cancelled);
        Ok(PhaseFlow::Cancelled)
    }

    async fn handle_error(&mut self, err: TaskError, phase: Phase) -> Result<PhaseFlow, RunError> {
        if self.config.environment.is_development() {
            let action = self
                .job
                .current_action()
                .map(|a| a.name().to_string())
                .unwrap_or_default();
            error!(action = %action, error = %err, "failing fast in development");
            return Err(RunError::Task { action, source: err });
        }

        self.job.record_error(&err);
        match err.kind() {
            ErrorKind::Permanent | ErrorKind::NameResolution => {
                warn!(error = %err, "failure is not retryable");
                self.abort().await
            }
            _ if self.may_retry(phase) => self.schedule_retry().await,
            _ => {
                warn!(error = %err, retries = self.job.retries(), "retry budget exhausted");
                self.abort().await
            }
        }
    }

    async fn schedule_retry(&mut self) -> Result<PhaseFlow, RunError> {
        let retries = self.job.increment_retries();
        let exception = self.job.error().cloned();
        match self.job.current_action().cloned() {
            Some(Action::Task(name)) => {
                let update = TaskUpdate::new(name, Status::Pending)
                    .with_retries(retries)
                    .with_exception(exception);
                self.notify_task(update, false).await?;
            }
            Some(Action::Callback(kind)) => {
                let update = CallbackUpdate::new(Status::Pending)
                    .with_retries(retries)
                    .with_exception(exception);
                self.notify_callback(kind, update).await?;
            }
            None => {}
        }
        self.job.set_status(Status::Pending);
        info!(retries, "retry scheduled");
        Ok(PhaseFlow::Retry)
    }

    async fn abort(&mut self) -> Result<PhaseFlow, RunError> {
        let exception = self.job.error().cloned();
        match self.job.current_action().cloned() {
            Some(Action::Callback(kind)) => {
                let update = CallbackUpdate::new(Status::Error).with_exception(exception);
                self.notify_callback(kind, update).await?;
                if kind != CallbackKind::OnError {
                    self.job.set_status(Status::Pending);
                    info!(callback = %kind, "callback failed; redirecting to on_error");
                    return Ok(PhaseFlow::Redirect(kind));
                }
            }
            Some(Action::Task(name)) => {
                let update = TaskUpdate::new(name, Status::Error).with_exception(exception);
                self.notify_task(update, false).await?;
            }
            None => {}
        }
        self.job.set_status(Status::Error);
        Ok(PhaseFlow::Abort)
    }

    fn budget(&self, phase: Phase) -> RetryLimit {
        let default = self.config.default_job_retries;
        match phase {
            Phase::Task => self.definition.max_retries(default),
            Phase::Callback => self.definition.callback_max_retries(default),
        }
    }

    fn may_retry(&self, phase: Phase) -> bool {
        !self.definition.is_mock() && self.budget(phase).allows(self.job.retries())
    }

    async fn notify_final(&self) -> Result<(), RunError> {
        let status = self.job.status();
        if !status.is_terminal() {
            return Ok(());
        }
        self.notify_job(JobUpdate::status(status).with_data(self.job.data().to_value()))
            .await
    }

    async fn notify_job(&self, update: JobUpdate) -> Result<(), RunError> {
        let policy = self.config.job_request.policy().critical();
        let result = self
            .control_plane
            .update_job(self.job.id(), &update, policy)
            .await;
        settle("update_job", result)
    }

    async fn notify_task(&self, task: TaskUpdate, with_data: bool) -> Result<(), RunError> {
        let mut update = JobUpdate::task(task);
        if with_data {
            update = update.with_data(self.job.data().to_value());
        }
        let policy = self.config.task_request.policy().critical();
        let result = self
            .control_plane
            .update_job(self.job.id(), &update, policy)
            .await;
        settle("update_task", result)
    }

    async fn notify_callback(&self, kind: CallbackKind, update: CallbackUpdate) -> Result<(), RunError> {
        let policy = self.config.default_request.policy().critical();
        let result = self
            .control_plane
            .update_callback(self.job.id(), kind, &update, policy)
            .await;
        settle("update_callback", result)
    }
}

/// An unreachable control plane ends the run; any other failed notification
/// is logged and the run carries on.
fn settle(operation: &str, result: Result<(), ControlPlaneError>) -> Result<(), RunError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_unreachable() => Err(RunError::ControlPlaneUnreachable(err.to_string())),
        Err(err) => {
            warn!(operation, error = %err, "control plane notification failed");
            Ok(())
        }
    }
}
