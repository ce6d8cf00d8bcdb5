//! Runner - handles one queue message end to end
//!
//! lock → heartbeat → build → orchestrate → stop heartbeat

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{Instrument, debug, info, info_span, warn};

use super::cancellation::RemoteCancellation;
use super::config::RuntimeConfig;
use super::factory::JobFactory;
use super::heartbeat::{Heartbeat, HeartbeatHandle};
use super::orchestrator::{Orchestrator, RunOutcome, select_control_plane};
use crate::domain::definition::JobDefinition;
use crate::domain::envelope::JobMessage;
use crate::domain::errors::RunnerError;
use crate::domain::ids::RunId;
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::ControlPlane;
use crate::typed::registry::{Registry, TaskRegistry};

/// What became of a message that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// The job was already finished remotely.
    Discarded,
    Completed(RunOutcome),
}

impl RunReport {
    /// Should the message be redelivered?
    pub fn needs_redelivery(&self) -> bool {
        matches!(
            self,
            RunReport::Completed(RunOutcome::RetryScheduled { .. })
                | RunReport::Completed(RunOutcome::CallbackRedirected { .. })
        )
    }
}

pub struct Runner {
    factory: JobFactory,
    tasks: Arc<TaskRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    config: Arc<RuntimeConfig>,
    worker: WorkerIdentity,
    errors: Option<UnboundedSender<RunnerError>>,
}

impl Runner {
    pub fn new(
        registry: Registry,
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        let Registry { jobs, tasks } = registry;
        let worker = WorkerIdentity::current();
        Self {
            factory: JobFactory::new(
                Arc::new(jobs),
                Arc::clone(&control_plane),
                Arc::clone(&config),
                worker.clone(),
            ),
            tasks: Arc::new(tasks),
            control_plane,
            config,
            worker,
            errors: None,
        }
    }

    pub fn with_worker(mut self, worker: WorkerIdentity) -> Self {
        self.factory = JobFactory::new(
            self.factory.jobs(),
            Arc::clone(&self.control_plane),
            Arc::clone(&self.config),
            worker.clone(),
        );
        self.worker = worker;
        self
    }

    /// Heartbeat failures are also reported here.
    pub fn with_error_channel(mut self, errors: UnboundedSender<RunnerError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn worker(&self) -> &WorkerIdentity {
        &self.worker
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn handle(&self, message: &JobMessage) -> Result<RunReport, RunnerError> {
        let run_id = RunId::generate();
        let span = info_span!(
            "run",
            run = %run_id,
            job_id = %message.id,
            job = %message.name,
        );
        async move {
            let definition = self.factory.resolve(&message.name)?;
            let control_plane =
                select_control_plane(&definition, &self.config, &self.control_plane);

            let heartbeat = if control_plane.is_enabled() {
                let heartbeat = Heartbeat::new(
                    Arc::clone(&control_plane),
                    message.id.clone(),
                    self.worker.clone(),
                    &self.config,
                );
                heartbeat.beat().await?;
                debug!("lock acquired");
                Some(heartbeat.spawn(self.errors.clone()))
            } else {
                debug!("requests disabled; running without a lock");
                None
            };

            let result = self
                .execute(message, definition, control_plane, heartbeat.as_ref(), run_id)
                .await;

            let lost = heartbeat.as_ref().is_some_and(HeartbeatHandle::is_lost);
            if let Some(heartbeat) = heartbeat {
                heartbeat.stop().await;
            }

            match result {
                Ok(report) if lost => {
                    warn!(?report, "lock was lost during the run");
                    Err(RunnerError::LockLost(message.id.clone()))
                }
                Ok(report) => {
                    log_report(&report);
                    Ok(report)
                }
                Err(err) => {
                    warn!(error = %err, "run failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        message: &JobMessage,
        definition: Arc<JobDefinition>,
        control_plane: Arc<dyn ControlPlane>,
        heartbeat: Option<&HeartbeatHandle>,
        run_id: RunId,
    ) -> Result<RunReport, RunnerError> {
        let Some(job) = self.factory.build(message).await? else {
            return Ok(RunReport::Discarded);
        };

        let mut cancellation = RemoteCancellation::new(
            control_plane,
            job.id(),
            self.worker.clone(),
            self.config.default_request.policy(),
        );
        if let Some(heartbeat) = heartbeat {
            cancellation = cancellation.with_lock_signal(heartbeat.lost_signal());
        }

        let mut orchestrator = Orchestrator::new(
            job,
            definition,
            Arc::clone(&self.tasks),
            Arc::clone(&self.control_plane),
            Arc::clone(&self.config),
        )
        .with_cancellation(Arc::new(cancellation))
        .with_run_id(run_id);

        let outcome = orchestrator.run().await?;
        Ok(RunReport::Completed(outcome))
    }
}

fn log_report(report: &RunReport) {
    match report {
        RunReport::Discarded => info!("job already finished; message discarded"),
        RunReport::Completed(RunOutcome::Finished(status)) => info!(%status, "job finished"),
        RunReport::Completed(RunOutcome::RetryScheduled { action, retries }) => {
            info!(%action, retries, "retry scheduled")
        }
        RunReport::Completed(RunOutcome::CallbackRedirected { callback }) => {
            info!(%callback, "callback failed; on_error runs next")
        }
    }
}
