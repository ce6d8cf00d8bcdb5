//! WorkerPool - `n` tokio workers pulling messages from a JobQueue
//!
//! Dropping the pool does not stop in-flight runs. `request_shutdown()` stops
//! workers from taking new messages; `join()` waits for them.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::runner::{RunReport, Runner};
use crate::domain::errors::RunnerError;
use crate::ports::job_queue::{Delivery, JobQueue};

/// What to do with a delivery after its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

/// Retries and callback redirects run again, as do transient failures.
/// Everything else is dropped.
pub fn disposition(result: &Result<RunReport, RunnerError>) -> Disposition {
    match result {
        Ok(report) if report.needs_redelivery() => Disposition::Requeue,
        Ok(_) => Disposition::Ack,
        Err(err) if err.is_transient() => Disposition::Requeue,
        Err(_) => Disposition::Ack,
    }
}

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(n: usize, queue: Arc<dyn JobQueue>, runner: Arc<Runner>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let runner = Arc::clone(&runner);
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(
                    async move { worker_loop(queue, runner, &mut shutdown_rx).await }
                        .instrument(info_span!("worker", worker_id)),
                )
            })
            .collect();

        info!(workers = n, "worker pool started");
        Self { shutdown_tx, joins }
    }

    /// In-flight runs finish; no new messages are taken.
    pub fn request_shutdown(&self) {
        // Receivers may already be gone.
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for every worker, e.g. after the queue was closed.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    queue: Arc<dyn JobQueue>,
    runner: Arc<Runner>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let delivery = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = queue.receive() => delivery,
        };

        let Some(delivery) = delivery else {
            debug!("queue closed");
            break;
        };

        process(delivery, &runner).await;
    }
}

async fn process(delivery: Box<dyn Delivery>, runner: &Runner) {
    let message = delivery.message().clone();
    debug!(job_id = %message.id, attempt = delivery.attempt(), "message received");

    let result = runner.handle(&message).await;
    let reason = match &result {
        Ok(report) => format!("{report:?}"),
        Err(err) => err.to_string(),
    };

    let settled = match disposition(&result) {
        Disposition::Ack => delivery.ack().await,
        Disposition::Requeue => delivery.requeue(reason).await,
    };
    if let Err(err) = settled {
        warn!(job_id = %message.id, error = %err, "could not settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::orchestrator::RunOutcome;
    use crate::domain::errors::{FactoryError, RunError};
    use crate::domain::state::{Action, CallbackKind, Status};
    use rstest::rstest;

    #[rstest]
    #[case::finished(Ok(RunReport::Completed(RunOutcome::Finished(Status::Error))), Disposition::Ack)]
    #[case::discarded(Ok(RunReport::Discarded), Disposition::Ack)]
    #[case::retry(
        Ok(RunReport::Completed(RunOutcome::RetryScheduled { action: Action::Task("a".into()), retries: 1 })),
        Disposition::Requeue
    )]
    #[case::redirect(
        Ok(RunReport::Completed(RunOutcome::CallbackRedirected { callback: CallbackKind::OnSuccess })),
        Disposition::Requeue
    )]
    #[case::unreachable(Err(RunnerError::ControlPlaneUnreachable("down".into())), Disposition::Requeue)]
    #[case::unreachable_during_run(
        Err(RunnerError::Run(RunError::ControlPlaneUnreachable("down".into()))),
        Disposition::Requeue
    )]
    #[case::locked(Err(RunnerError::JobAlreadyLocked("job-1".into())), Disposition::Ack)]
    #[case::lost(Err(RunnerError::Run(RunError::OwnershipLost)), Disposition::Ack)]
    #[case::unknown_type(
        Err(RunnerError::Factory(FactoryError::JobClassNotFound("X".into()))),
        Disposition::Ack
    )]
    fn dispositions(#[case] result: Result<RunReport, RunnerError>, #[case] expected: Disposition) {
        assert_eq!(disposition(&result), expected);
    }
}
