//! JobFactory - rebuilds a job instance from its message and remote progress

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::RuntimeConfig;
use super::orchestrator::select_control_plane;
use crate::domain::data::JobDataStore;
use crate::domain::definition::JobDefinition;
use crate::domain::envelope::JobMessage;
use crate::domain::errors::{FactoryError, SerializedError};
use crate::domain::instance::JobInstance;
use crate::domain::state::{Action, Status};
use crate::domain::worker::WorkerIdentity;
use crate::ports::control_plane::{
    ControlPlane, JobAttributes, JobUpdate, TaskAttributes, TaskRegistration,
};
use crate::typed::registry::JobRegistry;

pub struct JobFactory {
    jobs: Arc<JobRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    config: Arc<RuntimeConfig>,
    worker: WorkerIdentity,
}

impl JobFactory {
    pub fn new(
        jobs: Arc<JobRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<RuntimeConfig>,
        worker: WorkerIdentity,
    ) -> Self {
        Self {
            jobs,
            control_plane,
            config,
            worker,
        }
    }

    pub fn jobs(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.jobs)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<JobDefinition>, FactoryError> {
        self.jobs
            .get(name)
            .map_err(|_| FactoryError::JobClassNotFound(name.to_string()))
    }

    /// `Ok(None)` when the control plane already has the job in a terminal
    /// status and the message should be discarded.
    pub async fn build(&self, message: &JobMessage) -> Result<Option<JobInstance>, FactoryError> {
        let definition = self.resolve(&message.name)?;
        let control_plane = select_control_plane(&definition, &self.config, &self.control_plane);
        let fetch_policy = self.config.default_request.policy().critical();

        let Some(mut attrs) = control_plane.fetch_job(&message.id, fetch_policy).await? else {
            warn!(job_id = %message.id, "job not found on the control plane");
            let update = JobUpdate::status(Status::Error);
            if let Err(err) = control_plane
                .update_job(&message.id, &update, self.config.job_request.policy())
                .await
            {
                debug!(job_id = %message.id, error = %err, "could not flag missing job");
            }
            return Err(FactoryError::JobNotFound(message.id.clone()));
        };

        if let Some(status) = attrs.status
            && status.is_terminal()
        {
            info!(job_id = %message.id, %status, "job already finished; discarding message");
            return Ok(None);
        }

        if attrs.tasks.is_empty() {
            self.register(control_plane.as_ref(), &message.id, &definition)
                .await?;
            attrs.tasks = registrations(&definition)
                .into_iter()
                .map(|t| TaskAttributes {
                    name: t.name,
                    order: t.order,
                    ..TaskAttributes::default()
                })
                .collect();
        }

        let (status, error) = calculate_status_and_error(&attrs);
        let (current_action, retries) = find_current_action_and_retries(&attrs, &definition);

        let data = if is_empty_data(&attrs.data) {
            JobDataStore::from_value(message.data.clone())
        } else {
            JobDataStore::from_value(attrs.data.clone())
        };

        debug!(
            job_id = %message.id,
            %status,
            action = ?current_action.as_ref().map(Action::name),
            retries,
            "job reconstructed"
        );

        Ok(Some(
            JobInstance::new(message.id.clone(), message.name.clone(), self.worker.clone())
                .with_tags(message.tag_map())
                .with_status(status)
                .with_current_action(current_action)
                .with_retries(retries)
                .with_data(data)
                .with_error(error),
        ))
    }

    async fn register(
        &self,
        control_plane: &dyn ControlPlane,
        job_id: &str,
        definition: &JobDefinition,
    ) -> Result<(), FactoryError> {
        let policy = self.config.job_request.policy().critical();
        control_plane
            .register_tasks(job_id, &registrations(definition), policy)
            .await?;

        let default = self.config.default_job_retries;
        let update = JobUpdate {
            max_retries: Some(definition.max_retries(default)),
            callback_max_retries: Some(definition.callback_max_retries(default)),
            ..JobUpdate::default()
        };
        control_plane.update_job(job_id, &update, policy).await?;
        Ok(())
    }
}

fn registrations(definition: &JobDefinition) -> Vec<TaskRegistration> {
    definition
        .tasks()
        .iter()
        .zip(0u32..)
        .map(|(name, order)| TaskRegistration {
            name: name.clone(),
            order,
        })
        .collect()
}

fn is_empty_data(data: &serde_json::Value) -> bool {
    match data {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A failed callback wins; otherwise the first unfinished task decides.
pub fn calculate_status_and_error(attrs: &JobAttributes) -> (Status, Option<SerializedError>) {
    if let Some(callback) = attrs.callbacks.iter().find(|c| c.status == Status::Error) {
        return (Status::Error, callback.exception.clone());
    }
    attrs
        .tasks_in_order()
        .into_iter()
        .find(|t| t.status != Status::Success)
        .map(|t| (t.status, t.exception.clone()))
        .unwrap_or((Status::Success, None))
}

/// Where to resume: the first non-terminal callback once callbacks have
/// started, else the first non-terminal task, else the first declared task.
pub fn find_current_action_and_retries(
    attrs: &JobAttributes,
    definition: &JobDefinition,
) -> (Option<Action>, u32) {
    let found = if attrs.callbacks.is_empty() {
        attrs
            .tasks_in_order()
            .into_iter()
            .find(|t| !t.status.is_terminal())
            .map(|t| (Action::Task(t.name.clone()), t.retries))
    } else {
        attrs
            .callbacks
            .iter()
            .find(|c| !c.status.is_terminal())
            .map(|c| (Action::from_name(&c.name), c.retries))
    };

    match found {
        Some((action, retries)) => (Some(action), retries),
        None => (
            definition.tasks().first().map(|t| Action::Task(t.clone())),
            0,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::CallbackKind;
    use crate::impls::inmem_control_plane::{Call, InMemoryControlPlane};
    use crate::ports::control_plane::CallbackAttributes;
    use rstest::rstest;
    use serde_json::json;

    fn task(name: &str, order: u32, status: Status, retries: u32) -> TaskAttributes {
        TaskAttributes {
            name: name.into(),
            order,
            status,
            retries,
            exception: None,
        }
    }

    fn sample() -> JobDefinition {
        JobDefinition::new("Sample").declare_tasks(["a", "b"]).unwrap()
    }

    fn factory(plane: &InMemoryControlPlane, definition: JobDefinition) -> JobFactory {
        let mut jobs = JobRegistry::new();
        jobs.register(definition).unwrap();
        JobFactory::new(
            Arc::new(jobs),
            Arc::new(plane.clone()),
            Arc::new(RuntimeConfig::default()),
            WorkerIdentity::new("ip", "host", "1"),
        )
    }

    #[rstest]
    #[case::all_done(vec![task("a", 0, Status::Success, 0), task("b", 1, Status::Success, 0)], Status::Success)]
    #[case::second_pending(vec![task("a", 0, Status::Success, 0), task("b", 1, Status::Pending, 1)], Status::Pending)]
    #[case::ordered_by_order_field(vec![task("b", 1, Status::Success, 0), task("a", 0, Status::Cancelled, 0)], Status::Cancelled)]
    fn status_follows_first_unfinished_task(#[case] tasks: Vec<TaskAttributes>, #[case] expected: Status) {
        let attrs = JobAttributes {
            tasks,
            ..JobAttributes::default()
        };
        assert_eq!(calculate_status_and_error(&attrs).0, expected);
    }

    #[test]
    fn failed_callback_means_error() {
        let exception = SerializedError {
            message: "boom".into(),
            kind: "TaskError".into(),
            retry_count: 0,
        };
        let attrs = JobAttributes {
            tasks: vec![task("a", 0, Status::Success, 0)],
            callbacks: vec![CallbackAttributes {
                name: "on_success".into(),
                status: Status::Error,
                retries: 0,
                exception: Some(exception.clone()),
            }],
            ..JobAttributes::default()
        };
        assert_eq!(
            calculate_status_and_error(&attrs),
            (Status::Error, Some(exception))
        );
    }

    #[test]
    fn resumes_at_first_unfinished_task() {
        let attrs = JobAttributes {
            tasks: vec![task("a", 0, Status::Success, 0), task("b", 1, Status::Pending, 2)],
            ..JobAttributes::default()
        };
        assert_eq!(
            find_current_action_and_retries(&attrs, &sample()),
            (Some(Action::Task("b".into())), 2)
        );
    }

    #[test]
    fn resumes_inside_callbacks_once_started() {
        let attrs = JobAttributes {
            tasks: vec![task("a", 0, Status::Success, 0), task("b", 1, Status::Success, 0)],
            callbacks: vec![
                CallbackAttributes {
                    name: "on_success".into(),
                    status: Status::Error,
                    ..CallbackAttributes::default()
                },
                CallbackAttributes {
                    name: "on_error".into(),
                    status: Status::Pending,
                    retries: 1,
                    ..CallbackAttributes::default()
                },
            ],
            ..JobAttributes::default()
        };
        assert_eq!(
            find_current_action_and_retries(&attrs, &sample()),
            (Some(Action::Callback(CallbackKind::OnError)), 1)
        );
    }

    #[test]
    fn defaults_to_first_task() {
        assert_eq!(
            find_current_action_and_retries(&JobAttributes::default(), &sample()),
            (Some(Action::Task("a".into())), 0)
        );
    }

    #[tokio::test]
    async fn fresh_job_registers_tasks_and_starts_pending() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;
        let definition = sample().with_max_retries(crate::domain::state::RetryLimit::Limited(1));

        let message = JobMessage::new("job-1", "Sample")
            .with_tag("tenant", "acme")
            .with_data(json!({"input": 1}));
        let job = factory(&plane, definition).build(&message).await.unwrap().unwrap();

        assert_eq!(job.status(), Status::Pending);
        assert_eq!(job.current_action(), Some(&Action::Task("a".into())));
        assert_eq!(job.data().get("input"), Some(&json!(1)));
        assert_eq!(job.tags().get("tenant"), Some(&json!("acme")));

        let remote = plane.job("job-1").await.unwrap();
        assert_eq!(remote.tasks.len(), 2);
        assert_eq!(remote.max_retries, Some(crate::domain::state::RetryLimit::Limited(1)));
        assert_eq!(
            remote.callback_max_retries,
            Some(crate::domain::state::RetryLimit::Limited(1))
        );
    }

    #[tokio::test]
    async fn configured_default_budget_is_pushed_when_none_is_declared() {
        let plane = InMemoryControlPlane::new();
        plane.create_job("job-1").await;

        factory(&plane, sample())
            .build(&JobMessage::new("job-1", "Sample"))
            .await
            .unwrap()
            .unwrap();

        let default = RuntimeConfig::default().default_job_retries;
        let remote = plane.job("job-1").await.unwrap();
        assert_eq!(remote.max_retries, Some(default));
        assert_eq!(remote.callback_max_retries, Some(default));
    }

    #[tokio::test]
    async fn terminal_jobs_are_discarded() {
        let plane = InMemoryControlPlane::new();
        plane
            .insert_job(
                "job-1",
                JobAttributes {
                    status: Some(Status::Success),
                    ..JobAttributes::default()
                },
            )
            .await;

        let message = JobMessage::new("job-1", "Sample");
        assert!(factory(&plane, sample()).build(&message).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_job_is_flagged_and_reported() {
        let plane = InMemoryControlPlane::new();
        let message = JobMessage::new("ghost", "Sample");

        let err = factory(&plane, sample()).build(&message).await.unwrap_err();

        assert_eq!(err, FactoryError::JobNotFound("ghost".into()));
        assert!(plane
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, Call::UpdateJob { update, .. } if update.status == Some(Status::Error))));
    }

    #[tokio::test]
    async fn remote_data_wins_over_message_data() {
        let plane = InMemoryControlPlane::new();
        plane
            .insert_job(
                "job-1",
                JobAttributes {
                    status: Some(Status::Pending),
                    tasks: vec![task("a", 0, Status::Success, 0), task("b", 1, Status::Pending, 1)],
                    data: json!({"outputs": {"a": "done"}, "owners": {"a": ["a"]}}),
                    ..JobAttributes::default()
                },
            )
            .await;

        let message = JobMessage::new("job-1", "Sample").with_data(json!({"input": 1}));
        let job = factory(&plane, sample()).build(&message).await.unwrap().unwrap();

        assert_eq!(job.data().get("a"), Some(&json!("done")));
        assert!(job.data().get("input").is_none());
        assert_eq!(job.retries(), 1);
        assert!(!plane
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, Call::RegisterTasks { .. })));
    }

    #[tokio::test]
    async fn unknown_job_type() {
        let plane = InMemoryControlPlane::new();
        let message = JobMessage::new("job-1", "Nope");
        assert_eq!(
            factory(&plane, sample()).build(&message).await.unwrap_err(),
            FactoryError::JobClassNotFound("Nope".into())
        );
    }

    #[tokio::test]
    async fn unreachable_fetch() {
        let plane = InMemoryControlPlane::new();
        plane.set_unreachable(true).await;
        let message = JobMessage::new("job-1", "Sample");
        assert!(matches!(
            factory(&plane, sample()).build(&message).await,
            Err(FactoryError::ControlPlaneUnreachable(_))
        ));
    }
}
