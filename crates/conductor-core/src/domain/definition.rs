//! Job definitions: the ordered task list and retry budgets of a job type.

use std::fmt;
use std::sync::Arc;

use super::errors::{DefinitionError, TaskError};
use super::state::RetryLimit;
use crate::typed::registry::TaskRegistry;
use crate::typed::task::{JobCallbacks, NoCallbacks, TaskFactory};

/// Static description of a job type.
///
/// Built once at startup and shared behind `Arc`; every method that changes
/// the definition consumes and returns it, so a registered definition is
/// effectively frozen.
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    parent: Option<String>,
    tasks: Vec<String>,
    max_retries: Option<RetryLimit>,
    callback_max_retries: Option<RetryLimit>,
    mock: bool,
    callbacks: Arc<dyn JobCallbacks>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            tasks: Vec::new(),
            max_retries: None,
            callback_max_retries: None,
            mock: false,
            callbacks: Arc::new(NoCallbacks),
        }
    }

    /// Child job type: copies tasks, budgets, callbacks and the mock flag.
    pub fn inherit(name: impl Into<String>, parent: &JobDefinition) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.name.clone()),
            tasks: parent.tasks.clone(),
            max_retries: parent.max_retries,
            callback_max_retries: parent.callback_max_retries,
            mock: parent.mock,
            callbacks: Arc::clone(&parent.callbacks),
        }
    }

    /// Replace the task list.
    pub fn declare_tasks<I, S>(mut self, names: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tasks: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if tasks.contains(&name) {
                return Err(DefinitionError::DuplicateTask(name));
            }
            tasks.push(name);
        }
        self.tasks = tasks;
        Ok(self)
    }

    /// Insert tasks immediately before `before`.
    pub fn prepend_tasks<I, S>(self, before: &str, names: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let at = self.position(before)?;
        self.insert_at(at, names)
    }

    /// Insert tasks immediately after `after`.
    pub fn append_tasks<I, S>(self, after: &str, names: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let at = self.position(after)? + 1;
        self.insert_at(at, names)
    }

    fn position(&self, anchor: &str) -> Result<usize, DefinitionError> {
        self.tasks
            .iter()
            .position(|t| t == anchor)
            .ok_or_else(|| DefinitionError::TaskNotFound(anchor.to_string()))
    }

    fn insert_at<I, S>(mut self, at: usize, names: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inserted: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if self.tasks.contains(&name) || inserted.contains(&name) {
                return Err(DefinitionError::DuplicateTask(name));
            }
            inserted.push(name);
        }
        self.tasks.splice(at..at, inserted);
        Ok(self)
    }

    pub fn with_max_retries(mut self, limit: RetryLimit) -> Self {
        self.max_retries = Some(limit);
        self
    }

    pub fn with_callback_max_retries(mut self, limit: RetryLimit) -> Self {
        self.callback_max_retries = Some(limit);
        self
    }

    /// Jobs of a mock type make no control-plane calls and never retry.
    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn with_callbacks(mut self, callbacks: impl JobCallbacks + 'static) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn callbacks(&self) -> &Arc<dyn JobCallbacks> {
        &self.callbacks
    }

    pub fn max_retries(&self, default: RetryLimit) -> RetryLimit {
        self.max_retries.unwrap_or(default)
    }

    /// Falls back to the task budget, then to `default`.
    pub fn callback_max_retries(&self, default: RetryLimit) -> RetryLimit {
        self.callback_max_retries
            .or(self.max_retries)
            .unwrap_or(default)
    }

    /// Find the implementation of `task`.
    ///
    /// Search order: namespaced under this job type; then, for a child type,
    /// namespaced under the parent; then unqualified.
    pub fn resolve_task_implementation(
        &self,
        registry: &TaskRegistry,
        task: &str,
    ) -> Result<TaskFactory, TaskError> {
        let mut namespaces = vec![Some(self.name.as_str())];
        if let Some(parent) = &self.parent {
            namespaces.push(Some(parent.as_str()));
        }
        namespaces.push(None);

        namespaces
            .into_iter()
            .find_map(|ns| registry.lookup(ns, task))
            .ok_or_else(|| TaskError::TaskClassNotFound {
                job: self.name.clone(),
                task: task.to_string(),
            })
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("tasks", &self.tasks)
            .field("max_retries", &self.max_retries)
            .field("callback_max_retries", &self.callback_max_retries)
            .field("mock", &self.mock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::{Task, TaskContext};
    use async_trait::async_trait;
    use rstest::rstest;

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Task for Noop {
        async fn run(&mut self, _ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn sample() -> JobDefinition {
        JobDefinition::new("Sample")
            .declare_tasks(["a", "b", "c"])
            .unwrap()
    }

    #[test]
    fn declare_rejects_duplicates() {
        let err = JobDefinition::new("Sample")
            .declare_tasks(["a", "a"])
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateTask("a".into()));
    }

    #[test]
    fn prepend_and_append_around_anchor() {
        let def = sample()
            .prepend_tasks("b", ["x"])
            .unwrap()
            .append_tasks("c", ["y", "z"])
            .unwrap();
        assert_eq!(def.tasks(), ["a", "x", "b", "c", "y", "z"]);
    }

    #[rstest]
    #[case::prepend(true)]
    #[case::append(false)]
    fn missing_anchor_fails(#[case] prepend: bool) {
        let result = if prepend {
            sample().prepend_tasks("missing", ["x"])
        } else {
            sample().append_tasks("missing", ["x"])
        };
        assert_eq!(
            result.unwrap_err(),
            DefinitionError::TaskNotFound("missing".into())
        );
    }

    #[rstest]
    #[case::defaults(None, None, RetryLimit::Limited(3), RetryLimit::Limited(3))]
    #[case::task_only(Some(RetryLimit::Limited(1)), None, RetryLimit::Limited(1), RetryLimit::Limited(1))]
    #[case::both(
        Some(RetryLimit::Limited(1)),
        Some(RetryLimit::Unlimited),
        RetryLimit::Limited(1),
        RetryLimit::Unlimited
    )]
    fn budgets_fall_back(
        #[case] max: Option<RetryLimit>,
        #[case] callback: Option<RetryLimit>,
        #[case] expected_task: RetryLimit,
        #[case] expected_callback: RetryLimit,
    ) {
        let mut def = sample();
        if let Some(limit) = max {
            def = def.with_max_retries(limit);
        }
        if let Some(limit) = callback {
            def = def.with_callback_max_retries(limit);
        }
        assert_eq!(def.max_retries(RetryLimit::Limited(3)), expected_task);
        assert_eq!(def.callback_max_retries(RetryLimit::Limited(3)), expected_callback);
    }

    #[test]
    fn inherit_copies_parent_settings() {
        let parent = sample().with_max_retries(RetryLimit::Limited(7)).mock(true);
        let child = JobDefinition::inherit("Child", &parent);

        assert_eq!(child.parent(), Some("Sample"));
        assert_eq!(child.tasks(), parent.tasks());
        assert_eq!(child.max_retries(RetryLimit::Limited(3)), RetryLimit::Limited(7));
        assert!(child.is_mock());
    }

    #[test]
    fn resolution_prefers_own_namespace() {
        let mut registry = TaskRegistry::new();
        registry.register_default::<Noop>(None, "a").unwrap();
        registry.register_default::<Noop>(Some("Sample"), "b").unwrap();

        let def = sample();
        assert!(def.resolve_task_implementation(&registry, "a").is_ok());
        assert!(def.resolve_task_implementation(&registry, "b").is_ok());
        assert_eq!(
            def.resolve_task_implementation(&registry, "c").err(),
            Some(TaskError::TaskClassNotFound {
                job: "Sample".into(),
                task: "c".into()
            })
        );
    }

    #[test]
    fn child_resolution_walks_up_to_parent() {
        let mut registry = TaskRegistry::new();
        registry.register_default::<Noop>(Some("Sample"), "b").unwrap();

        let child = JobDefinition::inherit("Child", &sample());
        assert!(child.resolve_task_implementation(&registry, "b").is_ok());

        let unrelated = JobDefinition::new("Other").declare_tasks(["b"]).unwrap();
        assert!(unrelated.resolve_task_implementation(&registry, "b").is_err());
    }
}
