//! Registries of job definitions and task implementations
//!
//! Task implementations are keyed by `(namespace, task)`. The namespace is the
//! name of the job type that owns the implementation, or `None` for an
//! implementation shared by every job type declaring a task of that name.
//! `JobDefinition::resolve_task_implementation` walks the namespaces.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::task::{Task, TaskFactory};
use crate::domain::definition::JobDefinition;
use crate::domain::errors::RegistryError;

type TaskKey = (Option<String>, String);

#[derive(Default, Clone)]
pub struct TaskRegistry {
    factories: HashMap<TaskKey, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(
        &mut self,
        namespace: Option<&str>,
        task: &str,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        T: Task + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = (namespace.map(str::to_string), task.to_string());
        if self.factories.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(qualified(&key)));
        }
        let factory: TaskFactory = Arc::new(move || Box::new(factory()) as Box<dyn Task>);
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Register a `Default`-constructible task.
    pub fn register_default<T>(
        &mut self,
        namespace: Option<&str>,
        task: &str,
    ) -> Result<(), RegistryError>
    where
        T: Task + Default + 'static,
    {
        self.register(namespace, task, T::default)
    }

    /// Exact lookup, no fallback.
    pub fn lookup(&self, namespace: Option<&str>, task: &str) -> Option<TaskFactory> {
        self.factories
            .get(&(namespace.map(str::to_string), task.to_string()))
            .cloned()
    }

    /// Qualified names (`Job::task` or `task`), sorted.
    pub fn registered(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.factories.keys().map(qualified).collect();
        names.into_iter().collect()
    }
}

fn qualified((namespace, task): &TaskKey) -> String {
    match namespace {
        Some(ns) => format!("{ns}::{task}"),
        None => task.clone(),
    }
}

/// Job type name → shared definition.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child definitions must be registered after their parent.
    pub fn register(&mut self, definition: JobDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        if let Some(parent) = definition.parent()
            && !self.jobs.contains_key(parent)
        {
            return Err(RegistryError::UnknownParent(parent.to_string()));
        }
        self.jobs.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<JobDefinition>, RegistryError> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::JobClassNotFound(name.to_string()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.values()
    }
}

/// Everything a worker needs to turn a message into running code.
#[derive(Default, Clone)]
pub struct Registry {
    pub jobs: JobRegistry,
    pub tasks: TaskRegistry,
}

impl Registry {
    pub fn new(jobs: JobRegistry, tasks: TaskRegistry) -> Self {
        Self { jobs, tasks }
    }

    /// Declared tasks of every job type that resolve to no implementation.
    pub fn missing_implementations(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .jobs
            .definitions()
            .flat_map(|def| {
                def.tasks()
                    .iter()
                    .filter(|task| def.resolve_task_implementation(&self.tasks, task).is_err())
                    .map(|task| format!("{}::{task}", def.name()))
                    .collect::<Vec<_>>()
            })
            .collect();
        missing.sort();
        missing
    }
}
