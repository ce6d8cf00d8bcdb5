//! RuntimeBuilder - registers job types and task implementations at startup
//!
//! Fails fast: registration conflicts surface from the `register_*` calls,
//! and `expect_complete()` makes `build()` reject job types whose declared
//! tasks cannot all be resolved.

use std::sync::Arc;

use super::config::RuntimeConfig;
use super::runner::Runner;
use crate::domain::definition::JobDefinition;
use crate::domain::errors::RegistryError;
use crate::ports::control_plane::ControlPlane;
use crate::typed::registry::{JobRegistry, Registry, TaskRegistry};
use crate::typed::task::Task;

/// # Example
/// ```ignore
/// let registry = RuntimeBuilder::new()
///     .register_job(JobDefinition::new("Sample").declare_tasks(["fetch", "store"])?)?
///     .register_default_task::<Fetch>(Some("Sample"), "fetch")?
///     .register_default_task::<Store>(None, "store")?
///     .expect_complete()
///     .build()?;
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    jobs: JobRegistry,
    tasks: TaskRegistry,
    strict: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parents before children.
    pub fn register_job(mut self, definition: JobDefinition) -> Result<Self, RegistryError> {
        self.jobs.register(definition)?;
        Ok(self)
    }

    /// `namespace` is the owning job type, `None` for a shared implementation.
    pub fn register_task<T, F>(
        mut self,
        namespace: Option<&str>,
        task: &str,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        T: Task + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.tasks.register(namespace, task, factory)?;
        Ok(self)
    }

    pub fn register_default_task<T>(
        mut self,
        namespace: Option<&str>,
        task: &str,
    ) -> Result<Self, RegistryError>
    where
        T: Task + Default + 'static,
    {
        self.tasks.register_default::<T>(namespace, task)?;
        Ok(self)
    }

    pub fn expect_complete(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        let registry = Registry::new(self.jobs, self.tasks);
        if self.strict {
            let missing = registry.missing_implementations();
            if !missing.is_empty() {
                return Err(RegistryError::MissingTaskImplementations(missing));
            }
        }
        Ok(registry)
    }

    /// `build()` straight into a runner.
    pub fn into_runner(
        self,
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<RuntimeConfig>,
    ) -> Result<Runner, RegistryError> {
        Ok(Runner::new(self.build()?, control_plane, config))
    }
}
